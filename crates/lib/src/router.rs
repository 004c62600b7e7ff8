//! Route wiring between the five pages, plus the session guard that turns an
//! authentication failure into a redirect to the login page.

use std::time::{Duration, Instant};

use crate::api::ApiError;
use crate::session::SessionStore;

/// Pause between a successful login and leaving the login page, so the stored tokens are
/// visible to whatever the next page reads.
pub const NAVIGATION_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    /// `/`: always replaced by the login page.
    #[default]
    Root,
    Signup,
    Login,
    Chat,
    Documents,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Root => "/",
            Route::Signup => "/signup",
            Route::Login => "/login",
            Route::Chat => "/chat",
            Route::Documents => "/documents",
        }
    }

    pub fn parse(path: &str) -> Option<Route> {
        let p = path.trim();
        let p = if p.len() > 1 { p.trim_end_matches('/') } else { p };
        match p {
            "" | "/" => Some(Route::Root),
            "/signup" => Some(Route::Signup),
            "/login" => Some(Route::Login),
            "/chat" => Some(Route::Chat),
            "/documents" => Some(Route::Documents),
            _ => None,
        }
    }

    /// Follow redirects: the root page is the login page.
    pub fn resolve(self) -> Route {
        match self {
            Route::Root => Route::Login,
            other => other,
        }
    }

    /// Pages that need a stored access token.
    pub fn requires_session(self) -> bool {
        matches!(self, Route::Chat | Route::Documents)
    }
}

/// A navigation request, optionally delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Navigation {
    pub to: Route,
    pub after: Duration,
}

impl Navigation {
    pub fn now(to: Route) -> Self {
        Self {
            to,
            after: Duration::ZERO,
        }
    }

    pub fn delayed(to: Route, after: Duration) -> Self {
        Self { to, after }
    }
}

/// Top-level reaction to session state. The gateway only reports `Unauthenticated`;
/// the guard is what sends the user back to the login page.
pub struct SessionGuard;

impl SessionGuard {
    /// Redirect target for entering `route` with the current session, if any.
    pub fn check(route: Route, session: &SessionStore) -> Option<Route> {
        if route.requires_session() && !session.is_authenticated() {
            Some(Route::Login)
        } else {
            None
        }
    }

    /// Redirect target after a failed call, if the failure ends the session.
    pub fn on_error(err: &ApiError) -> Option<Route> {
        match err {
            ApiError::Unauthenticated => Some(Route::Login),
            _ => None,
        }
    }
}

/// Current page plus at most one scheduled navigation. Front ends call `tick` each frame.
#[derive(Debug, Default)]
pub struct Router {
    current: Route,
    scheduled: Option<(Route, Instant)>,
}

impl Router {
    pub fn new(start: Route) -> Self {
        Self {
            current: start.resolve(),
            scheduled: None,
        }
    }

    pub fn current(&self) -> Route {
        self.current
    }

    /// Go to `to` immediately; cancels anything scheduled.
    pub fn replace(&mut self, to: Route) {
        self.scheduled = None;
        if self.current != to.resolve() {
            log::debug!("navigate {} -> {}", self.current.path(), to.resolve().path());
        }
        self.current = to.resolve();
    }

    pub fn navigate(&mut self, nav: Navigation) {
        self.navigate_at(nav, Instant::now());
    }

    pub fn navigate_at(&mut self, nav: Navigation, now: Instant) {
        if nav.after.is_zero() {
            self.replace(nav.to);
        } else {
            self.scheduled = Some((nav.to, now + nav.after));
        }
    }

    /// Apply a scheduled navigation whose time has come. Returns true if the page changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.scheduled {
            Some((to, at)) if now >= at => {
                let before = self.current;
                self.replace(to);
                before != self.current
            }
            _ => false,
        }
    }

    pub fn has_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }
}
