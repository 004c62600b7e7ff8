//! Signup and login forms.
//!
//! State machine: `Editing -> Submitting -> Succeeded | Failed`. A failed form keeps its
//! message until the user edits a field or submits again. There is no retry; every submit
//! is a fresh attempt.

use crate::api::{ApiError, AuthApi, Credentials, RegisterRequest, TokenPair};
use crate::error::{ClientError, ValidationError};
use crate::router::{Navigation, Route, NAVIGATION_DELAY};
use crate::session::SessionStore;

pub const LOGIN_SUCCESS_NOTICE: &str = "Login successful!";
pub const SIGNUP_SUCCESS_NOTICE: &str = "Signup successful!";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormState {
    #[default]
    Editing,
    Submitting,
    Succeeded,
    /// Validation message, or the server's error payload verbatim.
    Failed(String),
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

fn require_password(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// Login form: username and password exchanged for a token pair.
#[derive(Debug, Default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    state: FormState,
}

impl LoginForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            FormState::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.state == FormState::Submitting
    }

    /// A field changed: leave any failed/succeeded state and go back to editing.
    pub fn touch(&mut self) {
        if self.state != FormState::Submitting {
            self.state = FormState::Editing;
        }
    }

    pub fn validate(&self) -> Result<Credentials, ValidationError> {
        require(&self.username, "username")?;
        require_password(&self.password, "password")?;
        Ok(Credentials {
            username: self.username.trim().to_string(),
            password: self.password.clone(),
        })
    }

    /// Validate and enter `Submitting`. On a validation failure the form fails locally and no request should be made.
    pub fn begin_submit(&mut self) -> Result<Credentials, ValidationError> {
        match self.validate() {
            Ok(credentials) => {
                self.state = FormState::Submitting;
                Ok(credentials)
            }
            Err(e) => {
                self.state = FormState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Apply the token response. On success the tokens are stored and the caller should navigate to the chat page after a short delay.
    pub fn finish_submit(
        &mut self,
        result: Result<TokenPair, ApiError>,
        session: &SessionStore,
    ) -> Result<Navigation, ClientError> {
        match result {
            Ok(tokens) => {
                session.save(&tokens.access, &tokens.refresh);
                self.password.clear();
                self.state = FormState::Succeeded;
                log::info!("logged in as {}", self.username.trim());
                Ok(Navigation::delayed(Route::Chat, NAVIGATION_DELAY))
            }
            Err(e) => {
                log::debug!("login failed: {}", e);
                self.state = FormState::Failed(e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn submit(
        &mut self,
        api: &dyn AuthApi,
        session: &SessionStore,
    ) -> Result<Navigation, ClientError> {
        let credentials = self.begin_submit()?;
        let result = api.obtain_tokens(&credentials).await;
        self.finish_submit(result, session)
    }
}

/// Signup form. Success sends the user to the login page; it does not log in.
#[derive(Debug, Default)]
pub struct SignupForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    state: FormState,
}

impl SignupForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            FormState::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.state == FormState::Submitting
    }

    pub fn touch(&mut self) {
        if self.state != FormState::Submitting {
            self.state = FormState::Editing;
        }
    }

    pub fn validate(&self) -> Result<RegisterRequest, ValidationError> {
        require(&self.username, "username")?;
        require(&self.email, "email")?;
        require_password(&self.password, "password")?;
        require_password(&self.password2, "password confirmation")?;
        if self.password != self.password2 {
            return Err(ValidationError::PasswordMismatch);
        }
        Ok(RegisterRequest {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            password2: self.password2.clone(),
        })
    }

    pub fn begin_submit(&mut self) -> Result<RegisterRequest, ValidationError> {
        match self.validate() {
            Ok(request) => {
                self.state = FormState::Submitting;
                Ok(request)
            }
            Err(e) => {
                self.state = FormState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub fn finish_submit(
        &mut self,
        result: Result<serde_json::Value, ApiError>,
    ) -> Result<Navigation, ClientError> {
        match result {
            Ok(_) => {
                log::info!("registered {}", self.username.trim());
                self.username.clear();
                self.email.clear();
                self.password.clear();
                self.password2.clear();
                self.state = FormState::Succeeded;
                Ok(Navigation::now(Route::Login))
            }
            Err(e) => {
                log::debug!("signup failed: {}", e);
                self.state = FormState::Failed(e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn submit(&mut self, api: &dyn AuthApi) -> Result<Navigation, ClientError> {
        let request = self.begin_submit()?;
        let result = api.register(&request).await;
        self.finish_submit(result)
    }
}
