//! QHub desktop: egui app state and UI.
//!
//! Pages are driven by the library's page models. Requests run on the tokio runtime; each
//! finished request comes back as an `AppEvent` over an mpsc channel and is applied at the
//! start of the next frame.

use eframe::egui;
use qhub::api::{
    ApiError, AuthApi, Chat, ChatApi, ChatId, Document, DocumentId, GatewayClient, Message, Role,
    SendMessageResponse, TokenPair, UploadFile, UploadResponse,
};
use qhub::auth::{LoginForm, SignupForm, LOGIN_SUCCESS_NOTICE, SIGNUP_SUCCESS_NOTICE};
use qhub::chat::{
    ChatController, MessagesTicket, MountStep, PendingSend, SelectOutcome, SendStep, Ticket,
    UploadTicket, UPLOAD_FAILED_NOTICE, UPLOAD_SUCCESS_NOTICE,
};
use qhub::config::Config;
use qhub::documents::{
    DocumentsPage, DELETE_CONFIRM_PROMPT, DELETE_FAILED_NOTICE, EMPTY_DOCUMENTS_TEXT,
};
use qhub::router::{Route, Router, SessionGuard};
use qhub::session::SessionStore;
use qhub::views::{self, ChatWindowView, Intent, EMPTY_SIDEBAR_TEXT};
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

const LOG_BUFFER_MAX_LINES: usize = 2000;
const SIDEBAR_WIDTH: f32 = 240.0;
const FORM_WIDTH: f32 = 320.0;

/// Ring buffer of log lines for the Logs window. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES. Our own crates log at debug; dependencies at info.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info || metadata.target().starts_with("qhub")
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        push_log_line(format!(
            "{} [{}] {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: DesktopLogger = DesktopLogger;

pub fn install_logger() {
    let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Debug);
}

/// Result of a background request, applied on the UI thread.
enum AppEvent {
    LoggedIn(Result<TokenPair, ApiError>),
    SignedUp(Result<serde_json::Value, ApiError>),
    ChatsLoaded(Ticket, Result<Vec<Chat>, ApiError>),
    /// A chat was created; `then_send` is the message that needed it.
    ChatCreated(Result<Chat, ApiError>, Option<String>),
    MessagesLoaded(MessagesTicket, Result<Vec<Message>, ApiError>),
    MessageSent(PendingSend, Result<SendMessageResponse, ApiError>),
    FileOpened(Result<UploadFile, std::io::Error>),
    Uploaded(UploadTicket, Result<UploadResponse, ApiError>),
    DocumentsLoaded(Ticket, Result<Vec<Document>, ApiError>),
    DocumentDeleted(DocumentId, Result<(), ApiError>),
}

/// Something the user did this frame; applied after rendering.
enum Action {
    Chat(Intent),
    Navigate(Route),
    SubmitLogin,
    SubmitSignup,
    RefreshDocuments,
    RequestDelete(DocumentId),
    ConfirmDelete,
    CancelDelete,
    DismissNotice,
    ToggleLogs,
}

pub struct QHubApp {
    runtime: tokio::runtime::Runtime,
    egui_ctx: egui::Context,
    events_tx: mpsc::Sender<AppEvent>,
    events_rx: mpsc::Receiver<AppEvent>,
    session: SessionStore,
    client: GatewayClient,
    router: Router,
    /// Route whose entry hook has run.
    entered: Option<Route>,
    login: LoginForm,
    signup: SignupForm,
    chat: ChatController<GatewayClient>,
    documents: DocumentsPage<GatewayClient>,
    /// Chat to activate once the post-upload chat refresh lands.
    pending_upload_chat: Option<ChatId>,
    upload_path: String,
    /// Alert text shown in a banner until dismissed.
    notice: Option<String>,
    show_logs: bool,
}

impl QHubApp {
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;

    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: Config,
        config_path: PathBuf,
        runtime: tokio::runtime::Runtime,
    ) -> Self {
        let session_path = qhub::config::resolve_session_path(&config, &config_path);
        let session = SessionStore::file(session_path);
        let client = GatewayClient::from_config(&config, session.clone());
        log::info!("desktop started (api {})", client.base_url());
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            runtime,
            egui_ctx: cc.egui_ctx.clone(),
            events_tx,
            events_rx,
            router: Router::new(Route::Root),
            entered: None,
            login: LoginForm::new(),
            signup: SignupForm::new(),
            chat: ChatController::new(client.clone(), session.clone())
                .with_upload_limit(config.api.upload_limit_bytes),
            documents: DocumentsPage::new(client.clone()),
            pending_upload_chat: None,
            upload_path: String::new(),
            notice: None,
            show_logs: false,
            session,
            client,
        }
    }

    /// Run `task` on the runtime and deliver its event to the next frame.
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let ctx = self.egui_ctx.clone();
        self.runtime.spawn(async move {
            let event = task.await;
            let _ = tx.send(event);
            ctx.request_repaint();
        });
    }

    fn spawn_fetch_chats(&mut self) {
        let ticket = self.chat.begin_fetch_chats();
        let client = self.client.clone();
        self.spawn(async move { AppEvent::ChatsLoaded(ticket, client.list_chats().await) });
    }

    fn spawn_refresh_documents(&mut self) {
        let ticket = self.documents.begin_refresh();
        let client = self.client.clone();
        self.spawn(async move { AppEvent::DocumentsLoaded(ticket, client.list_documents().await) });
    }

    fn spawn_send(&mut self, pending: PendingSend) {
        let client = self.client.clone();
        self.spawn(async move {
            let result = client.send_message(pending.chat_id, &pending.content).await;
            AppEvent::MessageSent(pending, result)
        });
    }

    /// Entry hook for a page: session check, then its initial load.
    fn on_enter(&mut self, route: Route) {
        if let Some(redirect) = SessionGuard::check(route, &self.session) {
            log::debug!("{} needs a session", route.path());
            self.router.replace(redirect);
            return;
        }
        match route {
            Route::Chat => match self.chat.begin_mount() {
                MountStep::Redirect(to) => self.router.replace(to),
                MountStep::FetchChats(ticket) => {
                    let client = self.client.clone();
                    self.spawn(async move { AppEvent::ChatsLoaded(ticket, client.list_chats().await) });
                }
            },
            Route::Documents => self.spawn_refresh_documents(),
            Route::Root | Route::Login | Route::Signup => {}
        }
    }

    /// An auth rejection ends the session: drop page state and go to login.
    fn observe_error(&mut self, err: &ApiError) {
        if let Some(to) = SessionGuard::on_error(err) {
            self.chat.reset();
            self.documents.reset();
            self.pending_upload_chat = None;
            self.notice = Some(err.user_message());
            self.router.replace(to);
        }
    }

    fn observe(&mut self, result: Result<(), ApiError>) {
        if let Err(e) = result {
            self.observe_error(&e);
        }
    }

    fn poll_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::LoggedIn(result) => {
                if let Ok(nav) = self.login.finish_submit(result, &self.session) {
                    self.notice = Some(LOGIN_SUCCESS_NOTICE.to_string());
                    self.router.navigate(nav);
                }
            }
            AppEvent::SignedUp(result) => {
                if let Ok(nav) = self.signup.finish_submit(result) {
                    self.notice = Some(SIGNUP_SUCCESS_NOTICE.to_string());
                    self.router.navigate(nav);
                }
            }
            AppEvent::ChatsLoaded(ticket, result) => {
                let result = self.chat.finish_fetch_chats(ticket, result);
                if let Some(id) = self.pending_upload_chat.take() {
                    if !matches!(result, Err(ApiError::Unauthenticated)) {
                        self.chat.activate_uploaded_chat(id);
                    }
                }
                self.observe(result);
            }
            AppEvent::ChatCreated(result, then_send) => match self.chat.finish_create_chat(result) {
                Ok(_) => {
                    if let Some(text) = then_send {
                        if let SendStep::Dispatch(pending) = self.chat.begin_send(&text) {
                            self.spawn_send(pending);
                        }
                    }
                }
                Err(e) => self.observe_error(&e),
            },
            AppEvent::MessagesLoaded(ticket, result) => {
                let result = self.chat.finish_select_chat(ticket, result);
                self.observe(result);
            }
            AppEvent::MessageSent(pending, result) => {
                let result = self.chat.finish_send(pending, result);
                self.observe(result);
            }
            AppEvent::FileOpened(Ok(file)) => self.start_upload(file),
            AppEvent::FileOpened(Err(e)) => {
                log::warn!("cannot upload {}: {}", self.upload_path, e);
                self.notice = Some(format!("{}: {}", UPLOAD_FAILED_NOTICE, e));
            }
            AppEvent::Uploaded(ticket, result) => match self.chat.finish_upload(ticket, result) {
                Ok(chat_id) => {
                    self.notice = Some(UPLOAD_SUCCESS_NOTICE.to_string());
                    self.upload_path.clear();
                    self.pending_upload_chat = chat_id;
                    self.spawn_fetch_chats();
                }
                Err(e) => {
                    self.notice = Some(UPLOAD_FAILED_NOTICE.to_string());
                    self.observe_error(&e);
                }
            },
            AppEvent::DocumentsLoaded(ticket, result) => {
                let result = self.documents.finish_refresh(ticket, result);
                self.observe(result);
            }
            AppEvent::DocumentDeleted(id, result) => match self.documents.finish_delete(id, result) {
                Ok(()) => self.spawn_refresh_documents(),
                Err(e) => {
                    self.notice = Some(DELETE_FAILED_NOTICE.to_string());
                    self.observe_error(&e);
                }
            },
        }
    }

    fn start_upload(&mut self, file: UploadFile) {
        let ticket = match self.chat.begin_upload(&file) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.notice = Some(e.to_string());
                return;
            }
        };
        let progress = ticket.progress().callback();
        let client = self.client.clone();
        self.spawn(async move {
            let result = client.upload_document(file, progress).await;
            AppEvent::Uploaded(ticket, result)
        });
    }

    fn apply_intent(&mut self, intent: Intent) {
        match intent {
            Intent::SelectChat(id) => {
                if let SelectOutcome::Fetch(ticket) = self.chat.begin_select_chat(id) {
                    let client = self.client.clone();
                    self.spawn(async move {
                        let result = client.chat_messages(ticket.chat_id()).await;
                        AppEvent::MessagesLoaded(ticket, result)
                    });
                }
            }
            Intent::NewChat => {
                if self.chat.begin_create_chat() {
                    let client = self.client.clone();
                    self.spawn(async move { AppEvent::ChatCreated(client.create_chat("").await, None) });
                }
            }
            Intent::SendMessage => {
                let text = self.chat.composer().to_string();
                match self.chat.begin_send(&text) {
                    SendStep::Ignored => {}
                    SendStep::NeedsChat => {
                        let client = self.client.clone();
                        self.spawn(async move {
                            AppEvent::ChatCreated(client.create_chat("").await, Some(text))
                        });
                    }
                    SendStep::Dispatch(pending) => self.spawn_send(pending),
                }
            }
            Intent::UploadDocument(path) => {
                self.spawn(async move { AppEvent::FileOpened(UploadFile::open(path).await) });
            }
            Intent::OpenDocuments => self.router.replace(Route::Documents),
            Intent::Logout => {
                self.router.replace(self.chat.logout());
                self.documents.reset();
                self.pending_upload_chat = None;
            }
        }
    }

    fn apply_action(&mut self, action: Action) {
        match action {
            Action::Chat(intent) => self.apply_intent(intent),
            Action::Navigate(route) => self.router.replace(route),
            Action::SubmitLogin => {
                if let Ok(credentials) = self.login.begin_submit() {
                    let client = self.client.clone();
                    self.spawn(async move { AppEvent::LoggedIn(client.obtain_tokens(&credentials).await) });
                }
            }
            Action::SubmitSignup => {
                if let Ok(request) = self.signup.begin_submit() {
                    let client = self.client.clone();
                    self.spawn(async move { AppEvent::SignedUp(client.register(&request).await) });
                }
            }
            Action::RefreshDocuments => self.spawn_refresh_documents(),
            Action::RequestDelete(id) => self.documents.request_delete(id),
            Action::CancelDelete => self.documents.cancel_delete(),
            Action::ConfirmDelete => {
                if let Some(id) = self.documents.take_pending_delete() {
                    let client = self.client.clone();
                    self.spawn(async move { AppEvent::DocumentDeleted(id, client.delete_document(id).await) });
                }
            }
            Action::DismissNotice => self.notice = None,
            Action::ToggleLogs => self.show_logs = !self.show_logs,
        }
    }

    // ---------------- pages ----------------

    fn ui_login(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(80.0);
                ui.heading("Login");
                ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
                ui.set_max_width(FORM_WIDTH);

                let form = &mut self.login;
                let mut changed = false;
                ui.label("Username");
                changed |= ui.text_edit_singleline(&mut form.username).changed();
                ui.label("Password");
                let password = ui.add(egui::TextEdit::singleline(&mut form.password).password(true));
                changed |= password.changed();
                if changed {
                    form.touch();
                }
                if let Some(err) = form.error() {
                    ui.add_space(8.0);
                    ui.colored_label(ui.visuals().error_fg_color, err);
                }
                ui.add_space(12.0);
                let enter = password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                let label = if form.is_submitting() { "Logging in..." } else { "Login" };
                let clicked = ui
                    .add_enabled(!form.is_submitting(), egui::Button::new(label))
                    .clicked();
                if clicked || (enter && !form.is_submitting()) {
                    actions.push(Action::SubmitLogin);
                }
                ui.add_space(12.0);
                if ui.link("Don't have an account? Sign up").clicked() {
                    actions.push(Action::Navigate(Route::Signup));
                }
            });
        });
    }

    fn ui_signup(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(80.0);
                ui.heading("Sign up");
                ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
                ui.set_max_width(FORM_WIDTH);

                let form = &mut self.signup;
                let mut changed = false;
                ui.label("Username");
                changed |= ui.text_edit_singleline(&mut form.username).changed();
                ui.label("Email");
                changed |= ui.text_edit_singleline(&mut form.email).changed();
                ui.label("Password");
                changed |= ui
                    .add(egui::TextEdit::singleline(&mut form.password).password(true))
                    .changed();
                ui.label("Confirm password");
                changed |= ui
                    .add(egui::TextEdit::singleline(&mut form.password2).password(true))
                    .changed();
                if changed {
                    form.touch();
                }
                if let Some(err) = form.error() {
                    ui.add_space(8.0);
                    ui.colored_label(ui.visuals().error_fg_color, err);
                }
                ui.add_space(12.0);
                let label = if form.is_submitting() { "Signing up..." } else { "Sign up" };
                if ui
                    .add_enabled(!form.is_submitting(), egui::Button::new(label))
                    .clicked()
                {
                    actions.push(Action::SubmitSignup);
                }
                ui.add_space(12.0);
                if ui.link("Already have an account? Log in").clicked() {
                    actions.push(Action::Navigate(Route::Login));
                }
            });
        });
    }

    fn render_message(ui: &mut egui::Ui, m: &Message) {
        let is_user = m.role == Role::User;
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            if is_user {
                ui.label(egui::RichText::new(&m.content).strong());
            } else if m.is_pending() {
                ui.label(egui::RichText::new(&m.content).italics().weak());
            } else {
                ui.label(&m.content);
            }
            if let Some(at) = m.created_at {
                ui.label(egui::RichText::new(at.format("%Y-%m-%d %H:%M").to_string()).small().weak());
            }
        });
    }

    fn ui_chat(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        let items = views::sidebar_items(self.chat.chats(), self.chat.active_chat_id());
        egui::SidePanel::left("chat_history")
            .resizable(false)
            .exact_width(SIDEBAR_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(16.0);
                ui.heading("Chats");
                ui.add_space(12.0);
                let bottom_height = 3.0 * (ui.spacing().interact_size.y + 8.0);
                egui::ScrollArea::vertical()
                    .max_height((ui.available_height() - bottom_height).max(0.0))
                    .show(ui, |ui| {
                        if items.is_empty() {
                            ui.label(egui::RichText::new(EMPTY_SIDEBAR_TEXT).weak());
                        }
                        for item in &items {
                            if ui
                                .selectable_label(item.active, &item.title)
                                .on_hover_text(&item.full_title)
                                .clicked()
                            {
                                actions.push(Action::Chat(Intent::SelectChat(item.id)));
                            }
                        }
                    });
                ui.with_layout(egui::Layout::bottom_up(egui::Align::Min), |ui| {
                    ui.add_space(12.0);
                    if ui.button("Logout").clicked() {
                        actions.push(Action::Chat(Intent::Logout));
                    }
                    if ui.link("Logs").clicked() {
                        actions.push(Action::ToggleLogs);
                    }
                    if ui.link("Documents").clicked() {
                        actions.push(Action::Chat(Intent::OpenDocuments));
                    }
                });
            });

        let upload = self.chat.upload().clone();
        let upload_path = &mut self.upload_path;
        egui::TopBottomPanel::top("chat_top").show(ctx, |ui| {
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                if ui.button("New Chat").clicked() {
                    actions.push(Action::Chat(Intent::NewChat));
                }
                ui.separator();
                ui.add_enabled(
                    !upload.is_uploading(),
                    egui::TextEdit::singleline(&mut *upload_path).hint_text("path to document"),
                );
                let can_upload = !upload.is_uploading() && !upload_path.trim().is_empty();
                if ui
                    .add_enabled(can_upload, egui::Button::new(views::upload_button_label(&upload)))
                    .clicked()
                {
                    let path = PathBuf::from(upload_path.trim());
                    actions.push(Action::Chat(Intent::UploadDocument(path)));
                }
                if upload.is_uploading() {
                    let percent = upload.percent();
                    ui.add(
                        egui::ProgressBar::new(f32::from(percent) / 100.0)
                            .desired_width(160.0)
                            .text(views::progress_label(percent)),
                    );
                }
            });
            ui.add_space(8.0);
        });

        let can_send = !self.chat.composer().trim().is_empty() && !self.chat.is_creating_chat();
        egui::TopBottomPanel::bottom("composer").show(ctx, |ui| {
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                let send_width = 80.0;
                let input = ui.add_sized(
                    [ui.available_width() - send_width, ui.spacing().interact_size.y],
                    egui::TextEdit::singleline(self.chat.composer_mut()).hint_text("Type a message..."),
                );
                let enter = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                let clicked = ui.add_enabled(can_send, egui::Button::new("Send")).clicked();
                if clicked || (enter && can_send) {
                    actions.push(Action::Chat(Intent::SendMessage));
                    input.request_focus();
                }
            });
            ui.add_space(8.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let view = ChatWindowView::from_controller(&self.chat);
            ui.heading(view.title.as_str());
            ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    if let Some(text) = view.empty_text() {
                        ui.label(egui::RichText::new(text).weak());
                    }
                    for m in view.messages {
                        Self::render_message(ui, m);
                        ui.add_space(8.0);
                    }
                });
        });
    }

    fn ui_documents(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(16.0);
            ui.horizontal(|ui| {
                ui.heading("Documents");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Back to chat").clicked() {
                        actions.push(Action::Navigate(Route::Chat));
                    }
                    if ui
                        .add_enabled(!self.documents.is_loading(), egui::Button::new("Refresh"))
                        .clicked()
                    {
                        actions.push(Action::RefreshDocuments);
                    }
                });
            });
            ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

            if self.documents.is_loading() && self.documents.documents().is_empty() {
                ui.spinner();
                return;
            }
            if self.documents.documents().is_empty() {
                ui.label(egui::RichText::new(EMPTY_DOCUMENTS_TEXT).weak());
                return;
            }
            egui::ScrollArea::vertical().show(ui, |ui| {
                egui::Grid::new("documents")
                    .num_columns(4)
                    .striped(true)
                    .spacing([24.0, 8.0])
                    .show(ui, |ui| {
                        ui.strong("Title");
                        ui.strong("Chat");
                        ui.strong("Uploaded");
                        ui.label("");
                        ui.end_row();
                        for doc in self.documents.documents() {
                            ui.label(&doc.title);
                            match doc.linked_chat_id {
                                Some(id) => ui.label(format!("#{}", id)),
                                None => ui.label("-"),
                            };
                            ui.label(
                                doc.uploaded_at
                                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                                    .unwrap_or_default(),
                            );
                            if ui.button("Delete").clicked() {
                                actions.push(Action::RequestDelete(doc.id));
                            }
                            ui.end_row();
                        }
                    });
            });
        });

        if self.documents.pending_delete().is_some() {
            egui::Window::new("Delete document")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                .show(ctx, |ui| {
                    ui.label(DELETE_CONFIRM_PROMPT);
                    ui.add_space(12.0);
                    ui.horizontal(|ui| {
                        if ui.button("Delete").clicked() {
                            actions.push(Action::ConfirmDelete);
                        }
                        if ui.button("Cancel").clicked() {
                            actions.push(Action::CancelDelete);
                        }
                    });
                });
        }
    }

    fn ui_notice(&self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        let Some(notice) = &self.notice else { return };
        egui::TopBottomPanel::top("notice").show(ctx, |ui| {
            ui.add_space(6.0);
            ui.horizontal(|ui| {
                ui.label(notice);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.small_button("Dismiss").clicked() {
                        actions.push(Action::DismissNotice);
                    }
                });
            });
            ui.add_space(6.0);
        });
    }

    fn ui_logs(&mut self, ctx: &egui::Context) {
        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();
        egui::Window::new("Logs")
            .open(&mut self.show_logs)
            .default_size([640.0, 360.0])
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for line in &lines {
                            ui.label(egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace));
                        }
                        if lines.is_empty() {
                            ui.label("No log output yet.");
                        }
                    });
            });
    }
}

impl eframe::App for QHubApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_events();
        self.router.tick(Instant::now());
        let route = self.router.current();
        if self.entered != Some(route) {
            self.entered = Some(route);
            self.on_enter(route);
            ctx.request_repaint();
        }

        let mut actions = Vec::new();
        self.ui_notice(ctx, &mut actions);
        match self.router.current() {
            Route::Root | Route::Login => self.ui_login(ctx, &mut actions),
            Route::Signup => self.ui_signup(ctx, &mut actions),
            Route::Chat => self.ui_chat(ctx, &mut actions),
            Route::Documents => self.ui_documents(ctx, &mut actions),
        }
        if self.show_logs {
            self.ui_logs(ctx);
        }
        for action in actions {
            self.apply_action(action);
        }

        if self.router.has_scheduled() {
            ctx.request_repaint_after(Duration::from_millis(20));
        }
        if self.chat.upload().is_uploading() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}
