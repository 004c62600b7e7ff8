//! Chat page controller: the chat list, the active chat, its message sequence, the composer,
//! and upload progress.
//!
//! Each operation comes in two halves. `begin_*` updates state synchronously and says what
//! request to make; `finish_*` applies that request's result. The async wrappers chain both
//! through the controller's `ChatApi`. Front ends that run requests elsewhere (the desktop
//! app's background tasks) call the halves directly and hand results back when they arrive.
//! List and message loads are fenced, so a stale result never overwrites newer state.

use chrono::Utc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::fence::{Operation, RequestFence, Ticket};
use crate::api::{
    ApiError, Chat, ChatApi, ChatId, Message, MessageId, ProgressFn, Role, SendMessageResponse,
    UploadFile, UploadResponse,
};
use crate::config::DEFAULT_UPLOAD_LIMIT_BYTES;
use crate::error::{ClientError, ValidationError};
use crate::router::Route;
use crate::session::SessionStore;

/// Content of the assistant placeholder while a reply is outstanding.
pub const PLACEHOLDER_TEXT: &str = "Thinking...";
/// Content the placeholder gets when the send fails.
pub const SEND_FAILED_TEXT: &str = "Error: Could not get response";
pub const UPLOAD_SUCCESS_NOTICE: &str = "Document uploaded successfully";
pub const UPLOAD_FAILED_NOTICE: &str = "Upload failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerPhase {
    /// Not mounted yet; nothing has been checked.
    #[default]
    NotMounted,
    /// No usable session; the page must redirect to login.
    Unauthenticated,
    LoadingChats,
    Ready,
}

/// Upload completion as a percentage of bytes sent.
pub fn percent_of(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (loaded.min(total) as f64 * 100.0 / total as f64).round() as u8
}

/// Shared progress cell for one upload. Written from the transport, read by the UI.
#[derive(Debug, Clone, Default)]
pub struct UploadProgress(Arc<AtomicU8>);

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn report(&self, loaded: u64, total: u64) {
        self.0.store(percent_of(loaded, total), Ordering::Relaxed);
    }

    pub fn callback(&self) -> ProgressFn {
        let cell = self.clone();
        Arc::new(move |loaded: u64, total: u64| cell.report(loaded, total))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadState {
    uploading: bool,
    progress: UploadProgress,
}

impl UploadState {
    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub fn percent(&self) -> u8 {
        if self.uploading {
            self.progress.percent()
        } else {
            0
        }
    }
}

/// An upload in flight.
#[derive(Debug)]
pub struct UploadTicket {
    ticket: Ticket,
    progress: UploadProgress,
    file_name: String,
}

impl UploadTicket {
    pub fn progress(&self) -> &UploadProgress {
        &self.progress
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// A message load for a chat that was not in the cached list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagesTicket {
    ticket: Ticket,
    chat_id: ChatId,
}

impl MessagesTicket {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStep {
    Redirect(Route),
    FetchChats(Ticket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Messages came from the in-memory list; no request needed.
    Cached,
    Fetch(MessagesTicket),
}

/// A message that has been appended locally and must now be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub chat_id: ChatId,
    pub content: String,
    pub user_message_id: MessageId,
    pub placeholder_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
    /// Blank input; nothing happened.
    Ignored,
    /// No active chat: create one, then begin the send again.
    NeedsChat,
    Dispatch(PendingSend),
}

/// Append the pending sends of `local` that `fresh` lacks: each unresolved placeholder, and
/// the user message before it unless the server copy already holds it.
fn carry_pending_sends(local: &[Message], fresh: &mut Vec<Message>) {
    for (i, placeholder) in local.iter().enumerate() {
        if !placeholder.is_pending() || fresh.iter().any(|m| m.id == placeholder.id) {
            continue;
        }
        let question = i
            .checked_sub(1)
            .map(|j| &local[j])
            .filter(|m| m.role == Role::User);
        if let Some(question) = question {
            let known = fresh.iter().any(|m| {
                m.id == question.id || (m.role == Role::User && m.content == question.content)
            });
            if !known {
                fresh.push(question.clone());
            }
        }
        fresh.push(placeholder.clone());
    }
}

/// Millisecond-timestamp ids for optimistic messages, strictly increasing.
#[derive(Debug, Default)]
struct LocalIds {
    last: MessageId,
}

impl LocalIds {
    fn next(&mut self) -> MessageId {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

pub struct ChatController<A> {
    api: A,
    session: SessionStore,
    chats: Vec<Chat>,
    active_chat_id: Option<ChatId>,
    messages: Vec<Message>,
    composer: String,
    upload: UploadState,
    upload_limit: u64,
    phase: ControllerPhase,
    creating_chat: bool,
    fence: RequestFence,
    ids: LocalIds,
}

impl<A: ChatApi> ChatController<A> {
    pub fn new(api: A, session: SessionStore) -> Self {
        Self {
            api,
            session,
            chats: Vec::new(),
            active_chat_id: None,
            messages: Vec::new(),
            composer: String::new(),
            upload: UploadState::default(),
            upload_limit: DEFAULT_UPLOAD_LIMIT_BYTES,
            phase: ControllerPhase::default(),
            creating_chat: false,
            fence: RequestFence::new(),
            ids: LocalIds::default(),
        }
    }

    pub fn with_upload_limit(mut self, limit: u64) -> Self {
        self.upload_limit = limit;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.active_chat_id
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        let id = self.active_chat_id?;
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut String {
        &mut self.composer
    }

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    pub fn upload(&self) -> &UploadState {
        &self.upload
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// A create request is outstanding; sends without an active chat wait for it.
    pub fn is_creating_chat(&self) -> bool {
        self.creating_chat
    }

    /// Where the page should go instead of rendering, if anywhere. `None` before mount.
    pub fn redirect(&self) -> Option<Route> {
        (self.phase == ControllerPhase::Unauthenticated).then_some(Route::Login)
    }

    fn observe_error(&mut self, err: &ApiError) {
        if matches!(err, ApiError::Unauthenticated) {
            self.phase = ControllerPhase::Unauthenticated;
        }
    }

    fn is_listed(&self, id: ChatId) -> bool {
        self.chats.iter().any(|c| c.id == id)
    }

    fn remember(&mut self, id: Option<ChatId>) {
        self.active_chat_id = id;
        self.session.set_active_chat_id(id);
    }

    /// Keep the cached copy of the active chat equal to what is on screen.
    fn sync_active_into_cache(&mut self) {
        let Some(id) = self.active_chat_id else { return };
        if let Some(chat) = self.chats.iter_mut().find(|c| c.id == id) {
            chat.messages = self.messages.clone();
        }
    }

    // ---------------- mount ----------------

    pub fn begin_mount(&mut self) -> MountStep {
        if !self.session.is_authenticated() {
            log::debug!("chat page opened without a session");
            self.phase = ControllerPhase::Unauthenticated;
            return MountStep::Redirect(Route::Login);
        }
        self.phase = ControllerPhase::LoadingChats;
        MountStep::FetchChats(self.begin_fetch_chats())
    }

    /// Check the session and load the chat list. Afterwards, `redirect()` says whether the page may render.
    pub async fn mount(&mut self) -> Result<(), ApiError> {
        if let MountStep::FetchChats(ticket) = self.begin_mount() {
            let result = self.api.list_chats().await;
            self.finish_fetch_chats(ticket, result)?;
        }
        Ok(())
    }

    // ---------------- chat list ----------------

    pub fn begin_fetch_chats(&mut self) -> Ticket {
        self.fence.issue(Operation::ListChats)
    }

    pub fn finish_fetch_chats(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<Chat>, ApiError>,
    ) -> Result<(), ApiError> {
        if !self.fence.is_current(ticket) {
            log::debug!("dropping stale chat list (generation {})", ticket.generation());
            return Ok(());
        }
        match result {
            Ok(chats) => {
                self.apply_chat_list(chats);
                self.phase = ControllerPhase::Ready;
                Ok(())
            }
            Err(e) => {
                log::error!("loading chats failed: {}", e);
                if self.phase == ControllerPhase::LoadingChats {
                    self.phase = ControllerPhase::Ready;
                }
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    pub async fn fetch_chats(&mut self) -> Result<(), ApiError> {
        let ticket = self.begin_fetch_chats();
        let result = self.api.list_chats().await;
        self.finish_fetch_chats(ticket, result)
    }

    /// Replace the list wholesale, then pick the selection: the remembered chat if listed,
    /// else the current one if listed, else the first entry. Sends still waiting for their
    /// reply survive the replacement.
    fn apply_chat_list(&mut self, mut chats: Vec<Chat>) {
        let previous = self.active_chat_id;
        self.sync_active_into_cache();
        for chat in chats.iter_mut() {
            let local = match self.chats.iter().find(|c| c.id == chat.id) {
                Some(old) => &old.messages,
                None if previous == Some(chat.id) => &self.messages,
                None => continue,
            };
            carry_pending_sends(local, &mut chat.messages);
        }
        self.chats = chats;
        let target = self
            .session
            .active_chat_id()
            .filter(|id| self.is_listed(*id))
            .or(previous.filter(|id| self.is_listed(*id)))
            .or_else(|| self.chats.first().map(|c| c.id));

        if target != previous {
            self.fence.invalidate(Operation::LoadMessages);
        }
        match target {
            Some(id) => {
                self.messages = self
                    .chats
                    .iter()
                    .find(|c| c.id == id)
                    .map(|c| c.messages.clone())
                    .unwrap_or_default();
                self.remember(Some(id));
            }
            None => {
                self.messages.clear();
                self.remember(None);
            }
        }
    }

    // ---------------- new chat ----------------

    /// Mark a create request as outstanding. False if one already is.
    pub fn begin_create_chat(&mut self) -> bool {
        if self.creating_chat {
            return false;
        }
        self.creating_chat = true;
        true
    }

    pub fn finish_create_chat(&mut self, result: Result<Chat, ApiError>) -> Result<ChatId, ApiError> {
        self.creating_chat = false;
        match result {
            Ok(mut chat) => {
                let id = chat.id;
                chat.messages.clear();
                self.chats.retain(|c| c.id != id);
                self.chats.insert(0, chat);
                self.fence.invalidate(Operation::LoadMessages);
                self.remember(Some(id));
                self.messages.clear();
                self.composer.clear();
                log::debug!("created chat {}", id);
                Ok(id)
            }
            Err(e) => {
                log::error!("creating chat failed: {}", e);
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    /// Create an untitled chat and make it active. Returns its id so a send can follow.
    pub async fn create_chat(&mut self) -> Result<ChatId, ApiError> {
        self.creating_chat = true;
        let result = self.api.create_chat("").await;
        self.finish_create_chat(result)
    }

    // ---------------- select chat ----------------

    pub fn begin_select_chat(&mut self, id: ChatId) -> SelectOutcome {
        self.remember(Some(id));
        self.composer.clear();
        if let Some(chat) = self.chats.iter().find(|c| c.id == id) {
            self.messages = chat.messages.clone();
            self.fence.invalidate(Operation::LoadMessages);
            SelectOutcome::Cached
        } else {
            self.messages.clear();
            SelectOutcome::Fetch(MessagesTicket {
                ticket: self.fence.issue(Operation::LoadMessages),
                chat_id: id,
            })
        }
    }

    pub fn finish_select_chat(
        &mut self,
        ticket: MessagesTicket,
        result: Result<Vec<Message>, ApiError>,
    ) -> Result<(), ApiError> {
        if !self.fence.is_current(ticket.ticket) || self.active_chat_id != Some(ticket.chat_id) {
            log::debug!("dropping stale messages for chat {}", ticket.chat_id);
            return Ok(());
        }
        match result {
            Ok(messages) => {
                self.messages = messages;
                Ok(())
            }
            Err(e) => {
                log::error!("loading messages for chat {} failed: {}", ticket.chat_id, e);
                self.messages.clear();
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    /// Show a chat: from the cached list when present, otherwise from the server.
    pub async fn select_chat(&mut self, id: ChatId) -> Result<(), ApiError> {
        match self.begin_select_chat(id) {
            SelectOutcome::Cached => Ok(()),
            SelectOutcome::Fetch(ticket) => {
                let result = self.api.chat_messages(ticket.chat_id).await;
                self.finish_select_chat(ticket, result)
            }
        }
    }

    // ---------------- send ----------------

    /// Append the user message and the "Thinking..." placeholder. Blank input is ignored.
    pub fn begin_send(&mut self, text: &str) -> SendStep {
        if text.trim().is_empty() {
            return SendStep::Ignored;
        }
        let Some(chat_id) = self.active_chat_id else {
            if !self.begin_create_chat() {
                log::debug!("send ignored while a chat is being created");
                return SendStep::Ignored;
            }
            return SendStep::NeedsChat;
        };
        let user_message_id = self.ids.next();
        let placeholder_id = self.ids.next();
        self.messages.push(Message::user(user_message_id, text));
        self.messages
            .push(Message::placeholder(placeholder_id, PLACEHOLDER_TEXT));
        self.composer.clear();
        self.sync_active_into_cache();
        SendStep::Dispatch(PendingSend {
            chat_id,
            content: text.to_string(),
            user_message_id,
            placeholder_id,
        })
    }

    /// Replace the pending placeholder in place, wherever it is now shown or cached.
    fn resolve_placeholder(
        &mut self,
        pending: &PendingSend,
        content: String,
        created_at: Option<chrono::DateTime<Utc>>,
    ) -> bool {
        if self.active_chat_id == Some(pending.chat_id) {
            if let Some(m) = self
                .messages
                .iter_mut()
                .find(|m| m.id == pending.placeholder_id)
            {
                let resolved = m.resolve(content, created_at);
                if resolved {
                    self.sync_active_into_cache();
                }
                return resolved;
            }
        }
        self.chats
            .iter_mut()
            .find(|c| c.id == pending.chat_id)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == pending.placeholder_id))
            .map(|m| m.resolve(content, created_at))
            .unwrap_or(false)
    }

    pub fn finish_send(
        &mut self,
        pending: PendingSend,
        result: Result<SendMessageResponse, ApiError>,
    ) -> Result<(), ApiError> {
        match result {
            Ok(response) => {
                let reply = response.assistant_message;
                if !self.resolve_placeholder(&pending, reply.content, reply.created_at) {
                    log::debug!(
                        "reply for chat {} arrived after its placeholder was replaced",
                        pending.chat_id
                    );
                }
                Ok(())
            }
            Err(e) => {
                log::error!("sending message to chat {} failed: {}", pending.chat_id, e);
                self.resolve_placeholder(&pending, SEND_FAILED_TEXT.to_string(), None);
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    /// Send `text` to the active chat, creating a chat first when none is active.
    pub async fn send_message(&mut self, text: &str) -> Result<(), ApiError> {
        let pending = match self.begin_send(text) {
            SendStep::Ignored => return Ok(()),
            SendStep::Dispatch(pending) => pending,
            SendStep::NeedsChat => {
                self.create_chat().await?;
                match self.begin_send(text) {
                    SendStep::Dispatch(pending) => pending,
                    _ => return Ok(()),
                }
            }
        };
        let result = self.api.send_message(pending.chat_id, &pending.content).await;
        self.finish_send(pending, result)
    }

    /// Send whatever is in the composer.
    pub async fn send_composer(&mut self) -> Result<(), ApiError> {
        let text = self.composer.clone();
        self.send_message(&text).await
    }

    // ---------------- upload ----------------

    /// Reject oversized files before any request; otherwise mark the upload as started.
    pub fn begin_upload(&mut self, file: &UploadFile) -> Result<UploadTicket, ValidationError> {
        if file.size > self.upload_limit {
            log::debug!("{} is {} bytes; not uploading", file.file_name, file.size);
            return Err(ValidationError::FileTooLarge {
                size: file.size,
                limit: self.upload_limit,
            });
        }
        if self.upload.uploading {
            return Err(ValidationError::UploadInProgress);
        }
        let progress = UploadProgress::default();
        self.upload = UploadState {
            uploading: true,
            progress: progress.clone(),
        };
        Ok(UploadTicket {
            ticket: self.fence.issue(Operation::Upload),
            progress,
            file_name: file.file_name.clone(),
        })
    }

    /// End the upload. On success returns the chat the server created for the document;
    /// the caller refreshes the chat list and then calls `activate_uploaded_chat`.
    pub fn finish_upload(
        &mut self,
        ticket: UploadTicket,
        result: Result<UploadResponse, ApiError>,
    ) -> Result<Option<ChatId>, ApiError> {
        if !self.fence.is_current(ticket.ticket) {
            log::debug!("dropping stale upload result for {}", ticket.file_name);
            return result.map(|_| None);
        }
        self.upload = UploadState::default();
        match result {
            Ok(response) => {
                log::info!("uploaded {}", ticket.file_name);
                Ok(response.chat_id)
            }
            Err(e) => {
                log::error!("uploading {} failed: {}", ticket.file_name, e);
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    /// Make the upload's chat active with an empty sequence; its content is loaded lazily.
    pub fn activate_uploaded_chat(&mut self, chat_id: ChatId) {
        self.fence.invalidate(Operation::LoadMessages);
        self.remember(Some(chat_id));
        self.messages.clear();
    }

    pub async fn upload_document(&mut self, file: UploadFile) -> Result<Option<ChatId>, ClientError> {
        self.upload_document_with_progress(file, Arc::new(|_: u64, _: u64| {}))
            .await
    }

    /// Like `upload_document`, also reporting each progress update to `observer`.
    pub async fn upload_document_with_progress(
        &mut self,
        file: UploadFile,
        observer: ProgressFn,
    ) -> Result<Option<ChatId>, ClientError> {
        let ticket = self.begin_upload(&file)?;
        let cell = ticket.progress.clone();
        let progress: ProgressFn = Arc::new(move |loaded: u64, total: u64| {
            cell.report(loaded, total);
            observer(loaded, total);
        });
        let result = self.api.upload_document(file, progress).await;
        let chat_id = self.finish_upload(ticket, result)?;
        if let Err(e) = self.fetch_chats().await {
            log::warn!("refreshing chats after upload failed: {}", e);
        }
        if let Some(id) = chat_id {
            self.activate_uploaded_chat(id);
        }
        Ok(chat_id)
    }

    // ---------------- session end ----------------

    /// Drop all in-memory state; outstanding results become stale. The session store is untouched.
    pub fn reset(&mut self) {
        self.fence.invalidate_all();
        self.chats.clear();
        self.active_chat_id = None;
        self.messages.clear();
        self.composer.clear();
        self.upload = UploadState::default();
        self.creating_chat = false;
        self.phase = ControllerPhase::Unauthenticated;
    }

    /// Clear the persisted session and all page state.
    pub fn logout(&mut self) -> Route {
        self.session.clear();
        self.reset();
        log::info!("logged out");
        Route::Login
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Document, DocumentId, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicI64};
    use std::sync::Mutex;

    /// In-memory backend that records every call.
    struct FakeApi {
        calls: Mutex<Vec<String>>,
        chats: Mutex<Vec<Chat>>,
        next_chat_id: AtomicI64,
        fail_send: AtomicBool,
        reject_token: AtomicBool,
    }

    impl FakeApi {
        fn new(chats: Vec<Chat>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                chats: Mutex::new(chats),
                next_chat_id: AtomicI64::new(42),
                fail_send: AtomicBool::new(false),
                reject_token: AtomicBool::new(false),
            }
        }

        fn record(&self, call: String) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(call);
            if self.reject_token.load(Ordering::SeqCst) {
                return Err(ApiError::Unauthenticated);
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn list_chats(&self) -> Result<Vec<Chat>, ApiError> {
            self.record("list_chats".into())?;
            Ok(self.chats.lock().unwrap().clone())
        }

        async fn create_chat(&self, title: &str) -> Result<Chat, ApiError> {
            self.record(format!("create_chat:{}", title))?;
            let id = self.next_chat_id.fetch_add(1, Ordering::SeqCst);
            let chat = Chat::new(id, Some(title.to_string()));
            self.chats.lock().unwrap().insert(0, chat.clone());
            Ok(chat)
        }

        async fn chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, ApiError> {
            self.record(format!("chat_messages:{}", chat_id))?;
            Ok(vec![Message::assistant(900, format!("history of {}", chat_id))])
        }

        async fn send_message(
            &self,
            chat_id: ChatId,
            content: &str,
        ) -> Result<SendMessageResponse, ApiError> {
            self.record(format!("send_message:{}:{}", chat_id, content))?;
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 429,
                    body: r#"{"detail":"Message quota limit reached."}"#.into(),
                });
            }
            Ok(SendMessageResponse {
                user_message: Some(Message::user(1000, content)),
                assistant_message: Message::assistant(1001, format!("echo: {}", content)),
            })
        }

        async fn upload_document(
            &self,
            file: UploadFile,
            progress: ProgressFn,
        ) -> Result<UploadResponse, ApiError> {
            self.record(format!("upload:{}", file.file_name))?;
            progress(file.size / 2, file.size);
            progress(file.size, file.size);
            self.chats
                .lock()
                .unwrap()
                .insert(0, Chat::new(77, Some(file.file_name.clone())));
            Ok(UploadResponse {
                document: None,
                chat_id: Some(77),
            })
        }

        async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
            self.record("list_documents".into())?;
            Ok(Vec::new())
        }

        async fn delete_document(&self, id: DocumentId) -> Result<(), ApiError> {
            self.record(format!("delete_document:{}", id))
        }
    }

    fn chat_with(id: ChatId, contents: &[&str]) -> Chat {
        let mut chat = Chat::new(id, None);
        chat.messages = contents
            .iter()
            .enumerate()
            .map(|(i, c)| Message::user(id * 100 + i as i64, *c))
            .collect();
        chat
    }

    fn logged_in() -> SessionStore {
        let session = SessionStore::in_memory();
        session.save("access", "refresh");
        session
    }

    fn controller(chats: Vec<Chat>) -> ChatController<FakeApi> {
        ChatController::new(FakeApi::new(chats), logged_in())
    }

    #[tokio::test]
    async fn mount_without_token_redirects_without_calls() {
        let mut c = ChatController::new(FakeApi::new(vec![]), SessionStore::in_memory());
        c.mount().await.unwrap();
        assert_eq!(c.redirect(), Some(Route::Login));
        assert!(c.api().calls().is_empty());
    }

    #[test]
    fn unmounted_controller_does_not_redirect() {
        let c = controller(vec![]);
        assert_eq!(c.phase(), ControllerPhase::NotMounted);
        assert_eq!(c.redirect(), None);
    }

    #[tokio::test]
    async fn reload_restores_remembered_chat_from_cache() {
        let session = logged_in();
        session.set_active_chat_id(Some(1));
        let chats = vec![chat_with(2, &["other"]), chat_with(1, &["hi", "there"])];
        let mut c = ChatController::new(FakeApi::new(chats), session);
        c.mount().await.unwrap();
        assert_eq!(c.phase(), ControllerPhase::Ready);
        assert_eq!(c.active_chat_id(), Some(1));
        assert_eq!(c.messages().len(), 2);
        assert_eq!(c.api().calls(), vec!["list_chats"]);
    }

    #[tokio::test]
    async fn first_chat_wins_when_nothing_selected() {
        let mut c = controller(vec![chat_with(5, &["a"]), chat_with(6, &[])]);
        c.mount().await.unwrap();
        assert_eq!(c.active_chat_id(), Some(5));
        assert_eq!(c.messages()[0].content, "a");
        assert_eq!(c.session.active_chat_id(), Some(5));
    }

    #[tokio::test]
    async fn stale_remembered_chat_falls_back_to_first() {
        let session = logged_in();
        session.set_active_chat_id(Some(99));
        let mut c = ChatController::new(FakeApi::new(vec![chat_with(3, &[])]), session);
        c.mount().await.unwrap();
        assert_eq!(c.active_chat_id(), Some(3));
    }

    #[tokio::test]
    async fn selecting_listed_chats_never_calls_the_server() {
        let mut c = controller(vec![chat_with(1, &["x"]), chat_with(2, &["y", "z"]), chat_with(3, &[])]);
        c.mount().await.unwrap();
        for id in [2, 3, 1, 2] {
            c.set_composer("draft");
            c.select_chat(id).await.unwrap();
            assert_eq!(c.active_chat_id(), Some(id));
            assert!(c.composer().is_empty());
        }
        assert_eq!(c.messages().len(), 2);
        assert_eq!(c.api().calls(), vec!["list_chats"]);
    }

    #[tokio::test]
    async fn selecting_unknown_chat_fetches_messages() {
        let mut c = controller(vec![chat_with(1, &[])]);
        c.mount().await.unwrap();
        c.select_chat(8).await.unwrap();
        assert_eq!(c.messages()[0].content, "history of 8");
        assert_eq!(c.api().calls(), vec!["list_chats", "chat_messages:8"]);
    }

    #[test]
    fn superseded_message_load_is_discarded() {
        let mut c = controller(vec![]);
        let SelectOutcome::Fetch(first) = c.begin_select_chat(9) else {
            panic!("expected fetch");
        };
        let SelectOutcome::Fetch(second) = c.begin_select_chat(10) else {
            panic!("expected fetch");
        };
        c.finish_select_chat(second, Ok(vec![Message::user(1, "ten")]))
            .unwrap();
        c.finish_select_chat(first, Ok(vec![Message::user(2, "nine")]))
            .unwrap();
        assert_eq!(c.active_chat_id(), Some(10));
        assert_eq!(c.messages()[0].content, "ten");
    }

    #[test]
    fn superseded_chat_list_is_discarded() {
        let mut c = controller(vec![]);
        let old = c.begin_fetch_chats();
        let new = c.begin_fetch_chats();
        c.finish_fetch_chats(new, Ok(vec![chat_with(2, &[])])).unwrap();
        c.finish_fetch_chats(old, Ok(vec![chat_with(1, &[])])).unwrap();
        assert_eq!(c.chats().len(), 1);
        assert_eq!(c.chats()[0].id, 2);
    }

    #[tokio::test]
    async fn create_chat_activates_new_empty_chat() {
        let mut c = controller(vec![chat_with(1, &["old"])]);
        c.mount().await.unwrap();
        c.set_composer("half typed");
        let id = c.create_chat().await.unwrap();
        assert_eq!(id, 42);
        assert_eq!(c.active_chat_id(), Some(42));
        assert!(c.messages().is_empty());
        assert!(c.composer().is_empty());
        assert_eq!(c.chats()[0].id, 42);
        assert_eq!(c.session.active_chat_id(), Some(42));
        assert_eq!(c.api().calls(), vec!["list_chats", "create_chat:"]);
    }

    #[tokio::test]
    async fn blank_message_is_a_no_op() {
        let mut c = controller(vec![chat_with(1, &[])]);
        c.mount().await.unwrap();
        for text in ["", "   ", "\n\t "] {
            c.send_message(text).await.unwrap();
        }
        assert!(c.messages().is_empty());
        assert_eq!(c.api().calls(), vec!["list_chats"]);
    }

    #[tokio::test]
    async fn send_without_chat_creates_one_first() {
        let mut c = controller(vec![]);
        c.mount().await.unwrap();
        assert_eq!(c.active_chat_id(), None);
        c.send_message("Hello").await.unwrap();
        assert_eq!(
            c.api().calls(),
            vec!["list_chats", "create_chat:", "send_message:42:Hello"]
        );
        let msgs = c.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!((msgs[0].role, msgs[0].content.as_str()), (Role::User, "Hello"));
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, "echo: Hello");
        assert!(msgs[1].id > msgs[0].id);
    }

    #[test]
    fn reply_replaces_placeholder_in_place() {
        let mut c = controller(vec![]);
        let ticket = c.begin_fetch_chats();
        c.finish_fetch_chats(ticket, Ok(vec![chat_with(1, &["a", "b"])]))
            .unwrap();
        let SendStep::Dispatch(pending) = c.begin_send("question") else {
            panic!("expected dispatch");
        };
        let after_begin = c.messages().len();
        assert_eq!(after_begin, 4);
        assert_eq!(c.messages()[3].content, PLACEHOLDER_TEXT);
        assert!(c.messages()[3].is_pending());

        let placeholder_id = pending.placeholder_id;
        c.finish_send(
            pending,
            Ok(SendMessageResponse {
                user_message: None,
                assistant_message: Message::assistant(555, "answer"),
            }),
        )
        .unwrap();
        assert_eq!(c.messages().len(), after_begin);
        let reply = &c.messages()[3];
        assert_eq!(reply.id, placeholder_id);
        assert_eq!(reply.content, "answer");
        assert!(!reply.is_pending());
        assert_eq!(c.active_chat().unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn failed_send_marks_placeholder_and_keeps_user_message() {
        let mut c = controller(vec![chat_with(1, &[])]);
        c.mount().await.unwrap();
        c.api().fail_send.store(true, Ordering::SeqCst);
        let err = c.send_message("hi").await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        let msgs = c.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hi");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, SEND_FAILED_TEXT);
    }

    #[test]
    fn late_reply_lands_in_the_chat_it_was_sent_to() {
        let mut c = controller(vec![]);
        let t = c.begin_fetch_chats();
        c.finish_fetch_chats(t, Ok(vec![chat_with(1, &[]), chat_with(2, &["two"])]))
            .unwrap();
        let SendStep::Dispatch(pending) = c.begin_send("to one") else {
            panic!("expected dispatch");
        };
        assert_eq!(c.begin_select_chat(2), SelectOutcome::Cached);
        c.finish_send(
            pending,
            Ok(SendMessageResponse {
                user_message: None,
                assistant_message: Message::assistant(9, "reply one"),
            }),
        )
        .unwrap();
        assert_eq!(c.messages()[0].content, "two");
        assert_eq!(c.begin_select_chat(1), SelectOutcome::Cached);
        assert_eq!(c.messages()[1].content, "reply one");
    }

    #[test]
    fn list_refresh_during_send_keeps_the_placeholder() {
        let mut c = controller(vec![]);
        let t = c.begin_fetch_chats();
        c.finish_fetch_chats(t, Ok(vec![chat_with(1, &[]), chat_with(2, &["two"])]))
            .unwrap();
        let SendStep::Dispatch(pending) = c.begin_send("question") else {
            panic!("expected dispatch");
        };

        // The server already stored the question but has no reply yet.
        let t = c.begin_fetch_chats();
        c.finish_fetch_chats(t, Ok(vec![chat_with(1, &["question"]), chat_with(2, &["two"])]))
            .unwrap();
        assert_eq!(c.messages().len(), 2);
        assert!(c.messages()[1].is_pending());

        c.finish_send(
            pending,
            Ok(SendMessageResponse {
                user_message: None,
                assistant_message: Message::assistant(9, "the answer"),
            }),
        )
        .unwrap();
        let contents: Vec<&str> = c.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "the answer"]);

        assert_eq!(c.begin_select_chat(2), SelectOutcome::Cached);
        assert_eq!(c.begin_select_chat(1), SelectOutcome::Cached);
        assert_eq!(c.messages()[1].content, "the answer");
    }

    #[test]
    fn list_refresh_keeps_unsaved_question_of_an_inactive_chat() {
        let mut c = controller(vec![]);
        let t = c.begin_fetch_chats();
        c.finish_fetch_chats(t, Ok(vec![chat_with(1, &[]), chat_with(2, &["two"])]))
            .unwrap();
        let SendStep::Dispatch(pending) = c.begin_send("to one") else {
            panic!("expected dispatch");
        };
        assert_eq!(c.begin_select_chat(2), SelectOutcome::Cached);

        let t = c.begin_fetch_chats();
        c.finish_fetch_chats(t, Ok(vec![chat_with(1, &[]), chat_with(2, &["two"])]))
            .unwrap();
        c.finish_send(
            pending,
            Ok(SendMessageResponse {
                user_message: None,
                assistant_message: Message::assistant(9, "reply one"),
            }),
        )
        .unwrap();

        assert_eq!(c.begin_select_chat(1), SelectOutcome::Cached);
        let contents: Vec<&str> = c.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["to one", "reply one"]);
    }

    #[test]
    fn second_send_waits_for_chat_creation() {
        let mut c = controller(vec![]);
        let t = c.begin_fetch_chats();
        c.finish_fetch_chats(t, Ok(vec![])).unwrap();

        assert_eq!(c.begin_send("hello"), SendStep::NeedsChat);
        assert!(c.is_creating_chat());
        assert_eq!(c.begin_send("hello"), SendStep::Ignored);
        assert!(!c.begin_create_chat());
        assert!(c.messages().is_empty());

        c.finish_create_chat(Ok(Chat::new(42, None))).unwrap();
        assert!(!c.is_creating_chat());
        assert!(matches!(c.begin_send("hello"), SendStep::Dispatch(_)));
    }

    #[test]
    fn failed_creation_allows_another_attempt() {
        let mut c = controller(vec![]);
        c.set_composer("hello");
        assert_eq!(c.begin_send("hello"), SendStep::NeedsChat);
        c.finish_create_chat(Err(ApiError::Status {
            status: 500,
            body: "boom".into(),
        }))
        .unwrap_err();
        assert_eq!(c.composer(), "hello");
        assert_eq!(c.begin_send("hello"), SendStep::NeedsChat);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_calls() {
        let mut c = controller(vec![]);
        let mut file = UploadFile::from_bytes("big.pdf", Vec::new());
        file.size = DEFAULT_UPLOAD_LIMIT_BYTES + 1;
        let err = c.upload_document(file).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::FileTooLarge { .. })
        ));
        assert!(!c.upload().is_uploading());
        assert_eq!(c.upload().percent(), 0);
        assert!(c.api().calls().is_empty());
    }

    #[tokio::test]
    async fn upload_refreshes_chats_and_activates_document_chat() {
        let mut c = controller(vec![chat_with(1, &["x"])]);
        c.mount().await.unwrap();
        let chat_id = c
            .upload_document(UploadFile::from_bytes("notes.txt", b"hello world".to_vec()))
            .await
            .unwrap();
        assert_eq!(chat_id, Some(77));
        assert_eq!(c.active_chat_id(), Some(77));
        assert!(c.messages().is_empty());
        assert!(!c.upload().is_uploading());
        assert_eq!(
            c.api().calls(),
            vec!["list_chats", "upload:notes.txt", "list_chats"]
        );
        assert_eq!(c.chats()[0].id, 77);
    }

    #[test]
    fn upload_progress_is_tracked_while_in_flight() {
        let mut c = controller(vec![]).with_upload_limit(1024);
        let file = UploadFile::from_bytes("a.txt", vec![0; 200]);
        let ticket = c.begin_upload(&file).unwrap();
        assert!(c.upload().is_uploading());
        ticket.progress().callback()(50, 200);
        assert_eq!(c.upload().percent(), 25);
        assert_eq!(
            c.begin_upload(&file).unwrap_err(),
            ValidationError::UploadInProgress
        );
        c.finish_upload(ticket, Err(ApiError::Status { status: 500, body: String::new() }))
            .unwrap_err();
        assert!(!c.upload().is_uploading());
        assert_eq!(c.upload().percent(), 0);
    }

    #[tokio::test]
    async fn auth_rejection_moves_to_unauthenticated() {
        let mut c = controller(vec![chat_with(1, &[])]);
        c.mount().await.unwrap();
        c.api().reject_token.store(true, Ordering::SeqCst);
        c.select_chat(5).await.unwrap_err();
        assert_eq!(c.redirect(), Some(Route::Login));
    }

    #[tokio::test]
    async fn logout_clears_session_and_state() {
        let mut c = controller(vec![chat_with(1, &["m"])]);
        c.mount().await.unwrap();
        let stale = c.begin_fetch_chats();
        assert_eq!(c.logout(), Route::Login);
        assert!(c.session.snapshot().is_none());
        assert_eq!(c.session.active_chat_id(), None);
        assert!(c.chats().is_empty() && c.messages().is_empty());
        c.finish_fetch_chats(stale, Ok(vec![chat_with(1, &[])])).unwrap();
        assert!(c.chats().is_empty());
        assert_eq!(c.redirect(), Some(Route::Login));
    }

    #[test]
    fn percent_rounds_and_handles_empty_totals() {
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 67);
        assert_eq!(percent_of(10, 10), 100);
        assert_eq!(percent_of(20, 10), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    #[test]
    fn local_ids_strictly_increase() {
        let mut ids = LocalIds::default();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b && b < c);
    }
}
