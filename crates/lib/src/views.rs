//! View models for the sidebar and the chat window, and the intents they emit.
//!
//! These hold no state of their own; everything is derived from the chat controller on
//! each render.

use std::path::PathBuf;

use crate::api::{Chat, ChatId, Message, Role};
use crate::chat::{ChatController, UploadState};

pub const NEW_CHAT_TITLE: &str = "New Chat";
pub const EMPTY_SIDEBAR_TEXT: &str = "No chats yet";
pub const EMPTY_CHAT_TEXT: &str = "Start a conversation...";
pub const UPLOAD_LABEL: &str = "Upload Document";
pub const UPLOADING_LABEL: &str = "Uploading...";

/// Sidebar titles longer than this are cut and get "..." appended.
pub const SIDEBAR_TITLE_MAX_CHARS: usize = 30;

/// Title to show for a chat: its own title if non-blank, else its first user message.
pub fn chat_display_title(chat: &Chat) -> String {
    if let Some(title) = chat.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    chat.messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
        .map(|m| m.content.trim().to_string())
        .unwrap_or_else(|| NEW_CHAT_TITLE.to_string())
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= SIDEBAR_TITLE_MAX_CHARS {
        return title.to_string();
    }
    let cut: String = title.chars().take(SIDEBAR_TITLE_MAX_CHARS).collect();
    format!("{}...", cut)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarItem {
    pub id: ChatId,
    pub title: String,
    pub full_title: String,
    pub active: bool,
}

pub fn sidebar_items(chats: &[Chat], active: Option<ChatId>) -> Vec<SidebarItem> {
    chats
        .iter()
        .map(|chat| {
            let full_title = chat_display_title(chat);
            SidebarItem {
                id: chat.id,
                title: truncate_title(&full_title),
                full_title,
                active: active == Some(chat.id),
            }
        })
        .collect()
}

pub fn upload_button_label(upload: &UploadState) -> &'static str {
    if upload.is_uploading() {
        UPLOADING_LABEL
    } else {
        UPLOAD_LABEL
    }
}

pub fn progress_label(percent: u8) -> String {
    format!("{}%", percent)
}

/// Everything the chat window renders.
#[derive(Debug, Clone)]
pub struct ChatWindowView<'a> {
    pub title: String,
    pub messages: &'a [Message],
    pub composer: &'a str,
    pub uploading: bool,
    pub upload_percent: u8,
    pub upload_label: &'static str,
}

impl<'a> ChatWindowView<'a> {
    pub fn from_controller<A: crate::api::ChatApi>(controller: &'a ChatController<A>) -> Self {
        let upload = controller.upload();
        Self {
            title: controller
                .active_chat()
                .map(chat_display_title)
                .unwrap_or_else(|| NEW_CHAT_TITLE.to_string()),
            messages: controller.messages(),
            composer: controller.composer(),
            uploading: upload.is_uploading(),
            upload_percent: upload.percent(),
            upload_label: upload_button_label(upload),
        }
    }

    /// Text to show in place of the message list, if it is empty.
    pub fn empty_text(&self) -> Option<&'static str> {
        self.messages.is_empty().then_some(EMPTY_CHAT_TEXT)
    }

    pub fn can_send(&self) -> bool {
        !self.composer.trim().is_empty()
    }
}

/// What the user asked for from the sidebar or chat window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SelectChat(ChatId),
    NewChat,
    SendMessage,
    UploadDocument(PathBuf),
    OpenDocuments,
    Logout,
}
