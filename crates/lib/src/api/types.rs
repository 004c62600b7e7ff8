//! Wire types for the QHub REST API (JSON bodies).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

pub type ChatId = i64;
pub type MessageId = i64;
pub type DocumentId = i64;

/// Server timestamps are display-only: RFC 3339, or naive (read as UTC). Anything else,
/// including a non-string value, reads as `None` instead of failing the whole payload.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(raw) = value.as_ref().and_then(|v| v.as_str()).map(str::trim) else {
        return Ok(None);
    };
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok());
    if naive.is_none() {
        log::debug!("ignoring unparseable timestamp {:?}", raw);
    }
    Ok(naive.map(|t| t.and_utc()))
}

/// Who wrote a message. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat message. Ids are server-assigned, or a local millisecond timestamp for
/// messages the client appended optimistically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Assistant placeholder still waiting for its reply. Never on the wire.
    #[serde(skip)]
    pub(crate) pending: bool,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            created_at: None,
            pending: false,
        }
    }

    pub fn assistant(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            created_at: None,
            pending: false,
        }
    }

    /// Assistant message standing in for a reply that has not arrived yet.
    pub(crate) fn placeholder(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            pending: true,
            ..Self::assistant(id, content)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Replace a pending placeholder's content. Returns false (and changes nothing) if this
    /// message is not a pending placeholder, so a placeholder resolves at most once.
    pub(crate) fn resolve(&mut self, content: String, created_at: Option<DateTime<Utc>>) -> bool {
        if !self.pending {
            return false;
        }
        self.content = content;
        self.created_at = created_at.or(self.created_at);
        self.pending = false;
        true
    }
}

/// A conversation. The list endpoint embeds each chat's messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Chat {
    pub fn new(id: ChatId, title: Option<String>) -> Self {
        Self {
            id,
            title,
            messages: Vec::new(),
            created_at: None,
        }
    }
}

/// GET /chat/chats/ answers either a paginated page or a plain array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ChatListPayload {
    Paginated { results: Vec<Chat> },
    Plain(Vec<Chat>),
}

impl ChatListPayload {
    pub(crate) fn into_chats(self) -> Vec<Chat> {
        match self {
            ChatListPayload::Paginated { results } => results,
            ChatListPayload::Plain(chats) => chats,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateChatRequest<'a> {
    pub title: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub content: &'a str,
}

/// POST /chat/chats/{id}/messages/ response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub user_message: Option<Message>,
    pub assistant_message: Message,
}

/// An uploaded document; `linked_chat_id` is the chat created for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub linked_chat_id: Option<ChatId>,
}

/// POST /documents/upload/ response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
}

/// POST /token/ body.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// POST /users/register/ body.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}

/// POST /token/ response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// POST /token/refresh/ response; `refresh` only when the server rotates refresh tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedToken {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Upload progress callback: (bytes sent, bytes total).
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone)]
enum UploadContent {
    Path(std::path::PathBuf),
    Memory(Vec<u8>),
}

/// A file chosen for upload. The size is known up front so oversized files can be
/// rejected without reading them.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub size: u64,
    content: UploadContent,
}

impl UploadFile {
    /// Describe a file on disk (reads metadata only).
    pub async fn open(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            file_name,
            size: meta.len(),
            content: UploadContent::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            size: bytes.len() as u64,
            content: UploadContent::Memory(bytes),
        }
    }

    pub(crate) async fn read(self) -> std::io::Result<Vec<u8>> {
        match self.content {
            UploadContent::Path(p) => tokio::fs::read(p).await,
            UploadContent::Memory(bytes) => Ok(bytes),
        }
    }
}
