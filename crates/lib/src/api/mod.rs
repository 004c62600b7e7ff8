//! REST API access: wire types, the gateway client, and the traits the page models call through.

mod client;
mod types;

pub use client::{ApiError, GatewayClient, UPLOAD_CHUNK_SIZE};
pub use types::{
    Chat, ChatId, Credentials, Document, DocumentId, Message, MessageId, ProgressFn, RefreshedToken,
    RegisterRequest, Role, SendMessageResponse, TokenPair, UploadFile, UploadResponse,
};

use async_trait::async_trait;

/// Unauthenticated calls made by the signup and login forms.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// POST /users/register/: returns the created user as the server describes it.
    async fn register(&self, request: &RegisterRequest) -> Result<serde_json::Value, ApiError>;

    /// POST /token/: exchange credentials for an access/refresh pair.
    async fn obtain_tokens(&self, credentials: &Credentials) -> Result<TokenPair, ApiError>;
}

/// Authenticated calls behind the chat and documents pages.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<Chat>, ApiError>;

    async fn create_chat(&self, title: &str) -> Result<Chat, ApiError>;

    async fn chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, ApiError>;

    async fn send_message(
        &self,
        chat_id: ChatId,
        content: &str,
    ) -> Result<SendMessageResponse, ApiError>;

    /// Multipart upload; `progress` is called as the body is consumed.
    async fn upload_document(
        &self,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadResponse, ApiError>;

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError>;

    async fn delete_document(&self, id: DocumentId) -> Result<(), ApiError>;
}
