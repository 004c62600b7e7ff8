//! Gateway client for the QHub REST API.
//!
//! One `reqwest::Client` per gateway, configured with a base URL. Authenticated calls attach
//! `Authorization: Bearer <token>` from the injected session store; with no stored token they
//! fail before dispatch. A 401 on an authenticated call clears the session and surfaces
//! `ApiError::Unauthenticated`; deciding where to go next is the caller's job.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::types::{
    Chat, ChatId, ChatListPayload, CreateChatRequest, Credentials, Document, DocumentId, Message,
    ProgressFn, RefreshRequest, RefreshedToken, RegisterRequest, SendMessageRequest,
    SendMessageResponse, TokenPair, UploadFile, UploadResponse,
};
use super::{AuthApi, ChatApi};
use crate::config::{self, Config};
use crate::session::SessionStore;

/// Upload bodies are streamed in chunks of this size; progress is reported per chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No token stored, or the server rejected it. The session has been cleared.
    #[error("not authenticated")]
    Unauthenticated,
    /// Non-success status; `body` is the server's response body, verbatim.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("reading upload: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Text for an alert. Server payloads are passed through as-is.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { body, .. } if !body.trim().is_empty() => body.clone(),
            ApiError::Status { status, .. } => format!("Request failed ({})", status),
            ApiError::Unauthenticated => "Session expired. Please log in again.".to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Client for the QHub REST API.
#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
    session: SessionStore,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

async fn check_status(res: Response) -> Result<Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, ApiError> {
    let bytes = res.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, session: SessionStore) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
            session,
        }
    }

    /// Client for the API root resolved from config and environment.
    pub fn from_config(config: &Config, session: SessionStore) -> Self {
        Self::new(config::resolve_base_url(config), session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn public(&self, method: Method, path: &str) -> RequestBuilder {
        log::debug!("{} {}", method, path);
        self.http.request(method, self.url(path))
    }

    fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let Some(token) = self.session.access_token() else {
            log::debug!("{} {} not sent: no access token", method, path);
            return Err(ApiError::Unauthenticated);
        };
        log::debug!("{} {}", method, path);
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn send_authorized(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let res = req.send().await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            log::warn!(
                "token expired or invalid ({}), clearing session",
                res.url().path()
            );
            self.session.clear();
            return Err(ApiError::Unauthenticated);
        }
        check_status(res).await
    }

    /// POST /token/refresh/: trade the stored refresh token for a new access token.
    /// Only called explicitly; requests never refresh on their own.
    pub async fn refresh_tokens(&self) -> Result<RefreshedToken, ApiError> {
        let Some(refresh) = self.session.refresh_token() else {
            return Err(ApiError::Unauthenticated);
        };
        let res = self
            .public(Method::POST, "/token/refresh/")
            .json(&RefreshRequest { refresh: &refresh })
            .send()
            .await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            log::warn!("refresh token rejected, clearing session");
            self.session.clear();
            return Err(ApiError::Unauthenticated);
        }
        let token: RefreshedToken = decode(check_status(res).await?).await?;
        match token.refresh.as_deref() {
            Some(rotated) => self.session.save(&token.access, rotated),
            None => self.session.save_access_token(&token.access),
        }
        Ok(token)
    }
}

#[async_trait]
impl AuthApi for GatewayClient {
    async fn register(&self, request: &RegisterRequest) -> Result<serde_json::Value, ApiError> {
        let res = self
            .public(Method::POST, "/users/register/")
            .json(request)
            .send()
            .await?;
        let res = check_status(res).await?;
        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn obtain_tokens(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        let res = self
            .public(Method::POST, "/token/")
            .json(credentials)
            .send()
            .await?;
        decode(check_status(res).await?).await
    }
}

#[async_trait]
impl ChatApi for GatewayClient {
    async fn list_chats(&self) -> Result<Vec<Chat>, ApiError> {
        let req = self.authorized(Method::GET, "/chat/chats/")?;
        let payload: ChatListPayload = decode(self.send_authorized(req).await?).await?;
        Ok(payload.into_chats())
    }

    async fn create_chat(&self, title: &str) -> Result<Chat, ApiError> {
        let req = self
            .authorized(Method::POST, "/chat/chats/")?
            .json(&CreateChatRequest { title });
        decode(self.send_authorized(req).await?).await
    }

    async fn chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, ApiError> {
        let req = self.authorized(Method::GET, &format!("/chat/chats/{}/messages/", chat_id))?;
        decode(self.send_authorized(req).await?).await
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        content: &str,
    ) -> Result<SendMessageResponse, ApiError> {
        let req = self
            .authorized(Method::POST, &format!("/chat/chats/{}/messages/", chat_id))?
            .json(&SendMessageRequest { content });
        decode(self.send_authorized(req).await?).await
    }

    async fn upload_document(
        &self,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadResponse, ApiError> {
        let req = self.authorized(Method::POST, "/documents/upload/")?;
        let file_name = file.file_name.clone();
        let data = Arc::new(file.read().await?);
        let len = data.len();
        let total = len as u64;
        let mut sent: u64 = 0;
        let chunks = futures_util::stream::iter((0..len).step_by(UPLOAD_CHUNK_SIZE).map(
            move |start| {
                let end = (start + UPLOAD_CHUNK_SIZE).min(len);
                sent += (end - start) as u64;
                progress(sent, total);
                Ok::<Vec<u8>, std::io::Error>(data[start..end].to_vec())
            },
        ));
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(chunks),
            total,
        )
        .file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        decode(self.send_authorized(req.multipart(form)).await?).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let req = self.authorized(Method::GET, "/documents/")?;
        decode(self.send_authorized(req).await?).await
    }

    async fn delete_document(&self, id: DocumentId) -> Result<(), ApiError> {
        let req = self.authorized(Method::DELETE, &format!("/documents/{}/", id))?;
        self.send_authorized(req).await?;
        Ok(())
    }
}
