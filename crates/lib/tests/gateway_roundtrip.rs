//! Integration test: start a mock QHub backend on a free port and drive the real gateway
//! client, forms, and page models against it. The server task is left running when the test ends.

use axum::{
    extract::{Multipart, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use qhub::api::{ApiError, ChatApi, GatewayClient, UploadFile};
use qhub::auth::{LoginForm, SignupForm};
use qhub::chat::ChatController;
use qhub::documents::DocumentsPage;
use qhub::router::{Navigation, Route, NAVIGATION_DELAY};
use qhub::session::SessionStore;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const VALID_TOKENS: [&str; 2] = ["Bearer acc-1", "Bearer acc-2"];

struct Backend {
    /// Authenticated requests that reached the server.
    hits: AtomicUsize,
    uploaded_bytes: AtomicUsize,
    chats: Mutex<Vec<Value>>,
    documents: Mutex<Vec<Value>>,
}

type Shared = Arc<Backend>;

impl Backend {
    fn new() -> Self {
        Self {
            hits: AtomicUsize::new(0),
            uploaded_bytes: AtomicUsize::new(0),
            chats: Mutex::new(vec![json!({
                "id": 1,
                "title": "Welcome",
                "created_at": "2024-05-01T10:00:00Z",
                "messages": [
                    {"id": 10, "role": "user", "content": "hi", "created_at": "2024-05-01T10:00:01Z"},
                    {"id": 11, "role": "assistant", "content": "Hello! How can I help?", "created_at": "2024-05-01T10:00:02Z"}
                ]
            })]),
            documents: Mutex::new(vec![
                json!({"id": 1, "title": "report.pdf", "file": "/media/report.pdf", "linked_chat_id": 1}),
                json!({"id": 2, "title": "notes.txt", "file": "/media/notes.txt", "linked_chat_id": null}),
            ]),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn reject(backend: &Backend, headers: &HeaderMap) -> Option<Response> {
    backend.hits.fetch_add(1, Ordering::SeqCst);
    let ok = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| VALID_TOKENS.contains(&v));
    if ok {
        None
    } else {
        Some(
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "Given token not valid for any token type"})),
            )
                .into_response(),
        )
    }
}

async fn register(Json(body): Json<Value>) -> Response {
    if body["username"] == "taken" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"username": ["A user with that username already exists."]})),
        )
            .into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({"username": body["username"], "email": body["email"]})),
    )
        .into_response()
}

async fn token(Json(body): Json<Value>) -> Response {
    if body["password"] != "secret" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "No active account found with the given credentials"})),
        )
            .into_response();
    }
    Json(json!({"access": "acc-1", "refresh": "ref-1"})).into_response()
}

async fn refresh(Json(body): Json<Value>) -> Response {
    if body["refresh"] != "ref-1" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Token is invalid"}))).into_response();
    }
    Json(json!({"access": "acc-2"})).into_response()
}

async fn list_chats(State(b): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    let chats = b.chats.lock().unwrap().clone();
    Json(json!({"count": chats.len(), "next": null, "previous": null, "results": chats})).into_response()
}

async fn create_chat(State(b): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    let chat = json!({"id": 42, "title": body["title"], "messages": []});
    b.chats.lock().unwrap().insert(0, chat.clone());
    (StatusCode::CREATED, Json(chat)).into_response()
}

async fn chat_messages(State(b): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    let chats = b.chats.lock().unwrap();
    match chats.iter().find(|c| c["id"] == id) {
        Some(chat) => Json(chat["messages"].clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."}))).into_response(),
    }
}

async fn send_message(
    State(b): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    let content = body["content"].as_str().unwrap_or_default().to_string();
    Json(json!({
        "user_message": {"id": id * 1000 + 1, "role": "user", "content": content, "created_at": "2024-05-01T11:00:00Z"},
        "assistant_message": {"id": id * 1000 + 2, "role": "assistant", "content": format!("Echo: {}", content), "created_at": "2024-05-01T11:00:01Z"}
    }))
    .into_response()
}

async fn upload(State(b): State<Shared>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    let mut name = String::from("upload");
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            if let Some(file_name) = field.file_name() {
                name = file_name.to_string();
            }
            let len = field.bytes().await.map(|bytes| bytes.len()).unwrap_or(0);
            b.uploaded_bytes.fetch_add(len, Ordering::SeqCst);
        }
    }
    b.chats
        .lock()
        .unwrap()
        .insert(0, json!({"id": 43, "title": name, "messages": []}));
    let document = json!({"id": 3, "title": name, "linked_chat_id": 43});
    b.documents.lock().unwrap().push(document.clone());
    (StatusCode::CREATED, Json(json!({"document": document, "chat_id": 43}))).into_response()
}

async fn list_documents(State(b): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    Json(Value::Array(b.documents.lock().unwrap().clone())).into_response()
}

async fn delete_document(State(b): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Some(r) = reject(&b, &headers) {
        return r;
    }
    b.documents.lock().unwrap().retain(|d| d["id"] != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn start_backend() -> (String, Shared) {
    let backend: Shared = Arc::new(Backend::new());
    let app = Router::new()
        .route("/api/users/register/", post(register))
        .route("/api/token/", post(token))
        .route("/api/token/refresh/", post(refresh))
        .route("/api/chat/chats/", get(list_chats).post(create_chat))
        .route(
            "/api/chat/chats/:id/messages/",
            get(chat_messages).post(send_message),
        )
        .route("/api/documents/", get(list_documents))
        .route("/api/documents/upload/", post(upload))
        .route("/api/documents/:id/", delete(delete_document))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}/api/", addr), backend)
}

fn temp_session_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("qhub-session-test-{}", uuid::Uuid::new_v4()))
        .join("session.json")
}

async fn logged_in(base: &str) -> (GatewayClient, SessionStore) {
    let session = SessionStore::in_memory();
    let client = GatewayClient::new(base, session.clone());
    let mut form = LoginForm::new();
    form.username = "ada".into();
    form.password = "secret".into();
    form.submit(&client, &session).await.expect("login");
    (client, session)
}

#[tokio::test]
async fn login_then_mount_loads_paginated_chats() {
    let (base, backend) = start_backend().await;
    let session = SessionStore::in_memory();
    let client = GatewayClient::new(&base, session.clone());

    let mut form = LoginForm::new();
    form.username = "ada".into();
    form.password = "secret".into();
    let nav = form.submit(&client, &session).await.expect("login");
    assert_eq!(nav, Navigation::delayed(Route::Chat, NAVIGATION_DELAY));
    assert_eq!(session.access_token().as_deref(), Some("acc-1"));
    assert_eq!(session.refresh_token().as_deref(), Some("ref-1"));

    let mut chat = ChatController::new(client, session.clone());
    chat.mount().await.expect("mount");
    assert_eq!(chat.redirect(), None);
    assert_eq!(chat.chats().len(), 1);
    assert_eq!(chat.active_chat_id(), Some(1));
    assert_eq!(chat.messages().len(), 2);
    assert_eq!(session.active_chat_id(), Some(1));
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn bad_credentials_show_server_detail() {
    let (base, _backend) = start_backend().await;
    let session = SessionStore::in_memory();
    let client = GatewayClient::new(&base, session.clone());
    let mut form = LoginForm::new();
    form.username = "ada".into();
    form.password = "wrong".into();
    let err = form.submit(&client, &session).await.unwrap_err();
    assert!(!err.is_unauthenticated());
    assert!(form.error().unwrap_or_default().contains("No active account"));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn signup_passes_server_errors_through() {
    let (base, _backend) = start_backend().await;
    let client = GatewayClient::new(&base, SessionStore::in_memory());
    let mut form = SignupForm::new();
    form.username = "taken".into();
    form.email = "t@example.com".into();
    form.password = "pw".into();
    form.password2 = "pw".into();
    form.submit(&client).await.unwrap_err();
    assert_eq!(
        form.error(),
        Some(r#"{"username":["A user with that username already exists."]}"#)
    );

    form.username = "grace".into();
    form.touch();
    let nav = form.submit(&client).await.expect("signup");
    assert_eq!(nav, Navigation::now(Route::Login));
}

#[tokio::test]
async fn rejected_token_clears_session() {
    let (base, backend) = start_backend().await;
    let session = SessionStore::in_memory();
    session.save("expired", "ref-1");
    session.set_active_chat_id(Some(1));
    let mut chat = ChatController::new(GatewayClient::new(&base, session.clone()), session.clone());

    let err = chat.mount().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated));
    assert_eq!(chat.redirect(), Some(Route::Login));
    assert!(session.snapshot().is_none());
    assert_eq!(session.active_chat_id(), None);
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn logout_blocks_calls_before_dispatch() {
    let (base, backend) = start_backend().await;
    let (client, session) = logged_in(&base).await;
    let mut chat = ChatController::new(client.clone(), session.clone());
    chat.mount().await.expect("mount");
    let before = backend.hits();

    assert_eq!(chat.logout(), Route::Login);
    assert!(!session.is_authenticated());
    assert!(matches!(chat.fetch_chats().await, Err(ApiError::Unauthenticated)));
    assert!(matches!(client.list_documents().await, Err(ApiError::Unauthenticated)));
    assert_eq!(backend.hits(), before);
}

#[tokio::test]
async fn new_chat_then_send_replaces_placeholder() {
    let (base, _backend) = start_backend().await;
    let (client, session) = logged_in(&base).await;
    let mut chat = ChatController::new(client, session.clone());
    chat.mount().await.expect("mount");

    let id = chat.create_chat().await.expect("create");
    assert_eq!(id, 42);
    assert_eq!(chat.active_chat_id(), Some(42));
    assert!(chat.messages().is_empty());

    chat.set_composer("Hello");
    chat.send_composer().await.expect("send");
    let msgs = chat.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].content, "Hello");
    assert_eq!(msgs[1].content, "Echo: Hello");
    assert!(msgs[1].created_at.is_some());
    assert!(chat.composer().is_empty());
}

#[tokio::test]
async fn upload_streams_with_progress_and_activates_chat() {
    let (base, backend) = start_backend().await;
    let (client, session) = logged_in(&base).await;

    let data = vec![b'q'; 200_000];
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let response = client
        .upload_document(
            UploadFile::from_bytes("big.txt", data.clone()),
            Arc::new(move |loaded: u64, total: u64| sink.lock().unwrap().push((loaded, total))),
        )
        .await
        .expect("upload");
    assert_eq!(response.chat_id, Some(43));
    let seen = seen.lock().unwrap().clone();
    assert!(seen.len() > 1);
    assert_eq!(seen.last(), Some(&(200_000, 200_000)));
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(backend.uploaded_bytes.load(Ordering::SeqCst), 200_000);

    let mut chat = ChatController::new(client, session.clone());
    chat.mount().await.expect("mount");
    let chat_id = chat
        .upload_document(UploadFile::from_bytes("notes.md", data))
        .await
        .expect("upload via controller");
    assert_eq!(chat_id, Some(43));
    assert_eq!(chat.active_chat_id(), Some(43));
    assert_eq!(session.active_chat_id(), Some(43));
    assert!(chat.messages().is_empty());
    assert!(!chat.upload().is_uploading());
    assert!(chat.chats().iter().any(|c| c.id == 43));
}

#[tokio::test]
async fn documents_delete_refetches_list() {
    let (base, backend) = start_backend().await;
    let (client, _session) = logged_in(&base).await;
    let mut page = DocumentsPage::new(client);
    page.refresh().await.expect("list");
    assert_eq!(page.documents().len(), 2);
    assert_eq!(page.documents()[0].linked_chat_id, Some(1));

    page.request_delete(1);
    assert!(page.confirm_delete().await.expect("delete"));
    assert_eq!(page.documents().len(), 1);
    assert_eq!(page.documents()[0].id, 2);
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn explicit_refresh_keeps_refresh_token() {
    let (base, _backend) = start_backend().await;
    let (client, session) = logged_in(&base).await;
    let token = client.refresh_tokens().await.expect("refresh");
    assert_eq!(token.access, "acc-2");
    assert_eq!(session.access_token().as_deref(), Some("acc-2"));
    assert_eq!(session.refresh_token().as_deref(), Some("ref-1"));
    assert!(client.list_chats().await.is_ok());
}

#[tokio::test]
async fn reload_restores_remembered_chat_from_file_session() {
    let (base, backend) = start_backend().await;
    let path = temp_session_path();
    {
        let session = SessionStore::file(&path);
        session.save("acc-1", "ref-1");
        session.set_active_chat_id(Some(1));
    }

    let session = SessionStore::file(&path);
    let mut chat = ChatController::new(GatewayClient::new(&base, session.clone()), session);
    chat.mount().await.expect("mount");
    assert_eq!(chat.active_chat_id(), Some(1));
    assert_eq!(chat.messages()[1].content, "Hello! How can I help?");
    assert_eq!(backend.hits(), 1);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}
