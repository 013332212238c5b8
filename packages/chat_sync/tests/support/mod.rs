//! In-process backend used by the integration tests: the REST routes the
//! client calls plus the `/ws/{id}` realtime endpoint.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const CHAT_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// How the realtime endpoint treats a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsBehavior {
    /// Reply to every chat frame with typing + a correlated message (sent twice).
    Echo,
    /// Close every connection right away with this code.
    CloseWith(u16),
    /// Refuse the upgrade.
    Reject,
}

pub struct BackendState {
    pub behavior: WsBehavior,
    pub ws_connections: AtomicUsize,
    pub close_codes: Mutex<Vec<Option<u16>>>,
    pub frames: Mutex<Vec<Value>>,
    pub history: Mutex<HashMap<i64, Value>>,
    pub chat_requests: Mutex<Vec<(i64, String)>>,
    pub chat_fails: bool,
    pub deleted: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<String>>,
}

pub struct TestBackend {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
}

impl TestBackend {
    pub async fn start(behavior: WsBehavior) -> Self {
        Self::start_with(behavior, false).await
    }

    pub async fn start_with(behavior: WsBehavior, chat_fails: bool) -> Self {
        let state = Arc::new(BackendState {
            behavior,
            ws_connections: AtomicUsize::new(0),
            close_codes: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            chat_requests: Mutex::new(Vec::new()),
            chat_fails,
            deleted: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/ws/{id}", get(ws_handler))
            .route(
                "/api/conversations",
                get(list_conversations).post(create_conversation),
            )
            .route(
                "/api/conversations/{id}",
                get(get_conversation).delete(delete_conversation),
            )
            .route("/api/conversations/{id}/messages", get(get_messages))
            .route("/api/conversations/{id}/chat", post(chat))
            .route("/api/documents", get(list_documents))
            .route("/api/documents/upload", post(upload_document))
            .route("/api/documents/{id}", delete(delete_document))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test backend");
        });

        Self { addr, state }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn set_history(&self, conversation_id: i64, messages: Value) {
        self.state
            .history
            .lock()
            .unwrap()
            .insert(conversation_id, messages);
    }

    pub fn connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    pub fn close_codes(&self) -> Vec<Option<u16>> {
        self.state.close_codes.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<Value> {
        self.state.frames.lock().unwrap().clone()
    }
}

/// Poll `check` until it holds or the test timeout passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(_id): Path<i64>,
    State(state): State<Arc<BackendState>>,
) -> Response {
    if state.behavior == WsBehavior::Reject {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);

    if let WsBehavior::CloseWith(code) = state.behavior {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: String::from("test close").into(),
            })))
            .await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                state.frames.lock().unwrap().push(frame.clone());

                let Some(content) = frame.get("message").and_then(Value::as_str) else {
                    continue;
                };
                let mut reply = json!({"type": "message", "content": format!("echo: {content}")});
                if let Some(token) = frame.get("request_id") {
                    reply["reply_to"] = token.clone();
                }
                let outgoing = [
                    json!({"type": "typing", "status": true}),
                    json!({"type": "progress", "percent": 50}),
                    reply.clone(),
                    reply,
                    json!({"type": "typing", "status": false}),
                ];
                for out in outgoing {
                    if socket
                        .send(Message::Text(out.to_string().into()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Message::Close(frame) => {
                state
                    .close_codes
                    .lock()
                    .unwrap()
                    .push(frame.map(|f| f.code));
                return;
            }
            _ => {}
        }
    }
}

fn conversation(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "created_at": "2024-01-01T00:00:00",
        "updated_at": "2024-01-02T08:30:00.250000",
    })
}

async fn list_conversations() -> Json<Value> {
    Json(json!([conversation(1, "Contracts"), conversation(2, "Tax questions")]))
}

async fn create_conversation(Json(body): Json<Value>) -> Json<Value> {
    let title = body
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("untitled");
    Json(conversation(7, title))
}

async fn get_conversation(Path(id): Path<i64>) -> Response {
    if id == 404 {
        return (StatusCode::NOT_FOUND, "Conversation not found").into_response();
    }
    Json(conversation(id, "Contracts")).into_response()
}

async fn delete_conversation(
    Path(id): Path<i64>,
    State(state): State<Arc<BackendState>>,
) -> StatusCode {
    state
        .deleted
        .lock()
        .unwrap()
        .push(format!("conversation:{id}"));
    StatusCode::NO_CONTENT
}

async fn get_messages(
    Path(id): Path<i64>,
    State(state): State<Arc<BackendState>>,
) -> Json<Value> {
    let history = state.history.lock().unwrap().get(&id).cloned();
    Json(history.unwrap_or_else(|| json!([])))
}

async fn chat(
    Path(id): Path<i64>,
    State(state): State<Arc<BackendState>>,
    Json(body): Json<Value>,
) -> Response {
    let content = body
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    state.chat_requests.lock().unwrap().push((id, content));
    if state.chat_fails {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model unavailable").into_response();
    }
    Json(json!({
        "message": {"id": 42, "timestamp": CHAT_TIMESTAMP},
        "answer": "Hi there",
    }))
    .into_response()
}

async fn list_documents() -> Json<Value> {
    Json(json!([{
        "id": 3,
        "original_filename": "lease.pdf",
        "file_type": "pdf",
        "chunk_count": 12,
        "uploaded_at": "2024-01-03T10:00:00",
        "processed": true,
    }]))
}

async fn upload_document(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("multipart/form-data") {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    state.uploads.lock().unwrap().push(body);
    Json(json!({
        "id": 9,
        "original_filename": "notes.txt",
        "processed": false,
    }))
    .into_response()
}

async fn delete_document(
    Path(id): Path<i64>,
    State(state): State<Arc<BackendState>>,
) -> StatusCode {
    state.deleted.lock().unwrap().push(format!("document:{id}"));
    StatusCode::NO_CONTENT
}
