//! HTTP chat channel.
//!
//! `POST /chat` hands a message to the runner and, when asked to, waits for
//! the reply. `GET /health` reports liveness.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::config::HttpConfig;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "http";

/// Maximum JSON body size (64 KiB).
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Maximum content length for a single message (32 KiB).
const MAX_CONTENT_BYTES: usize = 32 * 1024;

/// Maximum number of requests waiting for a reply at once.
const MAX_PENDING_RESPONSES: usize = 100;

const MAX_REQUESTS_PER_MINUTE: u32 = 60;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP chat channel.
pub struct HttpChannel {
    config: HttpConfig,
    state: Arc<HttpState>,
    server: Mutex<Option<ServerHandle>>,
}

struct ServerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct HttpState {
    tx: RwLock<Option<mpsc::Sender<IncomingMessage>>>,
    /// Reply slots keyed by message ID.
    pending: RwLock<HashMap<Uuid, oneshot::Sender<String>>>,
    secret: Option<SecretString>,
    user_id: String,
    rate_limit: Mutex<RateWindow>,
}

#[derive(Debug)]
struct RateWindow {
    started: Instant,
    count: u32,
}

impl RateWindow {
    /// Count a request; `false` once the per-minute allowance is used up.
    fn admit(&mut self) -> bool {
        if self.started.elapsed() >= Duration::from_secs(60) {
            self.started = Instant::now();
            self.count = 0;
        }
        self.count += 1;
        self.count <= MAX_REQUESTS_PER_MINUTE
    }
}

impl HttpChannel {
    pub fn new(config: HttpConfig) -> Self {
        let state = Arc::new(HttpState {
            tx: RwLock::new(None),
            pending: RwLock::new(HashMap::new()),
            secret: config.webhook_secret.clone(),
            user_id: config.user_id.clone(),
            rate_limit: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
        });
        Self {
            config,
            state,
            server: Mutex::new(None),
        }
    }

    /// Routes sharing this channel's state.
    ///
    /// Until `start()` runs, `/chat` answers 503.
    pub fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/chat", post(chat_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    fn addr(&self) -> Result<SocketAddr, ChannelError> {
        format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: format!(
                    "Invalid listen address {}:{}: {}",
                    self.config.host, self.config.port, e
                ),
            })
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    content: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    wait_for_response: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatResponse {
    message_id: Uuid,
    status: String,
    response: Option<String>,
}

impl ChatResponse {
    fn error(message_id: Uuid, message: &str) -> Json<Self> {
        Json(Self {
            message_id,
            status: "error".to_string(),
            response: Some(message.to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    channel: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: CHANNEL_NAME,
    })
}

async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ChatResponse>) {
    if !state.rate_limit.lock().await.admit() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            ChatResponse::error(Uuid::nil(), "Rate limit exceeded"),
        );
    }

    if let Some(ref expected) = state.secret {
        match req.secret.as_deref() {
            Some(provided) if provided == expected.expose_secret() => {}
            Some(_) => {
                return (
                    StatusCode::UNAUTHORIZED,
                    ChatResponse::error(Uuid::nil(), "Invalid secret"),
                );
            }
            None => {
                return (
                    StatusCode::UNAUTHORIZED,
                    ChatResponse::error(Uuid::nil(), "Secret required"),
                );
            }
        }
    }

    if req.content.len() > MAX_CONTENT_BYTES {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            ChatResponse::error(Uuid::nil(), "Content too large"),
        );
    }
    if req.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ChatResponse::error(Uuid::nil(), "Content is empty"),
        );
    }

    let mut msg = IncomingMessage::new(CHANNEL_NAME, &state.user_id, req.content);
    if let Some(thread_id) = req.thread_id {
        msg = msg.with_thread(thread_id);
    }
    let msg_id = msg.id;

    let reply_rx = if req.wait_for_response {
        let mut pending = state.pending.write().await;
        if pending.len() >= MAX_PENDING_RESPONSES {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                ChatResponse::error(msg_id, "Too many pending requests"),
            );
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(msg_id, tx);
        Some(rx)
    } else {
        None
    };

    let sent = match state.tx.read().await.as_ref() {
        Some(tx) => tx
            .send(msg)
            .await
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Channel closed")),
        None => Err((StatusCode::SERVICE_UNAVAILABLE, "Channel not started")),
    };
    if let Err((status, reason)) = sent {
        state.pending.write().await.remove(&msg_id);
        return (status, ChatResponse::error(msg_id, reason));
    }

    let response = match reply_rx {
        Some(rx) => Some(match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(content)) => content,
            Ok(Err(_)) => "Response cancelled".to_string(),
            Err(_) => "Response timeout".to_string(),
        }),
        None => None,
    };
    state.pending.write().await.remove(&msg_id);

    (
        StatusCode::OK,
        Json(ChatResponse {
            message_id: msg_id,
            status: "accepted".to_string(),
            response,
        }),
    )
}

#[async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        if self.state.secret.is_none() {
            return Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: "HTTP_WEBHOOK_SECRET is required for the HTTP channel".to_string(),
            });
        }

        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;

        let (tx, rx) = mpsc::channel(256);
        *self.state.tx.write().await = Some(tx);

        let app = self.routes();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
        *self.server.lock().await = Some(ServerHandle { shutdown_tx, task });

        tracing::info!("HTTP channel listening on {}", addr);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        if let Some(tx) = self.state.pending.write().await.remove(&msg.id) {
            let _ = tx.send(response.content);
        } else {
            tracing::debug!(message_id = %msg.id, "No caller waiting for reply");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.state.tx.read().await.is_some() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: CHANNEL_NAME.to_string(),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        *self.state.tx.write().await = None;
        if let Some(server) = self.server.lock().await.take() {
            let _ = server.shutdown_tx.send(());
            let _ = server.task.await;
            tracing::info!("HTTP channel stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;

    fn config(secret: Option<&str>) -> HttpConfig {
        HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            webhook_secret: secret.map(|s| SecretString::from(s.to_string())),
            user_id: "http-user".to_string(),
        }
    }

    /// Install a message sender without binding a socket.
    async fn attach(channel: &HttpChannel) -> mpsc::Receiver<IncomingMessage> {
        let (tx, rx) = mpsc::channel(8);
        *channel.state.tx.write().await = Some(tx);
        rx
    }

    fn post_chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> ChatResponse {
        let bytes = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_http_channel_requires_secret() {
        let channel = HttpChannel::new(config(None));
        assert!(channel.start().await.is_err());
    }

    #[tokio::test]
    async fn health_is_ok() {
        let channel = HttpChannel::new(config(Some("s")));
        let response = channel
            .routes()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_before_start_is_unavailable() {
        let channel = HttpChannel::new(config(Some("s")));
        let response = channel
            .routes()
            .oneshot(post_chat(serde_json::json!({"content": "hi", "secret": "s"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_is_rejected() {
        let channel = HttpChannel::new(config(Some("s")));
        let _rx = attach(&channel).await;

        for body in [
            serde_json::json!({"content": "hi", "secret": "nope"}),
            serde_json::json!({"content": "hi"}),
        ] {
            let response = channel.routes().oneshot(post_chat(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let channel = HttpChannel::new(config(Some("s")));
        let _rx = attach(&channel).await;
        let content = "x".repeat(MAX_CONTENT_BYTES + 1);
        let response = channel
            .routes()
            .oneshot(post_chat(serde_json::json!({"content": content, "secret": "s"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn accepted_without_waiting() {
        let channel = HttpChannel::new(config(Some("s")));
        let mut rx = attach(&channel).await;

        let response = channel
            .routes()
            .oneshot(post_chat(serde_json::json!({
                "content": "hello",
                "thread_id": "t1",
                "secret": "s"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body.status, "accepted");
        assert!(body.response.is_none());

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.user_id, "http-user");
        assert_eq!(msg.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn waits_for_reply() {
        let channel = Arc::new(HttpChannel::new(config(Some("s"))));
        let mut rx = attach(&channel).await;

        let responder = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let msg = rx.recv().await.unwrap();
                channel
                    .respond(&msg, OutgoingResponse::text(format!("echo: {}", msg.content)))
                    .await
                    .unwrap();
            })
        };

        let response = channel
            .routes()
            .oneshot(post_chat(serde_json::json!({
                "content": "ping",
                "secret": "s",
                "wait_for_response": true
            })))
            .await
            .unwrap();
        responder.await.unwrap();

        let body = read_json(response).await;
        assert_eq!(body.response.as_deref(), Some("echo: ping"));
        assert!(channel.state.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_applies_per_minute() {
        let mut window = RateWindow {
            started: Instant::now(),
            count: 0,
        };
        for _ in 0..MAX_REQUESTS_PER_MINUTE {
            assert!(window.admit());
        }
        assert!(!window.admit());

        window.started = Instant::now() - Duration::from_secs(61);
        assert!(window.admit());
    }

    #[tokio::test]
    async fn start_serves_and_shutdown_stops() {
        let channel = HttpChannel::new(config(Some("s")));
        let mut stream = channel.start().await.unwrap();
        assert!(channel.health_check().await.is_ok());

        channel.shutdown().await.unwrap();
        assert!(channel.health_check().await.is_err());
        assert!(stream.next().await.is_none());
    }
}
