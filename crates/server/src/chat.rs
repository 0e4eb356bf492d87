use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use salescope_agent::{AgentRuntime, TurnRequest};
use salescope_core::domain::intent::Route;
use salescope_core::domain::message::Role;
use salescope_core::domain::session::SessionId;
use salescope_core::errors::{ApplicationError, DomainError, InterfaceError};

#[derive(Clone)]
pub struct ChatState {
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub route: Route,
    pub is_error: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub exists: bool,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            InterfaceError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error: code.to_string(),
            message: self.0.user_message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn bad_request(error: DomainError, correlation_id: &str) -> ApiError {
    ApiError(ApplicationError::from(error).into_interface(correlation_id))
}

fn parse_session(raw: &str, correlation_id: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).map_err(|error| bad_request(error, correlation_id))
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/chat/{session_id}", delete(clear_session))
        .route("/api/v1/chat/{session_id}/history", get(history))
        .with_state(state)
}

pub async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = new_correlation_id();

    let session_id = match request.session_id.as_deref() {
        Some(raw) => parse_session(raw, &correlation_id)?,
        None => SessionId::generate(),
    };
    if request.message.trim().is_empty() {
        return Err(bad_request(
            DomainError::InvalidMessage("message must not be empty".to_string()),
            &correlation_id,
        ));
    }

    // Dropping the request future (client went away) cancels the turn.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let turn = TurnRequest::new(session_id, request.message)
        .with_correlation_id(correlation_id.as_str());
    let reply = state
        .runtime
        .handle_turn(turn, cancel)
        .await
        .map_err(|error| ApiError(ApplicationError::from(error).into_interface(&correlation_id)))?;

    Ok(Json(ChatResponse {
        session_id: reply.session_id.to_string(),
        response: reply.response,
        route: reply.route,
        is_error: reply.is_error,
    }))
}

pub async fn history(
    State(state): State<ChatState>,
    Path(raw_session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let session_id = parse_session(&raw_session_id, &correlation_id)?;
    let entries = state.runtime.sessions().list(&session_id).await.map_err(|error| {
        ApiError(ApplicationError::Persistence(error.to_string()).into_interface(&correlation_id))
    })?;

    Ok(Json(HistoryResponse {
        session_id: session_id.to_string(),
        exists: !entries.is_empty(),
        history: entries
            .into_iter()
            .map(|entry| HistoryEntry {
                role: entry.role,
                content: entry.content.primary_text(),
                metadata: entry.metadata,
                created_at: entry.created_at.to_rfc3339(),
            })
            .collect(),
    }))
}

pub async fn clear_session(
    State(state): State<ChatState>,
    Path(raw_session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = new_correlation_id();
    let session_id = parse_session(&raw_session_id, &correlation_id)?;
    state.runtime.sessions().clear(&session_id).await.map_err(|error| {
        ApiError(ApplicationError::Persistence(error.to_string()).into_interface(&correlation_id))
    })?;

    info!(
        event_name = "server.chat.session_cleared",
        correlation_id = %correlation_id,
        session_id = %session_id,
        "chat session cleared"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use chrono::Duration;
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tower::ServiceExt;

    use salescope_agent::{
        AgentRuntime, GenerationRequest, GenerationResponse, LlmClient, LlmError, QueryGuard,
        RuntimeParts, RuntimeSettings, SqlToolProvider,
    };
    use salescope_core::domain::intent::Route;
    use salescope_db::migrations::run_pending;
    use salescope_db::{connect_with_settings, InMemorySessionStore, SqlSalesRepository};

    use super::{router, ChatResponse, ChatState, ErrorBody, HistoryResponse};

    struct Replies(Mutex<VecDeque<&'static str>>);

    #[async_trait]
    impl LlmClient for Replies {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.0
                .lock()
                .expect("lock")
                .pop_front()
                .map(GenerationResponse::text)
                .ok_or_else(|| LlmError::Network("backend offline".to_string()))
        }
    }

    async fn app(replies: Vec<&'static str>) -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        let parts = RuntimeParts::new(
            Arc::new(Replies(Mutex::new(replies.into()))),
            Arc::new(InMemorySessionStore::new(Duration::hours(24))),
            Arc::new(SqlSalesRepository::new(pool.clone())),
            SqlToolProvider::new(pool, QueryGuard::default()).registry(),
        );
        let runtime = AgentRuntime::new(parts, RuntimeSettings::default()).expect("runtime");
        router(ChatState { runtime: Arc::new(runtime) })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |body| Body::from(body.to_string())))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("json body")
    }

    #[tokio::test]
    async fn chat_mints_session_and_history_reflects_the_exchange() {
        let app = app(vec![r#"{"message_type":"normal"}"#, "Hi! Ask me about your sales."]).await;

        let (status, body) =
            send(&app, Method::POST, "/api/v1/chat", Some(json!({ "message": "Hello" }))).await;
        assert_eq!(status, StatusCode::OK);
        let reply: ChatResponse = decode(&body);
        assert_eq!(reply.route, Route::Normal);
        assert_eq!(reply.response, "Hi! Ask me about your sales.");
        assert!(!reply.is_error);

        let uri = format!("/api/v1/chat/{}/history", reply.session_id);
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let history: HistoryResponse = decode(&body);
        assert!(history.exists);
        assert_eq!(history.history.len(), 2);
        assert_eq!(history.history[0].content, "Hello");

        let (status, _) =
            send(&app, Method::DELETE, &format!("/api/v1/chat/{}", reply.session_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&app, Method::GET, &uri, None).await;
        assert!(!decode::<HistoryResponse>(&body).exists);
    }

    #[tokio::test]
    async fn empty_message_is_a_bad_request() {
        let app = app(Vec::new()).await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/chat",
            Some(json!({ "session_id": "s-1", "message": "   " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body);
        assert_eq!(error.error, "bad_request");
        assert!(!error.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn classifier_outage_maps_to_bad_gateway() {
        let app = app(Vec::new()).await;
        let (status, body) =
            send(&app, Method::POST, "/api/v1/chat", Some(json!({ "message": "Hello" }))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let error: ErrorBody = decode(&body);
        assert_eq!(error.message, "The assistant is temporarily unavailable. Please retry shortly.");
    }

    #[tokio::test]
    async fn unknown_session_history_is_empty_not_an_error() {
        let app = app(Vec::new()).await;
        let (status, body) = send(&app, Method::GET, "/api/v1/chat/never-seen/history", None).await;

        assert_eq!(status, StatusCode::OK);
        let history: HistoryResponse = decode(&body);
        assert!(!history.exists);
        assert!(history.history.is_empty());
    }
}
