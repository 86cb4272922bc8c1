//! HTTP consultation API.
//!
//! Exposes the same flow as the terminal loop as a JSON API. Sessions live
//! in memory and each has its own lock, so concurrent sessions do not wait
//! on each other. A session unused for `[server].session_ttl_secs` is
//! dropped; clients can also end one explicitly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sessions` | Log in (`{"user_id"}`), returns the new session |
//! | `GET`  | `/sessions/{id}` | Session state and transcript |
//! | `DELETE` | `/sessions/{id}` | End the session |
//! | `PUT`  | `/sessions/{id}/constitution` | Save the constitution (`{"constitution"}`) |
//! | `POST` | `/sessions/{id}/messages` | One consultation turn (`{"text"}`) |
//! | `GET`  | `/users/{user_id}/history` | Prior diagnoses (`?limit=`) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Malformed bodies, paths, and query strings are reported as `bad_request`.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::chat::{ChatEngine, Session, TurnWarning};
use crate::config::Config;
use crate::models::{ChatMessage, Constitution, DiagnosisRecord, IndexMatch};

struct SessionEntry {
    session: Mutex<Session>,
    /// Milliseconds since [`AppState::started`] at last use.
    last_used: AtomicU64,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<ChatEngine>,
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionEntry>>>>,
    started: Instant,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        Self {
            engine,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            started: Instant::now(),
            session_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn is_expired(&self, entry: &SessionEntry, now_ms: u64) -> bool {
        let idle = now_ms.saturating_sub(entry.last_used.load(Ordering::Relaxed));
        idle > self.session_ttl.as_millis() as u64
    }

    async fn insert(&self, session: Session) -> Uuid {
        let now = self.now_ms();
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;

        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        if sessions.len() < before {
            debug!(expired = before - sessions.len(), "dropped idle sessions");
        }

        sessions.insert(
            id,
            Arc::new(SessionEntry {
                session: Mutex::new(session),
                last_used: AtomicU64::new(now),
            }),
        );
        id
    }

    async fn session(&self, id: Uuid) -> Result<Arc<SessionEntry>, AppError> {
        let now = self.now_ms();
        let entry = self.sessions.read().await.get(&id).cloned();
        match entry {
            Some(entry) if !self.is_expired(&entry, now) => {
                entry.last_used.store(now, Ordering::Relaxed);
                Ok(entry)
            }
            Some(_) => {
                self.sessions.write().await.remove(&id);
                Err(session_not_found(id))
            }
            None => Err(session_not_found(id)),
        }
    }

    async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/{id}/constitution", put(handle_set_constitution))
        .route("/sessions/{id}/messages", post(handle_message))
        .route("/users/{user_id}/history", get(handle_history))
        .route("/health", get(handle_health))
        .fallback(handle_unknown_route)
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, engine: Arc<ChatEngine>) -> anyhow::Result<()> {
    let state = AppState::new(engine)
        .with_session_ttl(Duration::from_secs(config.server.session_ttl_secs));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "consultation API listening");
    println!("Listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn session_not_found(id: Uuid) -> AppError {
    not_found(format!("session not found: {}", id))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn session_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ Request/response bodies ============

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct ConstitutionRequest {
    pub constitution: String,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub user_id: String,
    pub constitution: Option<Constitution>,
    pub constitution_label: Option<&'static str>,
    pub is_new_user: bool,
    pub messages: Vec<ChatMessage>,
    pub history: Vec<DiagnosisRecord>,
}

impl SessionView {
    fn new(session_id: Uuid, s: &Session) -> Self {
        Self {
            session_id,
            user_id: s.user_id.clone(),
            constitution: s.constitution,
            constitution_label: s.constitution.map(|c| c.label()),
            is_new_user: s.is_new_user,
            messages: s.messages.clone(),
            history: s.history.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub reply: String,
    pub herbs: Vec<IndexMatch>,
    pub generated: bool,
    pub recorded: bool,
    pub warnings: Vec<TurnWarning>,
}

// ============ Handlers ============

async fn handle_create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let req = json_body(payload)?;
    if req.user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }
    let session = state
        .engine
        .start_session(&req.user_id)
        .await
        .map_err(internal)?;

    let view_session = session.clone();
    let id = state.insert(session).await;
    Ok((StatusCode::CREATED, Json(SessionView::new(id, &view_session))))
}

async fn handle_get_session(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionView>, AppError> {
    let id = session_id(path)?;
    let entry = state.session(id).await?;
    let session = entry.session.lock().await;
    Ok(Json(SessionView::new(id, &session)))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let id = session_id(path)?;
    if state.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

async fn handle_set_constitution(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ConstitutionRequest>, JsonRejection>,
) -> Result<Json<SessionView>, AppError> {
    let id = session_id(path)?;
    let req = json_body(payload)?;
    let constitution: Constitution = req
        .constitution
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    let entry = state.session(id).await?;
    let mut session = entry.session.lock().await;
    state
        .engine
        .set_constitution(&mut session, constitution)
        .await
        .map_err(internal)?;
    Ok(Json(SessionView::new(id, &session)))
}

async fn handle_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = session_id(path)?;
    let req = json_body(payload)?;
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }

    let entry = state.session(id).await?;
    let mut session = entry.session.lock().await;
    let outcome = state
        .engine
        .ask(&mut session, &req.text)
        .await
        .map_err(internal)?;

    Ok(Json(MessageResponse {
        reply: outcome.reply,
        herbs: outcome.herbs,
        generated: outcome.generated,
        recorded: outcome.recorded,
        warnings: outcome.warnings,
    }))
}

async fn handle_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<DiagnosisRecord>>, AppError> {
    let Query(q) = query.map_err(|rejection| bad_request(rejection.body_text()))?;
    let limit = q.limit.unwrap_or(20);
    let history = state
        .engine
        .records()
        .history(&user_id, limit)
        .await
        .map_err(internal)?;
    Ok(Json(history))
}

async fn handle_unknown_route() -> AppError {
    not_found("no such route")
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
