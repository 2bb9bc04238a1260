//! HTTP surface: the seat socket and the REST collaborator endpoints.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::core::backends::{CallRepository, KvStore};
use crate::core::model::{ProjectId, SeatId, SeatState};
use crate::core::EngineError;
use crate::hub::seat_hub::SeatConnectionHub;
use crate::hub::ws::{serve_socket, SocketSettings};
use crate::runtime::api::{
    LockSeatRequest, LockSeatResponse, PreReadyRequest, ProjectSeatStatus, SeatApi,
    SeatStatsEntry, UnlockSeatRequest, UnlockSeatResponse,
};

/// Shared state of every handler.
pub struct AppState<R, K> {
    /// Connection hub.
    pub hub: Arc<SeatConnectionHub<K>>,
    /// REST operations.
    pub api: Arc<SeatApi<R, K>>,
    /// Socket heartbeat and write deadline.
    pub socket: SocketSettings,
}

impl<R, K> Clone for AppState<R, K> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            api: Arc::clone(&self.api),
            socket: self.socket,
        }
    }
}

/// [`EngineError`] rendered as an HTTP error.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Invalid(_) | EngineError::Malformed(_) => StatusCode::BAD_REQUEST,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Queue(_) | EngineError::Store(_) | EngineError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Build the router over `state`.
pub fn router<R, K>(state: AppState<R, K>) -> Router
where
    R: CallRepository,
    K: KvStore,
{
    Router::new()
        .route("/seats/{seat_id}/ws", get(seat_socket::<R, K>))
        .route("/seats/lock", post(lock_seat::<R, K>))
        .route("/seats/unlock", post(unlock_seat::<R, K>))
        .route("/seats/pre-ready", post(set_pre_ready::<R, K>))
        .route("/seats/stats", get(seat_stats::<R, K>))
        .route("/projects/{project_id}/seats", get(project_seats::<R, K>))
        .with_state(state)
}

async fn seat_socket<R, K>(
    ws: WebSocketUpgrade,
    Path(seat_id): Path<SeatId>,
    State(state): State<AppState<R, K>>,
) -> Response
where
    R: CallRepository,
    K: KvStore,
{
    ws.on_upgrade(move |socket| serve_socket(socket, seat_id, state.hub, state.socket))
}

async fn lock_seat<R, K>(
    State(state): State<AppState<R, K>>,
    Json(req): Json<LockSeatRequest>,
) -> Result<Json<LockSeatResponse>, ApiError>
where
    R: CallRepository,
    K: KvStore,
{
    Ok(Json(state.api.lock_seat(&req).await?))
}

async fn unlock_seat<R, K>(
    State(state): State<AppState<R, K>>,
    Json(req): Json<UnlockSeatRequest>,
) -> Result<Json<UnlockSeatResponse>, ApiError>
where
    R: CallRepository,
    K: KvStore,
{
    Ok(Json(state.api.unlock_seat(&req).await?))
}

async fn set_pre_ready<R, K>(
    State(state): State<AppState<R, K>>,
    Json(req): Json<PreReadyRequest>,
) -> Result<Json<SeatState>, ApiError>
where
    R: CallRepository,
    K: KvStore,
{
    Ok(Json(state.api.set_pre_ready(&req).await?))
}

async fn seat_stats<R, K>(State(state): State<AppState<R, K>>) -> Json<Vec<SeatStatsEntry>>
where
    R: CallRepository,
    K: KvStore,
{
    Json(state.api.seat_stats())
}

async fn project_seats<R, K>(
    Path(project_id): Path<ProjectId>,
    State(state): State<AppState<R, K>>,
) -> Result<Json<ProjectSeatStatus>, ApiError>
where
    R: CallRepository,
    K: KvStore,
{
    Ok(Json(state.api.project_seat_status(project_id).await?))
}
