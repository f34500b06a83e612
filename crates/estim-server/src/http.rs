//! HTTP surface: room create/update plus the WebSocket upgrade into a
//! session. Thin glue — everything stateful happens in the store and the
//! session loop.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use estim_store::{RoomStore, Snapshot, StoreError};

use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub store: RoomStore,
    pub keepalive_window: Duration,
    pub frontend_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::RoomNotFound(id) | ApiError::Store(StoreError::NotFound(id)) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": "Couldn't init room",
                    "error": format!("room not found: {id}"),
                }),
            ),
            ApiError::InvalidBody(issues) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": "Couldn't parse body params",
                    "issues": issues,
                }),
            ),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "Store failure" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(upsert_room).fallback(not_implemented))
        .route("/:room_id", get(room_socket).fallback(not_implemented))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomBody {
    id: Option<String>,
    name: String,
    vote_system: String,
}

/// Create a room (no `id`) or update one (`id` present), answering with its
/// current snapshot.
async fn upsert_room(
    State(state): State<AppState>,
    body: Result<Json<RoomBody>, JsonRejection>,
) -> Result<Json<Snapshot>, ApiError> {
    let Json(RoomBody {
        id,
        name,
        vote_system,
    }) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let room_id = match id {
        Some(room_id) => {
            state
                .store
                .update_room(&room_id, |mut room| {
                    room.name = name;
                    room.vote_system = vote_system;
                    room
                })
                .await?;
            room_id
        }
        None => state.store.create_room(&name, &vote_system).await?,
    };

    Ok(Json(state.store.get_snapshot(&room_id).await?))
}

/// Upgrade a `GET /{room_id}` into a session, refusing the upgrade when the
/// room does not exist — no partial state is created. Plain browser GETs
/// are redirected to the frontend.
async fn room_socket(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let Some(ws) = ws else {
        return Ok((
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, state.frontend_url)],
        )
            .into_response());
    };

    if !state.store.room_exists(&room_id).await? {
        return Err(ApiError::RoomNotFound(room_id));
    }

    let store = state.store.clone();
    let window = state.keepalive_window;
    Ok(ws.on_upgrade(move |socket| session::run(socket, store, room_id, window)))
}
