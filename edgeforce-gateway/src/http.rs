use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use edgeforce_wsbus::WsInboundMessage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::AppState;

/// The small slice of spec.md §6's HTTP/WebSocket surface needed to
/// exercise the core end-to-end, per SPEC_FULL.md §4.12: `GET /api/io`,
/// `POST /api/io/do/{ch}`, `GET /api/health`, and a WebSocket upgrade.
/// Full device/bridge CRUD is explicitly deferred to the out-of-scope API
/// layer.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/io", get(get_io))
        .route("/api/io/do/{channel}", post(set_do))
        .route("/api/health", get(get_health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

#[derive(Serialize)]
struct IoResponse {
    di: [u8; edgeforce_iostate::CHANNEL_COUNT],
    r#do: [u8; edgeforce_iostate::CHANNEL_COUNT],
    simulation: bool,
}

async fn get_io(State(state): State<Arc<AppState>>) -> Result<Json<IoResponse>, ApiError> {
    let di = state.io_state.get_di().await?;
    let r#do = state.io_state.get_do().await?;
    let simulation = state.io_state.get_simulation().await;
    Ok(Json(IoResponse { di, r#do, simulation }))
}

#[derive(Deserialize)]
struct SetDoBody {
    value: u8,
}

async fn set_do(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<usize>,
    Json(body): Json<SetDoBody>,
) -> Result<StatusCode, ApiError> {
    state.wsbus.handle_set_do(channel, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct HealthResponse {
    overall: &'static str,
    components: std::collections::HashMap<String, ComponentHealthJson>,
}

#[derive(Serialize)]
struct ComponentHealthJson {
    status: &'static str,
    message: String,
    failures: u32,
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let overall = state.health.overall().await;
    let components = state
        .health
        .report()
        .await
        .into_iter()
        .map(|(name, health)| {
            (
                name,
                ComponentHealthJson {
                    status: health.status.as_str(),
                    message: health.message,
                    failures: health.failures,
                },
            )
        })
        .collect();
    Json(HealthResponse {
        overall: overall.as_str(),
        components,
    })
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut outbound = state.wsbus.subscribe();
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Ok(message) = message else { break };
                let Ok(body) = serde_json::to_string(&message) else { continue };
                if socket.send(Message::Text(body.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };
                match serde_json::from_str::<WsInboundMessage>(&text) {
                    Ok(WsInboundMessage::SetDo { channel, value }) => {
                        if let Err(err) = state.wsbus.handle_set_do(channel, value).await {
                            warn!(%err, "ws inbound set_do rejected");
                        }
                    }
                    Err(err) => debug!(%err, "ignoring malformed ws inbound message"),
                }
            }
        }
    }
}

struct ApiError(edgeforce_resilience::EdgeForceError);

impl From<edgeforce_resilience::EdgeForceError> for ApiError {
    fn from(err: edgeforce_resilience::EdgeForceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}
