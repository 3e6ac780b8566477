use axum::{
    Router,
    extract::State,
    response::Json,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::spoof_server::{ResponseMode, SharedMode, SpoofLog};

pub const CONTROL_ADDR: &str = "127.0.0.1:8091";

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: ResponseMode,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub success: bool,
    pub mode: String,
    pub description: &'static str,
}

#[derive(Clone)]
struct ControlState {
    mode: SharedMode,
    log_tx: mpsc::Sender<SpoofLog>,
}

fn mode_response(mode: ResponseMode) -> Json<ModeResponse> {
    Json(ModeResponse {
        success: true,
        mode: mode.to_string(),
        description: mode.describe(),
    })
}

async fn get_mode_handler(State(state): State<ControlState>) -> Json<ModeResponse> {
    mode_response(*state.mode.read().await)
}

async fn set_mode_handler(
    State(state): State<ControlState>,
    Json(payload): Json<SetModeRequest>,
) -> Json<ModeResponse> {
    *state.mode.write().await = payload.mode;
    let _ = state.log_tx.send(SpoofLog::ModeChanged(payload.mode)).await;
    mode_response(payload.mode)
}

pub fn create_router(mode: SharedMode, log_tx: mpsc::Sender<SpoofLog>) -> Router {
    Router::new()
        .route("/control/mode", get(get_mode_handler).post(set_mode_handler))
        .with_state(ControlState { mode, log_tx })
}

pub async fn run_api_server(
    mode: SharedMode,
    log_tx: mpsc::Sender<SpoofLog>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(CONTROL_ADDR).await?;
    let _ = log_tx
        .send(SpoofLog::Internal(format!(
            "Control API on http://{}/control/mode",
            CONTROL_ADDR
        )))
        .await;
    axum::serve(listener, create_router(mode, log_tx)).await?;
    Ok(())
}
