mod api;
mod spoof_server;
mod ui;

use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

use crate::spoof_server::{ResponseMode, SpoofLog};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let (log_tx, log_rx) = mpsc::channel::<SpoofLog>(256);
    let mode = Arc::new(RwLock::new(ResponseMode::WellFormed));

    let server_log_tx = log_tx.clone();
    let server_mode = Arc::clone(&mode);
    tokio::spawn(async move {
        if let Err(e) = spoof_server::run_server(server_mode, server_log_tx.clone()).await {
            let _ = server_log_tx
                .send(SpoofLog::Internal(format!("Spoof server failed: {}", e)))
                .await;
        }
    });

    let api_log_tx = log_tx.clone();
    let api_mode = Arc::clone(&mode);
    tokio::spawn(async move {
        if let Err(e) = api::run_api_server(api_mode, api_log_tx.clone()).await {
            let _ = api_log_tx
                .send(SpoofLog::Internal(format!("Control API failed: {}", e)))
                .await;
        }
    });

    let terminal = ratatui::init();
    let mut app = ui::App::new(log_rx, mode);
    let result = app.run_ui(terminal).await;
    ratatui::restore();
    result
}
