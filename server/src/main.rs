use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod provider;
mod quiz;
mod sessions;
mod state;
mod web;

use crate::config::load_settings;
use crate::error::Result as AppResult;
use crate::provider::{GeminiClient, QuestionGenerator, TextGenerator};
use crate::sessions::SessionManagerHandle;
use crate::state::AppState;
use crate::web::run_server;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", app_settings);

    let client = GeminiClient::new(&app_settings.provider)?;
    if !client.has_credentials() {
        tracing::warn!("No provider API key configured. Quiz generation will fail until one is set");
    }
    let client: Arc<dyn TextGenerator> = Arc::new(client);
    let generator = Arc::new(QuestionGenerator::new(
        client,
        app_settings.provider.models.clone(),
    ));
    tracing::info!(
        provider.models = ?generator.models(),
        "Question generator initialized"
    );

    let session_manager =
        SessionManagerHandle::spawn(32, generator.clone(), app_settings.quiz.clone());

    let app_state = AppState {
        session_manager,
        generator,
    };

    run_server(app_state, &app_settings).await?;

    Ok(())
}
