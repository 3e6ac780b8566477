use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::error::{Result as WebResult, WebError};
use crate::provider::generator::{MIN_TOPIC_CHARS, validate_request};
use crate::provider::{ModelInfo, ProviderError};
use crate::quiz::session::MAX_QUESTION_COUNT;
use crate::quiz::{GenerationRequest, ModelAttempt, Question};
use crate::sessions::SessionDetails;
use crate::state::AppState;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizRequest {
    pub topic: Option<String>,
    pub count: Option<JsonValue>,
    pub used_questions_text: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct GenerateQuizResponse {
    pub status: &'static str,
    pub questions: Vec<Question>,
}

#[derive(Serialize, Debug)]
pub struct ListModelsResponse {
    pub status: &'static str,
    pub models: Vec<ModelInfo>,
}

impl GenerateQuizRequest {
    fn into_generation_request(self) -> WebResult<GenerationRequest> {
        let topic = self.topic.unwrap_or_default().trim().to_string();
        if topic.chars().count() < MIN_TOPIC_CHARS {
            return Err(WebError::BadRequest(format!(
                "topic must be at least {} characters",
                MIN_TOPIC_CHARS
            )));
        }

        let count = self
            .count
            .as_ref()
            .and_then(JsonValue::as_u64)
            .filter(|count| (1..=MAX_QUESTION_COUNT as u64).contains(count))
            .ok_or_else(|| {
                WebError::BadRequest(format!(
                    "count must be an integer between 1 and {}",
                    MAX_QUESTION_COUNT
                ))
            })?;

        let request = GenerationRequest {
            topic,
            count: count as usize,
            used_questions_text: self.used_questions_text.unwrap_or_default(),
        };
        validate_request(&request)?;
        Ok(request)
    }
}

pub async fn generate_quiz_handler(
    State(app_state): State<AppState>,
    payload: Result<Json<GenerateQuizRequest>, JsonRejection>,
) -> WebResult<Json<GenerateQuizResponse>> {
    let Json(payload) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Rejected generate-quiz body");
        WebError::BadRequest(rejection.body_text())
    })?;
    let request = payload.into_generation_request()?;
    tracing::info!(
        quiz.topic = %request.topic,
        quiz.count = request.count,
        "HTTP: Received generate-quiz request"
    );

    let questions = app_state.generator.generate(&request).await.map_err(|e| {
        tracing::error!(error = %e, "Quiz generation failed");
        WebError::from(e)
    })?;

    Ok(Json(GenerateQuizResponse {
        status: "ok",
        questions,
    }))
}

pub async fn list_models_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<ListModelsResponse>> {
    tracing::info!("HTTP: Received list-models request");

    let models = app_state
        .generator
        .list_models()
        .await
        .map_err(|e| match e {
            ProviderError::Unsupported => {
                WebError::NotImplemented("Model listing is not supported".to_string())
            }
            ProviderError::MissingCredentials => {
                WebError::InternalServerError("Server is missing the provider API key".to_string())
            }
            other => {
                tracing::error!(error = %other, "Failed to list models");
                WebError::Upstream {
                    message: "Could not list provider models".to_string(),
                    attempts: vec![ModelAttempt {
                        model: "listModels".to_string(),
                        error: other.to_string(),
                    }],
                }
            }
        })?;

    Ok(Json(ListModelsResponse {
        status: "ok",
        models,
    }))
}

pub async fn create_session_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<SessionDetails>> {
    let details = app_state
        .session_manager
        .create_session()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create session");
            WebError::InternalServerError(e)
        })?;

    tracing::info!(session.id = %details.session_id, "HTTP: Created session");
    Ok(Json(details))
}
