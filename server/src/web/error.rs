use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::quiz::{GenerationError, ModelAttempt};

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Upstream failure: {message}")]
    Upstream {
        message: String,
        attempts: Vec<ModelAttempt>,
    },
    #[error("Unparseable upstream output: {message}")]
    UnparseableUpstream {
        message: String,
        raw_excerpt: String,
    },
}

impl From<GenerationError> for WebError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Validation(msg) => WebError::BadRequest(msg),
            GenerationError::MissingCredentials => {
                WebError::InternalServerError("Server is missing the provider API key".to_string())
            }
            GenerationError::ProviderUnavailable { attempts } => WebError::Upstream {
                message: "All configured models failed".to_string(),
                attempts,
            },
            GenerationError::Parse {
                reason,
                raw_excerpt,
            } => WebError::UnparseableUpstream {
                message: format!("Could not parse quiz from provider output: {}", reason),
                raw_excerpt,
            },
            GenerationError::Transport(_) => {
                WebError::InternalServerError("Question generation failed".to_string())
            }
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            WebError::Upstream { .. } | WebError::UnparseableUpstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };

        let body = match self {
            WebError::BadRequest(msg)
            | WebError::InternalServerError(msg)
            | WebError::NotImplemented(msg) => json!({
                "error": msg,
                "status": status.as_u16()
            }),
            WebError::Upstream { message, attempts } => {
                let tried_models: Vec<&str> = attempts.iter().map(|a| a.model.as_str()).collect();
                json!({
                    "error": message,
                    "status": status.as_u16(),
                    "tried_models": tried_models,
                    "attempts": attempts
                })
            }
            WebError::UnparseableUpstream {
                message,
                raw_excerpt,
            } => json!({
                "error": message,
                "status": status.as_u16(),
                "raw_excerpt": raw_excerpt
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T, E = WebError> = std::result::Result<T, E>;
