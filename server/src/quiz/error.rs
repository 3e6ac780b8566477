use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a provider response could not be turned into question items.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON payload found in provider output")]
    NoJson,
    #[error("provider output contained malformed JSON: {0}")]
    Malformed(String),
    #[error("provider JSON was neither an array nor an object with a `questions` array")]
    UnexpectedShape,
}

/// One failed upstream model call, kept for diagnostics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelAttempt {
    pub model: String,
    pub error: String,
}

/// Failures while asking the provider for a batch of questions.
#[derive(Debug, Error, Clone)]
pub enum GenerationError {
    #[error("invalid generation request: {0}")]
    Validation(String),
    #[error("provider API key is not configured")]
    MissingCredentials,
    #[error("no provider model accepted the request ({} attempts)", .attempts.len())]
    ProviderUnavailable { attempts: Vec<ModelAttempt> },
    #[error("provider output could not be used: {reason}")]
    Parse { reason: String, raw_excerpt: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl GenerationError {
    pub fn tried_models(&self) -> Vec<String> {
        match self {
            GenerationError::ProviderUnavailable { attempts } => {
                attempts.iter().map(|a| a.model.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Errors surfaced by quiz session operations.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("every generated question had already been used (soft: {soft})")]
    DuplicateExhaustion { soft: bool },
    #[error("a question generation request is already in flight")]
    Busy,
    #[error("operation not valid right now: {0}")]
    InvalidState(&'static str),
    #[error("generation result belongs to a superseded request")]
    Stale,
}

impl QuizError {
    /// Stable identifier sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            QuizError::Validation(_) => "validation",
            QuizError::Generation(err) => match err {
                GenerationError::Validation(_) => "validation",
                GenerationError::MissingCredentials | GenerationError::Transport(_) => "transport",
                GenerationError::ProviderUnavailable { .. } => "provider_unavailable",
                GenerationError::Parse { .. } => "parse",
            },
            QuizError::DuplicateExhaustion { .. } => "duplicate_exhaustion",
            QuizError::Busy => "busy",
            QuizError::InvalidState(_) | QuizError::Stale => "invalid_state",
        }
    }

    pub fn is_soft(&self) -> bool {
        matches!(self, QuizError::DuplicateExhaustion { soft: true })
    }

    /// Message safe to show an end user; never includes raw provider output.
    pub fn user_message(&self) -> String {
        match self {
            QuizError::Validation(msg) => msg.clone(),
            QuizError::Generation(err) => match err {
                GenerationError::Validation(msg) => msg.clone(),
                GenerationError::MissingCredentials => {
                    "The quiz server is not configured to generate questions.".to_string()
                }
                GenerationError::ProviderUnavailable { attempts } => format!(
                    "The question generator is unavailable right now (tried {} model{}).",
                    attempts.len(),
                    if attempts.len() == 1 { "" } else { "s" }
                ),
                GenerationError::Parse { .. } => {
                    "The question generator returned an unreadable response. Please try again."
                        .to_string()
                }
                GenerationError::Transport(_) => {
                    "Could not reach the question generator. Please try again.".to_string()
                }
            },
            QuizError::DuplicateExhaustion { soft: true } => {
                "No new questions were generated; every suggestion was a repeat.".to_string()
            }
            QuizError::DuplicateExhaustion { soft: false } => {
                "Could not generate any usable questions for this topic.".to_string()
            }
            QuizError::Busy => "Questions are still being generated. Please wait.".to_string(),
            QuizError::InvalidState(msg) => msg.to_string(),
            QuizError::Stale => "That request was superseded.".to_string(),
        }
    }
}
