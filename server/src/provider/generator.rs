use async_trait::async_trait;
use std::sync::Arc;

use super::client::{ModelInfo, TextGenerator};
use super::error::ProviderError;
use super::prompt::build_prompt;
use crate::quiz::normalize::normalize_items;
use crate::quiz::session::MAX_QUESTION_COUNT;
use crate::quiz::{GenerationError, GenerationRequest, ModelAttempt, Question, QuestionSource};

pub const MIN_TOPIC_CHARS: usize = 3;
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Turns a topic into normalized questions by asking each configured model
/// in order until one answers.
pub struct QuestionGenerator {
    client: Arc<dyn TextGenerator>,
    models: Vec<String>,
}

impl QuestionGenerator {
    pub fn new(client: Arc<dyn TextGenerator>, models: Vec<String>) -> Self {
        Self { client, models }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        self.client.list_models().await
    }

    #[tracing::instrument(skip(self, request), fields(
        quiz.topic = %request.topic,
        quiz.count = request.count,
        quiz.excluded = !request.used_questions_text.is_empty()
    ))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Vec<Question>, GenerationError> {
        validate_request(request)?;
        if !self.client.has_credentials() {
            tracing::error!("Provider API key missing. Refusing to generate");
            return Err(GenerationError::MissingCredentials);
        }

        let prompt = build_prompt(request);
        let mut attempts = Vec::new();

        for model in &self.models {
            let text = match self.client.generate_text(model, &prompt).await {
                Ok(text) => text,
                Err(ProviderError::MissingCredentials) => {
                    return Err(GenerationError::MissingCredentials);
                }
                Err(e) => {
                    tracing::warn!(provider.model = %model, error = %e, "Model attempt failed");
                    attempts.push(ModelAttempt {
                        model: model.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            return match normalize_items(&text, request.count) {
                Ok(questions) if !questions.is_empty() => {
                    tracing::info!(
                        provider.model = %model,
                        questions.count = questions.len(),
                        "Generated questions"
                    );
                    Ok(questions)
                }
                Ok(_) => Err(parse_failure("no valid questions in provider output", &text)),
                Err(e) => Err(parse_failure(&e.to_string(), &text)),
            };
        }

        tracing::error!(
            provider.attempts = attempts.len(),
            "Every configured model failed"
        );
        Err(GenerationError::ProviderUnavailable { attempts })
    }
}

#[async_trait]
impl QuestionSource for QuestionGenerator {
    async fn fetch_questions(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<Question>, GenerationError> {
        self.generate(request).await
    }
}

fn parse_failure(reason: &str, raw_text: &str) -> GenerationError {
    tracing::warn!(reason = %reason, raw.length = raw_text.len(), "Provider output unusable");
    GenerationError::Parse {
        reason: reason.to_string(),
        raw_excerpt: excerpt(raw_text),
    }
}

pub fn validate_request(request: &GenerationRequest) -> Result<(), GenerationError> {
    if request.topic.trim().chars().count() < MIN_TOPIC_CHARS {
        return Err(GenerationError::Validation(format!(
            "Topic must be at least {} characters.",
            MIN_TOPIC_CHARS
        )));
    }
    if !(1..=MAX_QUESTION_COUNT).contains(&request.count) {
        return Err(GenerationError::Validation(format!(
            "Question count must be between 1 and {}.",
            MAX_QUESTION_COUNT
        )));
    }
    Ok(())
}

pub fn excerpt(text: &str) -> String {
    text.chars().take(MAX_EXCERPT_CHARS).collect()
}
