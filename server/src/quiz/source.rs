use async_trait::async_trait;
use serde::Serialize;

use super::error::GenerationError;
use super::question::Question;

/// One batch request issued by a session.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub topic: String,
    pub count: usize,
    /// Exclusion directive built from the session ledger; empty on the first round.
    pub used_questions_text: String,
}

/// Anything that can produce normalized questions for a topic.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch_questions(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<Question>, GenerationError>;
}
