use std::sync::Arc;

use crate::provider::QuestionGenerator;
use crate::sessions::SessionManagerHandle;

#[derive(Clone)]
pub struct AppState {
    pub session_manager: SessionManagerHandle,
    pub generator: Arc<QuestionGenerator>,
}
