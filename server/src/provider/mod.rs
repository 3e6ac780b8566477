pub mod client;
pub mod error;
pub mod generator;
pub mod prompt;

pub use client::{GeminiClient, ModelInfo, TextGenerator};
pub use error::ProviderError;
pub use generator::QuestionGenerator;
