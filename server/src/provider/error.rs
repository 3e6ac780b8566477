use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider API key is not configured")]
    MissingCredentials,
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON deserialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Model {model} returned HTTP {status}: {message}")]
    Status {
        model: String,
        status: u16,
        message: String,
    },
    #[error("Model {0} returned no text")]
    EmptyResponse(String),
    #[error("The configured provider cannot list models")]
    Unsupported,
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
