use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::fmt;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_FALLBACK_VAR: &str = "GEMINI_API_KEY";
const MAX_RATE_LIMIT_WINDOW_SECS: u64 = 24 * 60 * 60;

fn default_models() -> Vec<String> {
    vec!["gemini-2.0-flash".to_string(), "gemini-1.5-flash".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(deserialize_with = "deserialize_string_or_list")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_string_or_list")]
    pub models: Vec<String>,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl ProviderConfig {
    /// The configured key, ignoring blank values.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            models: default_models(),
            request_timeout_secs: 30,
            temperature: 0.7,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl RateLimitConfig {
    /// Interval at which one request token is replenished. A full window per
    /// token keeps any half-open window at `max_requests` or fewer.
    pub fn replenish_period_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000).max(1)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 12,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QuizConfig {
    pub question_seconds: u32,
    pub feedback_delay_ms: u64,
    pub top_up_shortfall: bool,
    pub session_idle_timeout_secs: u64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            question_seconds: 30,
            feedback_delay_ms: 1500,
            top_up_shortfall: true,
            session_idle_timeout_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub quiz: QuizConfig,
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.models.is_empty() {
            return Err(ConfigError::InvalidValue(
                "provider.models must name at least one model".to_string(),
            ));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "provider.base_url must not be empty".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.window_secs and rate_limit.max_requests must be positive".to_string(),
            ));
        }
        if self.rate_limit.window_secs > MAX_RATE_LIMIT_WINDOW_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "rate_limit.window_secs must be at most {}",
                MAX_RATE_LIMIT_WINDOW_SECS
            )));
        }
        if self.quiz.question_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "quiz.question_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_settings() -> AppResult<AppSettings> {
    let settings = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("QUIZGEN")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .with_list_parse_key("provider.models")
                .try_parsing(true),
        )
        .build()?;

    let mut app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    if app_settings.provider.api_key().is_none()
        && let Ok(key) = std::env::var(API_KEY_FALLBACK_VAR)
    {
        app_settings.provider.api_key = Some(key);
    }

    app_settings.validate()?;
    Ok(app_settings)
}

fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::String(s) => s.split(',').map(|item| item.trim().to_string()).collect(),
        Value::Array(arr) => {
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                if let Value::String(s) = item {
                    items.push(s.trim().to_string());
                } else {
                    return Err(D::Error::custom("Array must contain only strings"));
                }
            }
            items
        }
        Value::Null => Vec::new(),
        _ => return Err(D::Error::custom("Expected string or array of strings")),
    };

    Ok(items.into_iter().filter(|item: &String| !item.is_empty()).collect())
}
