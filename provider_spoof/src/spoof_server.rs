use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

pub const SPOOF_ADDR: &str = "127.0.0.1:8090";
pub const SPOOF_MODELS: [&str; 2] = ["gemini-2.0-flash", "gemini-1.5-flash"];
const DEFAULT_COUNT: usize = 5;

/// How the fake provider answers `generateContent` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    WellFormed,
    Fenced,
    Repeats,
    Garbage,
    Unavailable,
}

impl ResponseMode {
    pub const ALL: [ResponseMode; 5] = [
        ResponseMode::WellFormed,
        ResponseMode::Fenced,
        ResponseMode::Repeats,
        ResponseMode::Garbage,
        ResponseMode::Unavailable,
    ];

    pub fn next(&self) -> Self {
        let pos = Self::ALL.iter().position(|m| m == self).unwrap_or(0);
        Self::ALL[(pos + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> Self {
        let pos = Self::ALL.iter().position(|m| m == self).unwrap_or(0);
        Self::ALL[(pos + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ResponseMode::WellFormed => "Clean JSON object with fresh questions",
            ResponseMode::Fenced => "Markdown fenced array with loose keys",
            ResponseMode::Repeats => "Same fixed questions every time",
            ResponseMode::Garbage => "Prose with no JSON",
            ResponseMode::Unavailable => "HTTP 503 for all but the last model",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseMode::WellFormed => "well_formed",
            ResponseMode::Fenced => "fenced",
            ResponseMode::Repeats => "repeats",
            ResponseMode::Garbage => "garbage",
            ResponseMode::Unavailable => "unavailable",
        };
        write!(f, "{}", name)
    }
}

pub type SharedMode = Arc<RwLock<ResponseMode>>;

#[derive(Debug, Clone)]
pub enum SpoofLog {
    Request {
        model: String,
        topic: String,
        count: usize,
        mode: ResponseMode,
    },
    ModelsListed,
    ModeChanged(ResponseMode),
    Internal(String),
}

#[derive(Clone)]
struct SpoofState {
    mode: SharedMode,
    log_tx: mpsc::Sender<SpoofLog>,
    batch_counter: Arc<AtomicUsize>,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateContentBody {
    #[serde(default)]
    contents: Vec<BodyContent>,
}

#[derive(Deserialize, Debug)]
struct BodyContent {
    #[serde(default)]
    parts: Vec<BodyPart>,
}

#[derive(Deserialize, Debug)]
struct BodyPart {
    #[serde(default)]
    text: String,
}

/// Pulls the requested count and quoted topic out of a quiz prompt.
pub fn prompt_hints(prompt: &str) -> (usize, String) {
    let count = prompt
        .split_whitespace()
        .skip_while(|word| *word != "Generate")
        .nth(1)
        .and_then(|word| word.parse::<usize>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_COUNT);
    let topic = prompt
        .split('"')
        .nth(1)
        .map(str::to_string)
        .unwrap_or_else(|| "general knowledge".to_string());
    (count, topic)
}

fn question_items(topic: &str, count: usize, batch: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "question": format!("[{}] Spoofed question {} of batch {}?", topic, i + 1, batch),
                "options": ["Alpha", "Beta", "Gamma", "Delta"],
                "answer_index": i % 4,
                "explanation": format!("Option {} is right by construction.", i % 4 + 1)
            })
        })
        .collect()
}

/// Text the fake model "writes" for one request.
pub fn model_text(mode: ResponseMode, topic: &str, count: usize, batch: usize) -> Option<String> {
    match mode {
        ResponseMode::WellFormed => {
            Some(json!({ "questions": question_items(topic, count, batch) }).to_string())
        }
        ResponseMode::Fenced => {
            let items: Vec<String> = (0..count)
                .map(|i| {
                    let letter = ['A', 'B', 'C', 'D'][i % 4];
                    format!(
                        r#"{{"prompt": "[{}] Fenced question {} ({})?", "choices": [{{"text": "Alpha"}}, {{"text": "Beta"}}, {{"text": "Gamma"}}, {{"text": "Delta"}}], “answer”: “{}”,}}"#,
                        topic,
                        i + 1,
                        Uuid::new_v4().simple(),
                        letter
                    )
                })
                .collect();
            Some(format!(
                "Sure! Here is your quiz:\n```json\n[\n{},\n]\n```\nGood luck!",
                items.join(",\n")
            ))
        }
        ResponseMode::Repeats => Some(json!({ "questions": question_items(topic, count, 0) }).to_string()),
        ResponseMode::Garbage => Some(format!(
            "I would love to write a quiz about {} but I am feeling philosophical today.",
            topic
        )),
        ResponseMode::Unavailable => None,
    }
}

fn upstream_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
                "status": "UNAVAILABLE"
            }
        })),
    )
        .into_response()
}

async fn generate_content_handler(
    State(state): State<SpoofState>,
    Path(model_call): Path<String>,
    Json(body): Json<GenerateContentBody>,
) -> Response {
    let Some((model, method)) = model_call.split_once(':') else {
        return upstream_error(StatusCode::NOT_FOUND, "expected {model}:generateContent");
    };
    if method != "generateContent" {
        return upstream_error(StatusCode::NOT_FOUND, "unknown method");
    }

    let prompt: String = body
        .contents
        .iter()
        .flat_map(|content| content.parts.iter())
        .map(|part| part.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let (count, topic) = prompt_hints(&prompt);
    let mode = match *state.mode.read().await {
        ResponseMode::Unavailable if SPOOF_MODELS.last() == Some(&model) => ResponseMode::WellFormed,
        mode => mode,
    };
    let batch = state.batch_counter.fetch_add(1, Ordering::Relaxed) + 1;

    let _ = state
        .log_tx
        .send(SpoofLog::Request {
            model: model.to_string(),
            topic: topic.clone(),
            count,
            mode,
        })
        .await;

    match model_text(mode, &topic, count, batch) {
        Some(text) => Json(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }],
            "modelVersion": model,
            "createTime": Utc::now().to_rfc3339()
        }))
        .into_response(),
        None => upstream_error(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("The model {} is overloaded. Please try again later.", model),
        ),
    }
}

async fn list_models_handler(State(state): State<SpoofState>) -> Json<Value> {
    let _ = state.log_tx.send(SpoofLog::ModelsListed).await;
    let mut models: Vec<Value> = SPOOF_MODELS
        .iter()
        .map(|name| {
            json!({
                "name": format!("models/{}", name),
                "displayName": format!("Spoofed {}", name),
                "supportedGenerationMethods": ["generateContent", "countTokens"]
            })
        })
        .collect();
    models.push(json!({
        "name": "models/embedding-001",
        "displayName": "Spoofed embeddings",
        "supportedGenerationMethods": ["embedContent"]
    }));
    Json(json!({ "models": models }))
}

pub fn create_router(mode: SharedMode, log_tx: mpsc::Sender<SpoofLog>) -> Router {
    let state = SpoofState {
        mode,
        log_tx,
        batch_counter: Arc::new(AtomicUsize::new(0)),
    };
    Router::new()
        .route("/v1beta/models", get(list_models_handler))
        .route("/v1beta/models/{model_call}", post(generate_content_handler))
        .with_state(state)
}

pub async fn run_server(
    mode: SharedMode,
    log_tx: mpsc::Sender<SpoofLog>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(SPOOF_ADDR).await?;
    let _ = log_tx
        .send(SpoofLog::Internal(format!(
            "Spoof provider listening on http://{}/v1beta",
            SPOOF_ADDR
        )))
        .await;
    axum::serve(listener, create_router(mode, log_tx)).await?;
    Ok(())
}
