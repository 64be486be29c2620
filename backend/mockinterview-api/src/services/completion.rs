use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::AiSettings;
use crate::metrics::{AI_REQUESTS_TOTAL, AI_REQUEST_DURATION_SECONDS};

/// What a completion is used for. Drives metric labels and log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPurpose {
    QuestionGeneration,
    AnswerEvaluation,
    SessionReview,
}

impl CompletionPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionPurpose::QuestionGeneration => "question_generation",
            CompletionPurpose::AnswerEvaluation => "answer_evaluation",
            CompletionPurpose::SessionReview => "session_review",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: CompletionPurpose,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Ask the model for a JSON object response.
    pub json_output: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("completion service is rate limiting requests")]
    RateLimited,
    #[error("completion service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion service returned an empty payload")]
    Empty,
    #[error("completion payload could not be parsed: {0}")]
    Malformed(String),
}

impl CompletionError {
    fn label(&self) -> &'static str {
        match self {
            CompletionError::Transport(_) => "transport_error",
            CompletionError::RateLimited => "rate_limited",
            CompletionError::Status { .. } => "status_error",
            CompletionError::Empty => "empty",
            CompletionError::Malformed(_) => "malformed",
        }
    }
}

/// Text-completion collaborator. Implementations return the raw text payload
/// of the first choice.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpCompletionClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpCompletionClient {
    pub fn new(settings: &AiSettings) -> Self {
        Self {
            http_client: Client::new(),
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }

    async fn send(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = ChatCompletionRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        tracing::debug!(
            "Calling completion API: {} model={} purpose={}",
            url,
            request.model,
            request.purpose.as_str()
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::Empty)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let start = Instant::now();
        let result = self.send(&request).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        AI_REQUESTS_TOTAL
            .with_label_values(&[request.purpose.as_str(), outcome])
            .inc();
        AI_REQUEST_DURATION_SECONDS
            .with_label_values(&[request.purpose.as_str()])
            .observe(start.elapsed().as_secs_f64());

        result
    }
}

/// Extracts the JSON object from a model reply, tolerating markdown fences
/// and chatter around the object.
pub fn parse_json_payload(raw: &str) -> Result<serde_json::Value, CompletionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CompletionError::Empty);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(unfenced) {
        return Ok(value);
    }

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str(&unfenced[start..=end])
                .map_err(|e| CompletionError::Malformed(e.to_string()))
        }
        _ => Err(CompletionError::Malformed(
            "no JSON object in completion payload".to_string(),
        )),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
