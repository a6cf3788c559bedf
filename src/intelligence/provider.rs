//! Chat-completions summarizer.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. Retries and
//! timeouts are applied by the caller (`sources::bounded_call`); this adapter
//! makes exactly one HTTP request per call.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::prompts::{build_context_message, parse_summary_response};
use crate::error::{CollaboratorError, ExecutionError};
use crate::google_api::classify_status;
use crate::sources::Summarizer;
use crate::types::{ContextPayload, SummarizerConfig, SummaryBullets};

const MAX_COMPLETION_TOKENS: u32 = 800;

#[derive(Clone)]
pub struct ChatCompletionsSummarizer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsSummarizer {
    pub fn new(config: &SummarizerConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    /// Build from config, reading the API key from the configured
    /// environment variable.
    pub fn from_env(config: &SummarizerConfig) -> Result<Self, ExecutionError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ExecutionError::ConfigurationError(format!(
                    "Summarizer API key not set (expected in ${})",
                    config.api_key_env
                ))
            })?;
        Ok(Self::new(config, api_key))
    }
}

#[async_trait]
impl Summarizer for ChatCompletionsSummarizer {
    async fn summarize(
        &self,
        instructions: &str,
        payload: &ContextPayload,
    ) -> Result<SummaryBullets, CollaboratorError> {
        let context = build_context_message(payload);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: instructions,
                },
                Message {
                    role: "user",
                    content: &context,
                },
            ],
            temperature: self.temperature,
            max_tokens: MAX_COMPLETION_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::Malformed("no completion content".to_string()))?;

        parse_summary_response(&content).map_err(CollaboratorError::Malformed)
    }
}
