//! Ollama adapter for local, single-shot generation.
//!
//! Uses the non-streaming `/generate` endpoint. System messages are sent in the
//! `system` field; every other message is flattened into `prompt`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;
use super::{read_limited_body, ChatProvider, MAX_INPUT_CHARS};

const DEFAULT_BASE_URL: &str = "http://localhost:11434/api";

/// Ollama API adapter.
#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_config(DEFAULT_BASE_URL, Duration::from_secs(300))
    }

    /// Create from `OLLAMA_BASE_URL` / `OLLAMA_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let timeout = std::env::var("OLLAMA_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));
        Self::with_config(base_url, timeout)
    }

    pub fn with_config(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/generate", self.base_url)
    }
}

#[derive(Serialize)]
struct GenerateApiRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateApiResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

fn split_messages(messages: &[Message]) -> (Option<String>, String) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let prompt: Vec<&str> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, prompt.join("\n\n"))
}

#[async_trait]
impl ChatProvider for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars = req.input_chars();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();
        let (system, prompt) = split_messages(&req.messages);

        let api_req = GenerateApiRequest {
            model: req.model.model_id(),
            prompt,
            system,
            stream: false,
            format: req.json_mode.then_some("json"),
            options: GenerateOptions {
                temperature: req.temperature,
                num_predict: req.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.generate_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let body = read_limited_body(response, "ollama").await?;

        if !status.is_success() {
            let ctx = ErrorContext::new().with_status(status.as_u16());
            let message = serde_json::from_str::<GenerateApiResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ProviderError::provider_with_context(
                "ollama",
                message,
                status.is_server_error(),
                ctx,
            ));
        }

        let parsed: GenerateApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider("ollama", format!("Invalid JSON: {e}"), false))?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider("ollama", error, false));
        }

        Ok(ChatResponse {
            content: parsed.response,
            input_tokens: parsed.prompt_eval_count.unwrap_or(0),
            output_tokens: parsed.eval_count.unwrap_or(0),
            latency: start.elapsed(),
            finish_reason: FinishReason::from(parsed.done_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_messages_separates_system_prompt() {
        let (system, prompt) = split_messages(&[
            Message::system("be brief"),
            Message::user("question one"),
            Message::user("question two"),
        ]);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(prompt, "question one\n\nquestion two");
    }

    #[test]
    fn split_messages_without_system() {
        let (system, prompt) = split_messages(&[Message::user("only")]);
        assert!(system.is_none());
        assert_eq!(prompt, "only");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let adapter =
            OllamaAdapter::with_config("http://localhost:11434/api/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(adapter.generate_url(), "http://localhost:11434/api/generate");
    }
}
