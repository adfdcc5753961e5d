//! Provider gateway for chat completions (OpenRouter or a local Ollama server).

pub mod error;
pub mod ollama;
pub mod openrouter;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use ollama::OllamaAdapter;
use openrouter::OpenRouterAdapter;

pub use error::{ErrorContext, ProviderError};
pub use types::*;

/// Maximum allowed response body length (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
pub(crate) const MAX_INPUT_CHARS: usize = 500_000;

/// A single upstream completion API.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Anything that can answer a chat request. The research loop only sees this.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Retrying gateway in front of one provider.
pub struct ProviderGateway {
    provider: Arc<dyn ChatProvider>,
    config: GatewayConfig,
}

#[async_trait]
impl ChatGateway for ProviderGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl ProviderGateway {
    pub fn openrouter_from_env() -> Result<Self, ProviderError> {
        let adapter = OpenRouterAdapter::from_env()?;
        Ok(Self::with_config(Arc::new(adapter), GatewayConfig::default()))
    }

    pub fn ollama_from_env() -> Result<Self, ProviderError> {
        let adapter = OllamaAdapter::from_env()?;
        Ok(Self::with_config(Arc::new(adapter), GatewayConfig::default()))
    }

    pub fn with_config(provider: Arc<dyn ChatProvider>, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.provider.chat(&req).await {
                Ok(resp) => {
                    debug!(
                        provider = self.provider.name(),
                        model = req.model.model_id(),
                        caller = req.attribution.caller,
                        input_tokens = resp.input_tokens,
                        output_tokens = resp.output_tokens,
                        latency_ms = resp.latency.as_millis() as u64,
                        "chat completed"
                    );
                    return Ok(resp);
                }
                Err(err) => {
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        provider = self.provider.name(),
                        caller = req.attribution.caller,
                        code = err.code(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying chat after error: {err}"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::provider(self.provider.name(), "unknown error", false)
        }))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}

/// Stream a response body while enforcing [`MAX_RESPONSE_LEN`].
pub(crate) async fn read_limited_body(
    mut response: reqwest::Response,
    provider: &'static str,
) -> Result<String, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
