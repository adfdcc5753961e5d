//! Generator capability: one prompt in, one completion out.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::PromptInstance;

/// Single request/response text generation.
///
/// Implementations own their timeouts and retries; the research loop awaits
/// one call at a time.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &PromptInstance) -> Result<String, ProviderError>;
}

/// Generator backed by a [`ChatGateway`].
///
/// Each operation is sent as a system + user message pair with the
/// operation's temperature and output cap.
pub struct GatewayGenerator {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
}

impl GatewayGenerator {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self { gateway, model }
    }

    pub fn model(&self) -> &ChatModel {
        &self.model
    }

    fn request(&self, prompt: &PromptInstance) -> ChatRequest {
        let op = prompt.operation;
        let req = ChatRequest::new(
            self.model.clone(),
            prompt.to_messages(),
            Attribution::new(op.caller()),
        )
        .temperature(op.temperature())
        .max_tokens(op.max_output_tokens());

        if op.wants_json() {
            req.json()
        } else {
            req
        }
    }
}

#[async_trait]
impl Generator for GatewayGenerator {
    async fn generate(&self, prompt: &PromptInstance) -> Result<String, ProviderError> {
        let response = self.gateway.chat(self.request(prompt)).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, FinishReason, Role};
    use crate::prompts::{render_evaluate, render_expand, Operation};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingGateway {
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.seen.lock().unwrap().push(req);
            Ok(ChatResponse {
                content: "expanded".into(),
                input_tokens: 10,
                output_tokens: 2,
                latency: Duration::from_millis(5),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn sends_operation_settings() {
        let gateway = Arc::new(RecordingGateway::default());
        let generator = GatewayGenerator::new(gateway.clone(), ChatModel::ollama("llama3.2"));

        let out = generator.generate(&render_expand("neural nets")).await.unwrap();
        assert_eq!(out, "expanded");
        generator
            .generate(&render_evaluate("q?", "a"))
            .await
            .unwrap();

        let seen = gateway.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].attribution.caller, "research::expand");
        assert_eq!(seen[0].temperature, Operation::Expand.temperature());
        assert_eq!(seen[0].max_tokens, Some(Operation::Expand.max_output_tokens()));
        assert!(!seen[0].json_mode);
        assert_eq!(seen[0].messages[0].role, Role::System);
        assert_eq!(seen[0].messages[1].role, Role::User);
        assert!(seen[1].json_mode);
    }
}
