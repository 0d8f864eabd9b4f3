//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenRouter、OpenAI、自建代理均可。
//! 凭据与模型由 ProviderConfig 显式传入，客户端内部不读取环境变量。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::llm::traits::check_request;
use crate::llm::{Completion, LlmClient, LlmError, TokenUsage};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端：持有 Client、model 名与单次请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(provider: &ProviderConfig) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(provider.api_key.clone());
        if let Some(url) = &provider.base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: provider.model.clone(),
            timeout: Duration::from_secs(provider.request_timeout_secs),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| LlmError::InvalidRequest(e.to_string()))
            })
            .collect()
    }
}

/// 将 async_openai 错误归类为 LlmError
fn classify(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) => LlmError::Transport(e.to_string()),
        OpenAIError::ApiError(api) => {
            let message = api.message.clone();
            let lower = message.to_lowercase();
            let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
            if mentions(&["api key", "unauthorized", "401"]) {
                LlmError::Auth(message)
            } else if mentions(&["rate limit", "quota", "429"]) {
                LlmError::RateLimited { retry_after_ms: 0 }
            } else {
                LlmError::Api(message)
            }
        }
        other => LlmError::Api(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        check_request(messages)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(classify)?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();

        let choice = response.choices.first().ok_or(LlmError::EmptyResponse)?;
        let text = choice.message.content.clone().unwrap_or_default();

        Ok(Completion {
            text,
            model: response.model.clone(),
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
