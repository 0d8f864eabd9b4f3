//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / OpenRouter / Mock）实现 LlmClient::complete：给定有序消息，返回生成文本。
//! 本层不重试、不解析；token 用量随 Completion 返回，由调用方的 usage hook 记账。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, Role};

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }
}

/// 一次完成调用的结果：文本 + 实际模型名 + 用量
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Provider 侧错误（传输 / 鉴权 / 配额 / 超时）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider API error: {0}")]
    Api(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("provider returned no choices")]
    EmptyResponse,
}

/// LLM 客户端 trait：共享、无状态，可被同一 Run 内的并行子任务并发调用
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError>;

    /// 模型标识（用于 usage 记账与日志）
    fn model_name(&self) -> &str;
}

/// 调用前的请求校验：非空且至少一条 User 消息
pub fn check_request(messages: &[Message]) -> Result<(), LlmError> {
    if messages.is_empty() {
        return Err(LlmError::InvalidRequest("empty message list".to_string()));
    }
    if !messages.iter().any(|m| m.role == Role::User) {
        return Err(LlmError::InvalidRequest("no user turn".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_request_requires_user_turn() {
        assert!(check_request(&[]).is_err());
        assert!(check_request(&[Message::system("s")]).is_err());
        assert!(check_request(&[Message::system("s"), Message::user("u")]).is_ok());
    }

    #[test]
    fn test_usage_total() {
        let u = TokenUsage::new(12, 30);
        assert_eq!(u.total_tokens, 42);
    }
}
