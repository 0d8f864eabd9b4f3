//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按最后一条 User 消息中的关键字匹配脚本规则；同一规则可给出一串回复（最后一条重复），
//! 也可注入 Provider 错误。记录每次调用的 prompt，便于断言「某步骤没有再次调用模型」。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::traits::check_request;
use crate::llm::{Completion, LlmClient, LlmError, TokenUsage};
use crate::memory::{Message, Role};

/// 脚本中的单条回复
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(LlmError),
}

impl From<&str> for MockReply {
    fn from(s: &str) -> Self {
        MockReply::Text(s.to_string())
    }
}

struct Rule {
    needle: String,
    replies: Vec<MockReply>,
    cursor: AtomicUsize,
}

impl Rule {
    fn next(&self) -> MockReply {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let last = self.replies.len().saturating_sub(1);
        self.replies[i.min(last)].clone()
    }
}

/// Mock 客户端：规则按注册顺序匹配，未命中时返回默认回复
pub struct MockLlmClient {
    rules: Vec<Rule>,
    default_reply: String,
    latency: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: "Mock reply.".to_string(),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 最后一条 User 消息包含 needle 时固定回复 text
    pub fn on(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.on_sequence(needle, vec![MockReply::Text(text.into())])
    }

    /// 命中时依次给出 replies，耗尽后重复最后一条
    pub fn on_sequence(mut self, needle: impl Into<String>, replies: Vec<MockReply>) -> Self {
        if !replies.is_empty() {
            self.rules.push(Rule {
                needle: needle.into(),
                replies,
                cursor: AtomicUsize::new(0),
            });
        }
        self
    }

    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_reply = text.into();
        self
    }

    /// 每次调用先等待 latency，用于在调用进行中触发取消等场景
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 总调用次数
    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// prompt 中包含 needle 的调用次数
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.lock_calls().iter().filter(|p| p.contains(needle)).count()
    }

    /// 每次调用的最后一条 User 消息
    pub fn prompts(&self) -> Vec<String> {
        self.lock_calls().clone()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        check_request(messages)?;

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.lock_calls().push(last_user.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|r| last_user.contains(&r.needle))
            .map(Rule::next)
            .unwrap_or_else(|| MockReply::Text(self.default_reply.clone()));

        match reply {
            MockReply::Text(text) => {
                let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
                Ok(Completion {
                    usage: TokenUsage::new((prompt_chars / 4) as u64, (text.len() / 4) as u64),
                    model: self.model_name().to_string(),
                    text,
                })
            }
            MockReply::Fail(err) => Err(err),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_sequence_repeats_last() {
        let mock = MockLlmClient::new().on_sequence(
            "plan",
            vec![
                MockReply::Fail(LlmError::Transport("down".into())),
                MockReply::from("[\"a\"]"),
            ],
        );
        let msgs = [Message::user("please plan")];
        assert!(mock.complete(&msgs).await.is_err());
        assert_eq!(mock.complete(&msgs).await.unwrap().text, "[\"a\"]");
        assert_eq!(mock.complete(&msgs).await.unwrap().text, "[\"a\"]");
        assert_eq!(mock.calls_matching("plan"), 3);
    }

    #[tokio::test]
    async fn test_default_reply_when_no_rule_matches() {
        let mock = MockLlmClient::new().with_default("fallback text");
        let out = mock.complete(&[Message::user("anything")]).await.unwrap();
        assert_eq!(out.text, "fallback text");
        assert_eq!(out.model, "mock");
    }
}
