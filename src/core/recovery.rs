//! 错误恢复与有界重试
//!
//! RecoveryEngine 将 AgentError 映射为 Retry / Abort；RetryLoop 是显式的有界重试循环，
//! 携带尝试次数与最后一次错误，结果以 Attempted / StepFailure 的类型化形式返回。

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：ToolExecution / Provider 可重试，其余立即终止
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ToolExecution { .. } | AgentError::Provider(_) => RecoveryAction::Retry,
            AgentError::InvalidToolInput { .. }
            | AgentError::Cancelled
            | AgentError::StepBudgetExhausted { .. } => RecoveryAction::Abort,
        }
    }
}

/// 重试预算：max_retries 次重试，即最多 max_retries + 1 次尝试
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    engine: RecoveryEngine,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            engine: RecoveryEngine::new(),
        }
    }

    /// 单步最多的尝试次数
    pub fn max_attempts(&self) -> usize {
        self.max_retries as usize + 1
    }

    /// 为一个步骤开启重试循环；label 仅用于日志
    pub fn start(&self, label: impl Into<String>) -> RetryLoop<'_> {
        RetryLoop {
            policy: self,
            label: label.into(),
            attempts: 0,
        }
    }
}

/// 成功结果与所用尝试次数
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// 重试耗尽或不可重试时的最终失败：最后一次错误 + 尝试次数
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct StepFailure {
    pub error: AgentError,
    pub attempts: u32,
}

/// 单步的重试状态
///
/// 调用方写显式循环：每次失败调用 `record_failure`，返回 Err 即停止。
pub struct RetryLoop<'a> {
    policy: &'a RetryPolicy,
    label: String,
    attempts: u32,
}

impl RetryLoop<'_> {
    /// 本次尝试成功
    pub fn succeeded<T>(self, value: T) -> Attempted<T> {
        Attempted {
            value,
            attempts: self.attempts + 1,
        }
    }

    /// 记录一次失败；可继续重试时返回 Ok(())
    pub fn record_failure(
        &mut self,
        error: AgentError,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        self.attempts += 1;

        if self.policy.engine.handle(&error) == RecoveryAction::Abort {
            return Err(StepFailure {
                error,
                attempts: self.attempts,
            });
        }
        if self.attempts > self.policy.max_retries {
            tracing::error!(
                step = %self.label,
                attempts = self.attempts,
                error = %error,
                "retry budget exhausted"
            );
            return Err(StepFailure {
                error,
                attempts: self.attempts,
            });
        }
        if cancel.is_cancelled() {
            return Err(StepFailure {
                error: AgentError::Cancelled,
                attempts: self.attempts,
            });
        }

        tracing::warn!(
            step = %self.label,
            attempt = self.attempts,
            max_retries = self.policy.max_retries,
            error = %error,
            "step failed, retrying with same input"
        );
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    fn tool_err() -> AgentError {
        AgentError::ToolExecution {
            tool: "generate_report".into(),
            reason: "empty".into(),
        }
    }

    #[test]
    fn test_recovery_retryable_errors() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&tool_err()), RecoveryAction::Retry);
        let err = AgentError::Provider(LlmError::RateLimited { retry_after_ms: 1000 });
        assert_eq!(engine.handle(&err), RecoveryAction::Retry);
    }

    #[test]
    fn test_recovery_aborts_on_input_and_cancel() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvalidToolInput {
            tool: "plan_query".into(),
            reason: "topic is empty".into(),
        };
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
        assert_eq!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort);
        assert_eq!(
            engine.handle(&AgentError::StepBudgetExhausted { max_steps: 3 }),
            RecoveryAction::Abort
        );
    }

    #[test]
    fn test_budget_of_two_allows_three_attempts() {
        let policy = RetryPolicy::new(2);
        let cancel = CancellationToken::new();
        let mut retry = policy.start("synthesize");
        assert!(retry.record_failure(tool_err(), &cancel).is_ok());
        assert!(retry.record_failure(tool_err(), &cancel).is_ok());
        let failure = retry.record_failure(tool_err(), &cancel).unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, tool_err());
    }

    #[test]
    fn test_success_counts_attempts() {
        let policy = RetryPolicy::new(5);
        let cancel = CancellationToken::new();
        let mut retry = policy.start("plan");
        retry.record_failure(tool_err(), &cancel).unwrap();
        let done = retry.succeeded("ok");
        assert_eq!(done.attempts, 2);
        assert_eq!(done.value, "ok");
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let policy = RetryPolicy::new(5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut retry = policy.start("research");
        let failure = retry.record_failure(tool_err(), &cancel).unwrap_err();
        assert_eq!(failure.error, AgentError::Cancelled);
    }
}
