//! Agent 错误类型与错误分类
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Retry / Abort。
//! ErrorKind 是可序列化的判别值，写入失败 Run 的 checkpoint。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 调用方/程序错误：输入未通过 schema 校验，不会到达模型，不重试
    #[error("invalid input for tool {tool}: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    /// 模型输出未通过校验，按预算重试
    #[error("tool {tool} failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// Provider 传输 / 鉴权 / 配额错误，按预算重试
    #[error("provider error: {0}")]
    Provider(#[from] LlmError),

    /// 在步骤边界观察到外部取消
    #[error("run cancelled")]
    Cancelled,

    /// 单个 Run 的角色/工具调用次数超出上限
    #[error("step budget exhausted ({max_steps} steps)")]
    StepBudgetExhausted { max_steps: usize },
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::InvalidToolInput { .. } => ErrorKind::InvalidToolInput,
            AgentError::ToolExecution { .. } => ErrorKind::ToolExecutionError,
            AgentError::Provider(_) => ErrorKind::ProviderError,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::StepBudgetExhausted { .. } => ErrorKind::StepBudgetExhausted,
        }
    }
}

/// 错误种类（失败 Run / 降级 Finding 中记录）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidToolInput,
    ToolExecutionError,
    ProviderError,
    Cancelled,
    StepBudgetExhausted,
    /// checkpoint 存储失败（仅工作流层产生）
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidToolInput => "InvalidToolInput",
            ErrorKind::ToolExecutionError => "ToolExecutionError",
            ErrorKind::ProviderError => "ProviderError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::StepBudgetExhausted => "StepBudgetExhausted",
            ErrorKind::Storage => "Storage",
        };
        f.write_str(s)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以相同输入重试
    Retry,
    /// 终止当前步骤，向上抛出
    Abort,
}
