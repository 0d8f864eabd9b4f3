//! 工作流类型定义
//!
//! RunRecord 是一次研究 Run 的持久化检查点：已完成步骤的结果按顺序记录，
//! 恢复时从第一个未记录的步骤继续。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{ErrorKind, Finding, RunSession, Stage, StepFailure};
use crate::workflow::store::StoreError;

pub type RunId = String;

/// Run 状态；离开 Running 后不再变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// 工作流步骤（固定顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    Plan,
    Research,
    Synthesize,
}

impl StepName {
    pub const ALL: [StepName; 3] = [StepName::Plan, StepName::Research, StepName::Synthesize];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Plan => "plan",
            StepName::Research => "research",
            StepName::Synthesize => "synthesize",
        }
    }

    /// 执行该步骤时展示的阶段
    pub fn stage(self) -> Stage {
        match self {
            StepName::Plan => Stage::Planning,
            StepName::Research => Stage::Researching,
            StepName::Synthesize => Stage::Finalizing,
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已完成步骤的持久化结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum StepOutput {
    Plan { subtasks: Vec<String> },
    Research { findings: Vec<Finding> },
    Synthesize { report: String },
}

impl StepOutput {
    pub fn step(&self) -> StepName {
        match self {
            StepOutput::Plan { .. } => StepName::Plan,
            StepOutput::Research { .. } => StepName::Research,
            StepOutput::Synthesize { .. } => StepName::Synthesize,
        }
    }
}

/// 失败 Run 的诊断信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub reason: String,
    pub failed_step: StepName,
    pub attempts: u32,
    /// 失败前最后一个完成的阶段；计划阶段即失败时为 None
    pub last_completed_stage: Stage,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} during {} after {} attempt(s): {}",
            self.kind, self.failed_step, self.attempts, self.reason
        )
    }
}

/// 一次 Run 的持久化检查点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub topic: String,
    pub status: RunStatus,
    /// 已完成步骤，按 StepName 顺序
    pub steps: Vec<StepOutput>,
    /// 线程与已用步数；plan 完成后才存在
    pub session: Option<RunSession>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(topic: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            topic: topic.to_string(),
            status: RunStatus::Running,
            steps: Vec::new(),
            session: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 第一个未记录的步骤；全部完成时为 None
    pub fn next_step(&self) -> Option<StepName> {
        StepName::ALL.get(self.steps.len()).copied()
    }

    pub fn output(&self, step: StepName) -> Option<&StepOutput> {
        self.steps.get(step.index())
    }

    pub fn subtasks(&self) -> Option<&[String]> {
        match self.output(StepName::Plan)? {
            StepOutput::Plan { subtasks } => Some(subtasks),
            _ => None,
        }
    }

    pub fn findings(&self) -> Option<&[Finding]> {
        match self.output(StepName::Research)? {
            StepOutput::Research { findings } => Some(findings),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&str> {
        match self.output(StepName::Synthesize)? {
            StepOutput::Synthesize { report } => Some(report),
            _ => None,
        }
    }

    /// 最后一个已完成步骤对应的阶段
    pub fn last_completed_stage(&self) -> Stage {
        self.steps
            .last()
            .map(|o| o.step().stage())
            .unwrap_or(Stage::None)
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// 追加步骤结果；步骤必须恰好是下一个
    pub(crate) fn record(&mut self, output: StepOutput) {
        debug_assert_eq!(Some(output.step()), self.next_step());
        self.steps.push(output);
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_failed(&mut self, step: StepName, failure: &StepFailure) -> RunFailure {
        let info = RunFailure {
            kind: failure.error.kind(),
            reason: failure.error.to_string(),
            failed_step: step,
            attempts: failure.attempts,
            last_completed_stage: self.last_completed_stage(),
        };
        self.fail_with(info.clone());
        info
    }

    pub(crate) fn fail_with(&mut self, failure: RunFailure) {
        self.status = RunStatus::Failed;
        self.failure = Some(failure);
        self.updated_at = Utc::now();
    }
}

/// Run 的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { report: String },
    Failed(RunFailure),
}

/// 对外的 Run 状态视图
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub run_id: RunId,
    pub status: RunStatus,
    pub stage: Stage,
    pub stage_name: Option<&'static str>,
    pub sub_steps: Vec<&'static str>,
    pub completed_steps: Vec<StepName>,
    pub report: Option<String>,
    pub failure: Option<RunFailure>,
}

/// 工作流错误类型
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("topic cannot be empty")]
    InvalidTopic,

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// Run 仍为 running 但当前进程没有驱动它（需要先 resume）
    #[error("run {0} is not being driven by this process")]
    NotActive(RunId),

    #[error("step {step} cannot run before {expected}")]
    OutOfOrder { step: StepName, expected: StepName },

    #[error("run {0} is already finished")]
    AlreadyFinished(RunId),

    #[error("checkpoint for run {run_id} is missing {missing}")]
    Corrupt { run_id: RunId, missing: &'static str },

    #[error("step failed: {0}")]
    Step(#[from] StepFailure),

    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),
}
