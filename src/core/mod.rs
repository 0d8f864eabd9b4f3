//! 核心编排层：错误与恢复、阶段追踪、研究编排器及其构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod stage;

pub use builder::{
    create_llm_from_config, create_orchestrator_builder, OrchestratorBuilder,
    DEFAULT_ORCHESTRATOR_PROMPT,
};
pub use error::{AgentError, ErrorKind, RecoveryAction};
pub use orchestrator::{
    render_findings, Finding, FindingOutcome, Orchestrator, OrchestratorSettings, RunSession,
    RunStart, StepBudget,
};
pub use recovery::{Attempted, RecoveryEngine, RetryLoop, RetryPolicy, StepFailure};
pub use stage::{Stage, StageError, StageInfo, StageSnapshot, StageTracker};
