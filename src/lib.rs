//! Delve - 多 Agent 深度研究工作流
//!
//! 模块划分：
//! - **agent**: 四个固定角色（Planner / Researcher / Analyst / Synthesizer）与 RoleAgent
//! - **archive**: 已完成报告的 SQLite 归档
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、错误与有界重试、阶段追踪
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / OpenRouter / Mock）
//! - **memory**: 单次 Run 的会话线程
//! - **observability**: 日志初始化与 token 用量记账
//! - **tools**: 结构化工具（Plan / FetchWebResults / SummarizeOrQuery / GenerateReport）与执行器
//! - **workflow**: 可持久化、可恢复的 plan -> research -> synthesize 工作流

pub mod agent;
pub mod archive;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use crate::core::{Orchestrator, OrchestratorBuilder, Stage, StageTracker};
pub use crate::workflow::{ResearchWorkflow, RunOutcome, RunStatusView};
