//! 编排器构建器：统一的初始化逻辑
//!
//! 二进制入口与测试共用：按配置创建 LLM、注册工具、拼接带工具 Schema 的 system prompt。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::RoleAgent;
use crate::config::{AppConfig, ConfigError, ProviderConfig};
use crate::core::{Orchestrator, OrchestratorSettings};
use crate::llm::{create_openrouter_client, LlmClient};
use crate::observability::{UsageHook, UsageLedger};
use crate::tools::{
    FetchWebResultsTool, GenerateReportTool, PlanTool, SummarizeTool, ToolExecutor, ToolRegistry,
};

pub const DEFAULT_ORCHESTRATOR_PROMPT: &str = "You are a Deep Research Orchestrator Agent. Your role is to coordinate between different specialized agents to conduct thorough research.

You have access to the following specialized agents:
1. PLANNER: Breaks down research topics into subtasks
2. RESEARCHER: Conducts in-depth research on specific topics
3. ANALYST: Analyzes research findings
4. SYNTHESIZER: Combines all findings into a final report

Your task is to:
1. Understand the research query
2. Delegate tasks to the appropriate agents
3. Ensure smooth handoff between agents
4. Maintain context throughout the workflow";

/// 根据配置创建 LLM 客户端；缺少 API Key 时直接报错
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, ConfigError> {
    let provider = ProviderConfig::from_config(&cfg.llm)?;
    tracing::info!(model = %provider.model, "using OpenRouter-compatible LLM");
    Ok(Arc::new(create_openrouter_client(&provider)))
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    system_prompt: String,
    usage: Arc<dyn UsageHook>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            system_prompt: DEFAULT_ORCHESTRATOR_PROMPT.to_string(),
            usage: Arc::new(UsageLedger::new()),
        }
    }

    /// 设置编排器前言
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 从文件加载编排器前言，找不到时保留默认值
    pub fn with_system_prompt_from_file(mut self) -> Self {
        if let Some(prompt) = [
            "config/prompts/orchestrator.md",
            "../config/prompts/orchestrator.md",
        ]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        {
            self.system_prompt = prompt;
        }
        self
    }

    /// 设置用量回调（默认是进程内 UsageLedger）
    pub fn with_usage_hook(mut self, usage: Arc<dyn UsageHook>) -> Self {
        self.usage = usage;
        self
    }

    /// 注册全部研究工具
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(PlanTool::new(self.config.agent.max_subtasks)));
        tools.register(Arc::new(FetchWebResultsTool));
        tools.register(Arc::new(SummarizeTool));
        tools.register(Arc::new(GenerateReportTool));
        tools
    }

    /// 完整 system prompt（前言 + 工具 schema）
    pub fn build_full_system_prompt(&self, tool_registry: &ToolRegistry) -> String {
        let tool_schema = tool_registry.to_schema_json();
        if tool_schema == "[]" {
            self.system_prompt.clone()
        } else {
            format!(
                "{}\n\n## Available tools\n```json\n{}\n```",
                self.system_prompt, tool_schema
            )
        }
    }

    /// 用给定 LLM 构建编排器
    pub fn build(&self, llm: Arc<dyn LlmClient>) -> Orchestrator {
        let tools = self.build_tool_registry();
        let system_prompt = self.build_full_system_prompt(&tools);
        let agent = RoleAgent::new(llm, self.usage.clone());
        Orchestrator::new(
            ToolExecutor::new(agent),
            tools,
            system_prompt,
            OrchestratorSettings::from(&self.config.agent),
        )
    }

    /// 按配置创建 LLM 后构建
    pub fn build_from_config(&self) -> Result<Orchestrator, ConfigError> {
        let llm = create_llm_from_config(&self.config)?;
        Ok(self.build(llm))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// 便捷函数：加载配置并创建构建器
pub fn create_orchestrator_builder(
    config_path: Option<PathBuf>,
) -> Result<OrchestratorBuilder, ConfigError> {
    let config = crate::config::load_config(config_path)?;
    Ok(OrchestratorBuilder::new(config).with_system_prompt_from_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_registry_has_all_research_tools() {
        let builder = OrchestratorBuilder::new(AppConfig::default());
        let names = builder.build_tool_registry().tool_names();
        assert_eq!(
            names,
            vec![
                "fetch_web_results",
                "generate_report",
                "plan_query",
                "summarize_or_query"
            ]
        );
    }

    #[test]
    fn test_system_prompt_embeds_tool_schema() {
        let builder = OrchestratorBuilder::new(AppConfig::default());
        let prompt = builder.build_full_system_prompt(&builder.build_tool_registry());
        assert!(prompt.starts_with("You are a Deep Research Orchestrator Agent."));
        assert!(prompt.contains("\"plan_query\""));
        assert!(prompt.contains("\"topic\""));
    }

    #[test]
    fn test_build_seeds_thread_with_system_turn() {
        let builder = OrchestratorBuilder::new(AppConfig::default());
        let orch = builder.build(Arc::new(MockLlmClient::new()));
        let session = orch.new_session();
        assert_eq!(session.thread.len(), 1);
        assert_eq!(orch.settings().max_steps, 20);
        assert_eq!(orch.settings().max_retries, 5);
    }
}
