//! 工具执行器
//!
//! execute(thread, role, tool, input)：先校验输入（不通过即 InvalidToolInput，不会到达模型），
//! 再以「framing + prompt」经 RoleAgent 调用模型，最后解码输出；解码失败时优先使用工具兜底，
//! 否则转为 ToolExecution。每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use serde_json::Value;

use crate::agent::{Role, RoleAgent};
use crate::core::AgentError;
use crate::memory::Thread;
use crate::tools::{StructuredTool, Validate};

/// 一次工具调用的结果
#[derive(Debug, Clone)]
pub struct ToolInvocation<O> {
    pub tool: &'static str,
    /// 模型原始回复
    pub raw: String,
    pub output: O,
    /// 输出来自兜底而非模型
    pub fell_back: bool,
}

/// 工具执行器：共享 RoleAgent，自身无状态
#[derive(Clone)]
pub struct ToolExecutor {
    agent: RoleAgent,
}

impl ToolExecutor {
    pub fn new(agent: RoleAgent) -> Self {
        Self { agent }
    }

    /// 将 JSON 参数解析为工具输入类型；字段缺失或类型不符即 InvalidToolInput
    pub fn parse_input<T: StructuredTool>(tool: &T, args: Value) -> Result<T::Input, AgentError> {
        serde_json::from_value(args).map_err(|e| AgentError::InvalidToolInput {
            tool: tool.name().to_string(),
            reason: e.to_string(),
        })
    }

    /// 以指定角色执行工具
    pub async fn execute<T: StructuredTool>(
        &self,
        thread: &mut Thread,
        role: Role,
        tool: &T,
        input: &T::Input,
    ) -> Result<ToolInvocation<T::Output>, AgentError> {
        let name = tool.name();
        input.validate().map_err(|reason| AgentError::InvalidToolInput {
            tool: name.to_string(),
            reason,
        })?;

        let start = Instant::now();
        let prompt = format!("{}\n\n{}", tool.framing(), tool.prompt(input));
        let prompt_preview = preview(&prompt);

        let raw = match self.agent.run_role(thread, role, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                self.audit(name, role, "provider_error", &start, &prompt_preview);
                return Err(e);
            }
        };

        match tool.decode(&raw) {
            Ok(output) => {
                self.audit(name, role, "ok", &start, &prompt_preview);
                Ok(ToolInvocation {
                    tool: name,
                    raw,
                    output,
                    fell_back: false,
                })
            }
            Err(decode_err) => match tool.fallback(input, &decode_err) {
                Some(output) => {
                    self.audit(name, role, "fallback", &start, &prompt_preview);
                    Ok(ToolInvocation {
                        tool: name,
                        raw,
                        output,
                        fell_back: true,
                    })
                }
                None => {
                    self.audit(name, role, "decode_error", &start, &prompt_preview);
                    Err(AgentError::ToolExecution {
                        tool: name.to_string(),
                        reason: decode_err.to_string(),
                    })
                }
            },
        }
    }

    /// 结构化审计日志（JSON）
    fn audit(
        &self,
        tool: &str,
        role: Role,
        outcome: &str,
        start: &Instant,
        prompt_preview: &str,
    ) {
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "role": role.as_str(),
            "model": self.agent.model_name(),
            "ok": outcome == "ok" || outcome == "fallback",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "prompt_preview": prompt_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::MockLlmClient;
    use crate::observability::UsageLedger;
    use crate::tools::{PlanTool, SummarizeInput, SummarizeTool};

    fn executor(llm: MockLlmClient) -> (ToolExecutor, Arc<MockLlmClient>) {
        let llm = Arc::new(llm);
        let agent = RoleAgent::new(llm.clone(), Arc::new(UsageLedger::new()));
        (ToolExecutor::new(agent), llm)
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_model() {
        let (exec, llm) = executor(MockLlmClient::new().with_default("x"));
        let mut thread = Thread::with_system("sys");
        let input = SummarizeInput {
            text: "   ".into(),
            focus: None,
        };
        let err = exec
            .execute(&mut thread, Role::Researcher, &SummarizeTool, &input)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolInput { .. }));
        assert_eq!(llm.call_count(), 0);
        assert_eq!(thread.len(), 1);
    }

    #[tokio::test]
    async fn test_parse_input_rejects_missing_field() {
        let err = ToolExecutor::parse_input(&PlanTool::new(5), serde_json::json!({ "query": 1 }))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolInput { .. }));
    }

    #[tokio::test]
    async fn test_prompt_is_framing_then_template() {
        let (exec, llm) = executor(MockLlmClient::new().with_default("a summary"));
        let mut thread = Thread::with_system("sys");
        let input = SummarizeInput {
            text: "raw findings".into(),
            focus: Some("cost".into()),
        };
        let done = exec
            .execute(&mut thread, Role::Researcher, &SummarizeTool, &input)
            .await
            .unwrap();
        assert_eq!(done.output, "a summary");
        assert!(!done.fell_back);

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("You are a Research Agent."));
        assert!(prompt.contains("raw findings"));
    }

    #[tokio::test]
    async fn test_decode_failure_without_fallback_is_tool_error() {
        let (exec, _) = executor(MockLlmClient::new().with_default("  "));
        let mut thread = Thread::with_system("sys");
        let input = SummarizeInput {
            text: "raw".into(),
            focus: None,
        };
        let err = exec
            .execute(&mut thread, Role::Researcher, &SummarizeTool, &input)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_plan_falls_back_on_garbage() {
        let (exec, _) = executor(MockLlmClient::new().with_default("I cannot help with that"));
        let mut thread = Thread::with_system("sys");
        let input = crate::tools::PlanInput {
            topic: "impact of X on Y".into(),
        };
        let done = exec
            .execute(&mut thread, Role::Planner, &PlanTool::new(5), &input)
            .await
            .unwrap();
        assert!(done.fell_back);
        assert_eq!(done.output.len(), 5);
    }
}
