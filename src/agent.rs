//! 角色 Agent
//!
//! 四个固定角色（Planner / Researcher / Analyst / Synthesizer），各自绑定一段编译期常量指令。
//! run_role 把「指令 + 输入」作为 User 消息发给 LLM，成功后将该消息与回复一并追加到线程。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, Thread};
use crate::observability::UsageHook;

/// 角色（进程启动时即确定，不可变）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Planner,
    Researcher,
    Analyst,
    Synthesizer,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Planner,
        Role::Researcher,
        Role::Analyst,
        Role::Synthesizer,
    ];

    /// 角色固定指令；同一 Run 内各步骤之间不会漂移
    pub fn instructions(self) -> &'static str {
        match self {
            Role::Planner => {
                "You are a Research Planner. Your task is to break down the research topic into clear, actionable subtasks.\n\
                 Output should be a JSON array of subtask strings."
            }
            Role::Researcher => {
                "You are a Research Agent. Your task is to conduct in-depth research on the given subtask.\n\
                 Provide detailed, well-structured information with relevant sources."
            }
            Role::Analyst => {
                "You are an Analysis Agent. Your task is to analyze the research findings,\n\
                 identify patterns, and provide meaningful insights."
            }
            Role::Synthesizer => {
                "You are a Synthesis Agent. Your task is to combine all research findings into a\n\
                 comprehensive, well-structured final report."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Researcher => "researcher",
            Role::Analyst => "analyst",
            Role::Synthesizer => "synthesizer",
        }
    }
}

/// 拼接角色指令与输入，得到发给模型的 User 消息正文
pub fn role_prompt(role: Role, input: &str) -> String {
    format!("{}\n\nInput: {}", role.instructions(), input)
}

/// 角色 Agent：持有共享 LLM 与 usage hook
#[derive(Clone)]
pub struct RoleAgent {
    llm: Arc<dyn LlmClient>,
    usage: Arc<dyn UsageHook>,
}

impl RoleAgent {
    pub fn new(llm: Arc<dyn LlmClient>, usage: Arc<dyn UsageHook>) -> Self {
        Self { llm, usage }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// 在线程上以指定角色运行一次，返回模型原始文本
    ///
    /// 调用失败时线程保持不变；成功时追加 User 消息与 Assistant 回复。
    pub async fn run_role(
        &self,
        thread: &mut Thread,
        role: Role,
        input: &str,
    ) -> Result<String, AgentError> {
        let turn = Message::user(role_prompt(role, input));

        let mut request = thread.turns().to_vec();
        request.push(turn.clone());
        tracing::debug!(
            role = role.as_str(),
            thread = %thread.thread_id(),
            turns = request.len(),
            "running role"
        );

        let completion = self.llm.complete(&request).await?;
        self.usage.record(&completion.model, &completion.usage);

        thread.push(turn);
        thread.push(Message::assistant(completion.text.clone()));
        Ok(completion.text)
    }
}
