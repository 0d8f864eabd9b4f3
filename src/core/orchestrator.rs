//! 研究编排器
//!
//! 持有全部工具、步数预算、重试预算，驱动三类动作：
//! start_run（Planner + Plan）→ research_subtasks（Researcher + FetchWebResults / SummarizeOrQuery，可选 Analyst）
//! → synthesize（Synthesizer + GenerateReport）。
//! 每次角色/工具调用都计入步数预算；ToolExecution / Provider 错误按相同输入有界重试。

use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::agent::Role;
use crate::config::AgentSection;
use crate::core::{AgentError, Attempted, ErrorKind, RetryPolicy, StepFailure};
use crate::memory::Thread;
use crate::tools::{
    FetchInput, FetchWebResultsTool, GenerateReportTool, PlanInput, PlanTool, ReportInput,
    StructuredTool, SummarizeInput, SummarizeTool, ToolExecutor, ToolInvocation, ToolRegistry,
    WebResult,
};

/// 编排参数
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub max_steps: usize,
    pub max_retries: u32,
    pub max_subtasks: usize,
    pub research_concurrency: usize,
    pub analyze_findings: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&AgentSection::default())
    }
}

impl From<&AgentSection> for OrchestratorSettings {
    fn from(agent: &AgentSection) -> Self {
        Self {
            max_steps: agent.max_steps,
            max_retries: agent.max_retries,
            max_subtasks: agent.max_subtasks.max(1),
            research_concurrency: agent.research_concurrency.max(1),
            analyze_findings: agent.analyze_findings,
        }
    }
}

/// 一个 Run 的会话：线程 + 已用步数（随 checkpoint 持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub thread: Thread,
    pub steps_used: usize,
}

/// start_run 的结果
#[derive(Debug, Clone)]
pub struct RunStart {
    pub session: RunSession,
    pub subtasks: Vec<String>,
}

/// 单个子任务的研究结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub subtask: String,
    pub outcome: FindingOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FindingOutcome {
    Succeeded {
        summary: String,
        sources: Vec<WebResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis: Option<String>,
    },
    /// 重试耗尽后降级：不编造内容，只记录原因
    Degraded {
        kind: ErrorKind,
        reason: String,
        attempts: u32,
    },
}

impl Finding {
    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, FindingOutcome::Degraded { .. })
    }

    fn degraded(subtask: String, failure: StepFailure) -> Self {
        Self {
            subtask,
            outcome: FindingOutcome::Degraded {
                kind: failure.error.kind(),
                reason: failure.error.to_string(),
                attempts: failure.attempts,
            },
        }
    }
}

/// 把全部 Finding 拼成报告输入；降级项列为信息缺口
pub fn render_findings(findings: &[Finding]) -> String {
    let mut out = String::new();
    for (i, finding) in findings.iter().enumerate() {
        out.push_str(&format!("## Subtask {}: {}\n", i + 1, finding.subtask));
        match &finding.outcome {
            FindingOutcome::Succeeded {
                summary,
                sources,
                analysis,
            } => {
                out.push_str(summary);
                out.push('\n');
                if !sources.is_empty() {
                    out.push_str("Sources:\n");
                    for source in sources {
                        out.push_str(&format!("- {}\n", source.to_line()));
                    }
                }
                if let Some(analysis) = analysis {
                    out.push_str(&format!("Analysis:\n{analysis}\n"));
                }
            }
            FindingOutcome::Degraded { kind, reason, .. } => {
                out.push_str(&format!(
                    "[Gap] No research available for this subtask ({kind}: {reason}).\n"
                ));
            }
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// 单 Run 的步数预算，可在并行研究的分支间共享
///
/// `reserved` 步留给后续步骤：本预算最多用到 `max - reserved`。
#[derive(Debug)]
pub struct StepBudget {
    used: AtomicUsize,
    max: usize,
    reserved: usize,
}

impl StepBudget {
    pub fn new(max: usize, used: usize) -> Self {
        Self {
            used: AtomicUsize::new(used),
            max,
            reserved: 0,
        }
    }

    pub fn with_reserve(mut self, reserved: usize) -> Self {
        self.reserved = reserved;
        self
    }

    /// 占用一步；已达上限时返回 StepBudgetExhausted 且不计数
    pub fn charge(&self) -> Result<(), AgentError> {
        let ceiling = self.max.saturating_sub(self.reserved);
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < ceiling).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| AgentError::StepBudgetExhausted {
                max_steps: self.max,
            })
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

/// 研究编排器
pub struct Orchestrator {
    executor: ToolExecutor,
    registry: ToolRegistry,
    system_prompt: String,
    plan_tool: PlanTool,
    retry: RetryPolicy,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        executor: ToolExecutor,
        registry: ToolRegistry,
        system_prompt: String,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            executor,
            registry,
            system_prompt,
            plan_tool: PlanTool::new(settings.max_subtasks),
            retry: RetryPolicy::new(settings.max_retries),
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 新线程，首条为 system 消息（编排器前言 + 工具清单）
    pub fn new_session(&self) -> RunSession {
        RunSession {
            thread: Thread::with_system(self.system_prompt.clone()),
            steps_used: 0,
        }
    }

    /// 创建线程并规划子任务；Plan 解码失败会落到默认子任务，因此只会因 Provider / 预算 / 取消失败
    pub async fn start_run(
        &self,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<RunStart, StepFailure> {
        let mut session = self.new_session();
        tracing::info!(thread = %session.thread.thread_id(), topic = %topic, "run started");

        let budget = StepBudget::new(self.settings.max_steps, session.steps_used);
        let input = PlanInput {
            topic: topic.to_string(),
        };
        let planned = self
            .run_tool(
                &mut session.thread,
                &budget,
                Role::Planner,
                &self.plan_tool,
                &input,
                "plan",
                cancel,
            )
            .await;
        session.steps_used = budget.used();
        let planned = planned?;

        tracing::info!(
            subtasks = planned.value.output.len(),
            fell_back = planned.value.fell_back,
            attempts = planned.attempts,
            "plan ready"
        );
        Ok(RunStart {
            session,
            subtasks: planned.value.output,
        })
    }

    /// 并行研究全部子任务（并发上限 research_concurrency），结果与输入一一对应、顺序不变
    ///
    /// synthesize 的完整重试预算预先扣除，研究阶段的失败重试不会挤占报告生成。
    pub async fn research_subtasks(
        &self,
        session: &mut RunSession,
        subtasks: &[String],
        cancel: &CancellationToken,
    ) -> Vec<Finding> {
        let budget = StepBudget::new(self.settings.max_steps, session.steps_used)
            .with_reserve(self.retry.max_attempts());
        let permits = Semaphore::new(self.settings.research_concurrency);
        let base = session.thread.len();

        let tasks: Vec<_> = subtasks
            .iter()
            .map(|subtask| {
                let branch = session.thread.fork();
                self.research_one(branch, &budget, &permits, subtask.clone(), cancel)
            })
            .collect();
        let results = join_all(tasks).await;

        let mut findings = Vec::with_capacity(results.len());
        for (branch, finding) in results {
            session.thread.extend(branch.delta_since(base).to_vec());
            findings.push(finding);
        }
        session.steps_used = budget.used();

        let degraded = findings.iter().filter(|f| f.is_degraded()).count();
        tracing::info!(
            findings = findings.len(),
            degraded,
            steps_used = session.steps_used,
            "research complete"
        );
        findings
    }

    async fn research_one(
        &self,
        mut branch: Thread,
        budget: &StepBudget,
        permits: &Semaphore,
        subtask: String,
        cancel: &CancellationToken,
    ) -> (Thread, Finding) {
        let _permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let failure = StepFailure {
                    error: AgentError::Cancelled,
                    attempts: 0,
                };
                return (branch, Finding::degraded(subtask, failure));
            }
        };

        let fetch_input = FetchInput {
            topic: subtask.clone(),
        };
        let fetched = match self
            .run_tool(
                &mut branch,
                budget,
                Role::Researcher,
                &FetchWebResultsTool,
                &fetch_input,
                "research.fetch",
                cancel,
            )
            .await
        {
            Ok(done) => done.value.output,
            Err(failure) => {
                tracing::warn!(subtask = %subtask, error = %failure, "subtask degraded");
                return (branch, Finding::degraded(subtask, failure));
            }
        };

        let summarize_input = SummarizeInput {
            text: fetched
                .iter()
                .map(WebResult::to_line)
                .collect::<Vec<_>>()
                .join("\n"),
            focus: Some(subtask.clone()),
        };
        let summary = match self
            .run_tool(
                &mut branch,
                budget,
                Role::Researcher,
                &SummarizeTool,
                &summarize_input,
                "research.summarize",
                cancel,
            )
            .await
        {
            Ok(done) => done.value.output,
            Err(failure) => {
                tracing::warn!(subtask = %subtask, error = %failure, "subtask degraded");
                return (branch, Finding::degraded(subtask, failure));
            }
        };

        let analysis = if self.settings.analyze_findings {
            self.analyze(&mut branch, budget, &subtask, &summary, cancel)
                .await
        } else {
            None
        };

        let finding = Finding {
            subtask,
            outcome: FindingOutcome::Succeeded {
                summary,
                sources: fetched,
                analysis,
            },
        };
        (branch, finding)
    }

    /// Analyst 复核：失败不影响 Finding 本身，只是缺少分析
    async fn analyze(
        &self,
        branch: &mut Thread,
        budget: &StepBudget,
        subtask: &str,
        summary: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let input = SummarizeInput {
            text: summary.to_string(),
            focus: Some(format!("patterns and insights relevant to: {subtask}")),
        };
        match self
            .run_tool(
                branch,
                budget,
                Role::Analyst,
                &SummarizeTool,
                &input,
                "research.analyze",
                cancel,
            )
            .await
        {
            Ok(done) => Some(done.value.output),
            Err(failure) => {
                tracing::warn!(subtask = %subtask, error = %failure, "analysis skipped");
                None
            }
        }
    }

    /// 汇总报告；全部 Finding 降级时仍生成一份说明信息缺口的报告
    pub async fn synthesize(
        &self,
        session: &mut RunSession,
        topic: &str,
        findings: &[Finding],
        cancel: &CancellationToken,
    ) -> Result<String, StepFailure> {
        if !findings.is_empty() && findings.iter().all(Finding::is_degraded) {
            tracing::warn!("every finding is degraded, report will describe the gaps");
        }

        let findings_text = if findings.is_empty() {
            "[Gap] No subtasks were researched.".to_string()
        } else {
            render_findings(findings)
        };
        let input = ReportInput {
            topic: topic.to_string(),
            findings: findings_text,
        };

        let budget = StepBudget::new(self.settings.max_steps, session.steps_used);
        let report = self
            .run_tool(
                &mut session.thread,
                &budget,
                Role::Synthesizer,
                &GenerateReportTool,
                &input,
                "synthesize",
                cancel,
            )
            .await;
        session.steps_used = budget.used();

        let report = report?;
        tracing::info!(
            attempts = report.attempts,
            chars = report.value.output.len(),
            "report generated"
        );
        Ok(report.value.output)
    }

    /// 单个工具的有界重试循环：每次尝试前检查取消并占用一步
    #[allow(clippy::too_many_arguments)]
    async fn run_tool<T: StructuredTool>(
        &self,
        thread: &mut Thread,
        budget: &StepBudget,
        role: Role,
        tool: &T,
        input: &T::Input,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<Attempted<ToolInvocation<T::Output>>, StepFailure> {
        let mut retry = self.retry.start(label);
        loop {
            if cancel.is_cancelled() {
                return Err(StepFailure {
                    error: AgentError::Cancelled,
                    attempts: retry.attempts(),
                });
            }
            let result = match budget.charge() {
                Ok(()) => self.executor.execute(thread, role, tool, input).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(invocation) => return Ok(retry.succeeded(invocation)),
                Err(e) => retry.record_failure(e, cancel)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::RoleAgent;
    use crate::llm::{LlmError, MockLlmClient, MockReply};
    use crate::observability::UsageLedger;

    const FETCH: &str = "You are a web search expert.";
    const SUMMARIZE: &str = "Summarize the following text";
    const REPORT: &str = "Generate a final report";

    fn orchestrator(
        llm: MockLlmClient,
        settings: OrchestratorSettings,
    ) -> (Orchestrator, Arc<MockLlmClient>) {
        let llm = Arc::new(llm);
        let agent = RoleAgent::new(llm.clone(), Arc::new(UsageLedger::new()));
        let orch = Orchestrator::new(
            ToolExecutor::new(agent),
            ToolRegistry::new(),
            "You are a Deep Research Orchestrator Agent.".to_string(),
            settings,
        );
        (orch, llm)
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            max_steps: 20,
            max_retries: 2,
            max_subtasks: 5,
            research_concurrency: 2,
            analyze_findings: false,
        }
    }

    #[test]
    fn test_step_budget_stops_at_max() {
        let budget = StepBudget::new(2, 1);
        assert!(budget.charge().is_ok());
        assert_eq!(
            budget.charge().unwrap_err(),
            AgentError::StepBudgetExhausted { max_steps: 2 }
        );
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_step_budget_leaves_reserve_untouched() {
        let budget = StepBudget::new(5, 1).with_reserve(3);
        assert!(budget.charge().is_ok());
        assert!(budget.charge().is_err());
        assert_eq!(budget.used(), 2);

        // 预留的步数仍可由后续步骤使用
        let next = StepBudget::new(5, budget.used());
        for _ in 0..3 {
            assert!(next.charge().is_ok());
        }
        assert!(next.charge().is_err());
    }

    #[tokio::test]
    async fn test_start_run_returns_planned_subtasks() {
        let llm = MockLlmClient::new().on("research planning expert", r#"["A", "B", "C"]"#);
        let (orch, _) = orchestrator(llm, settings());
        let start = orch
            .start_run("grid storage", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(start.subtasks, vec!["A", "B", "C"]);
        assert_eq!(start.session.steps_used, 1);
        // system + user + assistant
        assert_eq!(start.session.thread.len(), 3);
    }

    #[tokio::test]
    async fn test_start_run_fails_on_persistent_provider_error() {
        let llm = MockLlmClient::new().on_sequence(
            "research planning expert",
            vec![MockReply::Fail(LlmError::Transport("down".into()))],
        );
        let (orch, llm) = orchestrator(llm, settings());
        let failure = orch
            .start_run("grid storage", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::ProviderError);
        assert_eq!(failure.attempts, 3);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_research_keeps_order_and_degrades_failures() {
        let llm = MockLlmClient::new()
            .on("topic:\nbroken", "not json at all")
            .on(FETCH, r#"[{"title": "T", "url": "https://example.org", "snippet": "S"}]"#)
            .on(SUMMARIZE, "key points");
        let (orch, _) = orchestrator(llm, settings());
        let mut session = orch.new_session();
        let subtasks = vec!["first".to_string(), "broken".to_string(), "third".to_string()];

        let findings = orch
            .research_subtasks(&mut session, &subtasks, &CancellationToken::new())
            .await;

        assert_eq!(findings.len(), 3);
        let order: Vec<&str> = findings.iter().map(|f| f.subtask.as_str()).collect();
        assert_eq!(order, vec!["first", "broken", "third"]);
        assert!(!findings[0].is_degraded());
        assert!(matches!(
            findings[1].outcome,
            FindingOutcome::Degraded {
                kind: ErrorKind::ToolExecutionError,
                attempts: 3,
                ..
            }
        ));
        assert!(!findings[2].is_degraded());
    }

    #[tokio::test]
    async fn test_research_merges_branches_in_subtask_order() {
        let llm = MockLlmClient::new()
            .on(FETCH, r#"["result"]"#)
            .on(SUMMARIZE, "summary");
        let (orch, _) = orchestrator(llm, settings());
        let mut session = orch.new_session();
        let subtasks = vec!["alpha".to_string(), "beta".to_string()];

        orch.research_subtasks(&mut session, &subtasks, &CancellationToken::new())
            .await;

        // 每个子任务：fetch + summarize 各一问一答
        assert_eq!(session.thread.len(), 1 + 2 * 4);
        assert!(session.thread.turns()[1].content.contains("alpha"));
        assert!(session.thread.turns()[5].content.contains("beta"));
        assert_eq!(session.steps_used, 4);
    }

    #[tokio::test]
    async fn test_analyst_pass_when_enabled() {
        let llm = MockLlmClient::new()
            .on("patterns and insights", "an insight")
            .on(FETCH, r#"["result"]"#)
            .on(SUMMARIZE, "summary");
        let mut s = settings();
        s.analyze_findings = true;
        let (orch, _) = orchestrator(llm, s);
        let mut session = orch.new_session();

        let findings = orch
            .research_subtasks(&mut session, &["alpha".to_string()], &CancellationToken::new())
            .await;

        match &findings[0].outcome {
            FindingOutcome::Succeeded { analysis, .. } => {
                assert_eq!(analysis.as_deref(), Some("an insight"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_budget_degrades_remaining_subtasks() {
        let llm = MockLlmClient::new()
            .on(FETCH, r#"["result"]"#)
            .on(SUMMARIZE, "summary");
        let mut s = settings();
        // 3 步留给 synthesize（max_retries = 2），研究只剩 2 步
        s.max_steps = 5;
        s.research_concurrency = 1;
        let (orch, _) = orchestrator(llm, s);
        let mut session = orch.new_session();
        let subtasks = vec!["alpha".to_string(), "beta".to_string()];

        let findings = orch
            .research_subtasks(&mut session, &subtasks, &CancellationToken::new())
            .await;

        assert!(!findings[0].is_degraded());
        assert!(matches!(
            findings[1].outcome,
            FindingOutcome::Degraded {
                kind: ErrorKind::StepBudgetExhausted,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failing_subtasks_leave_budget_for_synthesis() {
        let llm = MockLlmClient::new()
            .on("topic:\nbroken", "not json at all")
            .on(FETCH, r#"["result"]"#)
            .on(SUMMARIZE, "summary")
            .on(REPORT, "# Report");
        let s = OrchestratorSettings::default();
        let (orch, _) = orchestrator(llm, s);
        let mut session = orch.new_session();
        session.steps_used = 1;
        let subtasks: Vec<String> = ["broken a", "ok one", "broken b", "ok two", "broken c"]
            .iter()
            .map(|name| name.to_string())
            .collect();

        let cancel = CancellationToken::new();
        let findings = orch.research_subtasks(&mut session, &subtasks, &cancel).await;
        assert_eq!(findings.len(), 5);
        for i in [0, 2, 4] {
            assert!(findings[i].is_degraded());
        }
        assert!(session.steps_used <= s.max_steps - (s.max_retries as usize + 1));

        let report = orch
            .synthesize(&mut session, "grid storage", &findings, &cancel)
            .await
            .unwrap();
        assert_eq!(report, "# Report");
    }

    #[tokio::test]
    async fn test_synthesize_lists_gaps_when_all_degraded() {
        let llm = MockLlmClient::new().on(REPORT, "# Report\nGaps only");
        let (orch, llm) = orchestrator(llm, settings());
        let mut session = orch.new_session();
        let findings = vec![Finding {
            subtask: "alpha".into(),
            outcome: FindingOutcome::Degraded {
                kind: ErrorKind::ProviderError,
                reason: "down".into(),
                attempts: 3,
            },
        }];

        let report = orch
            .synthesize(&mut session, "grid storage", &findings, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report, "# Report\nGaps only");
        assert!(llm.prompts()[0].contains("[Gap]"));
    }

    #[tokio::test]
    async fn test_synthesize_exhausts_retries() {
        let llm = MockLlmClient::new().on(REPORT, "   ");
        let (orch, llm) = orchestrator(llm, settings());
        let mut session = orch.new_session();
        let findings = vec![Finding {
            subtask: "alpha".into(),
            outcome: FindingOutcome::Succeeded {
                summary: "s".into(),
                sources: vec![],
                analysis: None,
            },
        }];

        let failure = orch
            .synthesize(&mut session, "grid storage", &findings, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.error.kind(), ErrorKind::ToolExecutionError);
        assert_eq!(failure.attempts, 3);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_call_never_reaches_model() {
        let (orch, llm) = orchestrator(MockLlmClient::new(), settings());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let failure = orch.start_run("grid storage", &cancel).await.unwrap_err();
        assert_eq!(failure.error, AgentError::Cancelled);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_render_findings() {
        let findings = vec![Finding {
            subtask: "alpha".into(),
            outcome: FindingOutcome::Succeeded {
                summary: "key points".into(),
                sources: vec![WebResult {
                    title: Some("T".into()),
                    url: None,
                    snippet: "S".into(),
                }],
                analysis: None,
            },
        }];
        assert_eq!(
            render_findings(&findings),
            "## Subtask 1: alpha\nkey points\nSources:\n- T: S"
        );
    }
}
