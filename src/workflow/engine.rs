//! 工作流引擎
//!
//! 每个 Run 一个驱动任务，按 plan -> research -> synthesize 顺序执行；
//! 每步结果先写入 checkpoint 再进入下一步，进程重启后由 resume / resume_pending 从第一个未记录的步骤继续。
//! 取消与阶段推进只在步骤边界发生。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::archive::ReportArchive;
use crate::core::{AgentError, Orchestrator, Stage, StageSnapshot, StageTracker, StepFailure};
use crate::workflow::store::CheckpointStore;
use crate::workflow::types::*;

/// 当前进程正在驱动（或已驱动完）的 Run
struct RunHandle {
    tracker: Arc<StageTracker>,
    cancel: CancellationToken,
    done: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }
}

/// 研究工作流
#[derive(Clone)]
pub struct ResearchWorkflow {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn CheckpointStore>,
    archive: Option<Arc<dyn ReportArchive>>,
    runs: Arc<RwLock<HashMap<RunId, RunHandle>>>,
}

impl ResearchWorkflow {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            orchestrator,
            store,
            archive: None,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 完成的报告交给归档
    pub fn with_archive(mut self, archive: Arc<dyn ReportArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// 提交主题，返回 run_id；驱动任务在后台运行
    pub async fn start(&self, topic: &str) -> Result<RunId, WorkflowError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(WorkflowError::InvalidTopic);
        }
        let record = RunRecord::new(topic);
        self.store.save(&record).await?;
        let run_id = record.run_id.clone();
        tracing::info!(run_id = %run_id, topic = %topic, "run submitted");

        self.spawn_driver(record).await;
        Ok(run_id)
    }

    /// 恢复一个仍在 running 的 Run；已在驱动或已结束时不做任何事
    pub async fn resume(&self, run_id: &str) -> Result<(), WorkflowError> {
        if self.is_driving(run_id).await {
            return Ok(());
        }
        let record = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
        if record.is_terminal() {
            return Ok(());
        }
        tracing::info!(
            run_id = %run_id,
            completed_steps = record.steps.len(),
            "resuming run"
        );
        self.spawn_driver(record).await;
        Ok(())
    }

    /// 恢复 checkpoint 中全部未结束的 Run，返回被恢复的 run_id
    pub async fn resume_pending(&self) -> Result<Vec<RunId>, WorkflowError> {
        let mut resumed = Vec::new();
        for record in self.store.list_running().await? {
            if self.is_driving(&record.run_id).await {
                continue;
            }
            let run_id = record.run_id.clone();
            if self.spawn_driver(record).await {
                resumed.push(run_id);
            }
        }
        if !resumed.is_empty() {
            tracing::info!(count = resumed.len(), "resumed pending runs");
        }
        Ok(resumed)
    }

    /// 等待 Run 结束
    pub async fn await_completion(&self, run_id: &str) -> Result<RunOutcome, WorkflowError> {
        let rx = {
            let runs = self.runs.read().await;
            runs.get(run_id).map(|h| h.done.clone())
        };
        if let Some(mut rx) = rx {
            if let Ok(outcome) = rx.wait_for(Option::is_some).await {
                if let Some(outcome) = (*outcome).clone() {
                    return Ok(outcome);
                }
            }
            // 驱动任务异常退出，以 checkpoint 为准
        }

        let record = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
        let report = record.report().map(str::to_string);
        match (record.status, report, record.failure) {
            (RunStatus::Completed, Some(report), _) => Ok(RunOutcome::Completed { report }),
            (RunStatus::Completed, None, _) => Err(WorkflowError::Corrupt {
                run_id: run_id.to_string(),
                missing: "report",
            }),
            (RunStatus::Failed, _, Some(failure)) => Ok(RunOutcome::Failed(failure)),
            (RunStatus::Failed, _, None) => Err(WorkflowError::Corrupt {
                run_id: run_id.to_string(),
                missing: "failure",
            }),
            (RunStatus::Running, _, _) => Err(WorkflowError::NotActive(run_id.to_string())),
        }
    }

    /// 状态视图：status / report / failure 来自 checkpoint，阶段来自本进程的 StageTracker
    pub async fn status(&self, run_id: &str) -> Result<RunStatusView, WorkflowError> {
        let record = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
        let snapshot = {
            let runs = self.runs.read().await;
            runs.get(run_id).map(|h| h.tracker.snapshot())
        }
        .unwrap_or_else(|| StageTracker::new().snapshot());

        Ok(RunStatusView {
            run_id: record.run_id.clone(),
            status: record.status,
            stage: snapshot.stage,
            stage_name: snapshot.name,
            sub_steps: snapshot.sub_steps,
            completed_steps: record.steps.iter().map(StepOutput::step).collect(),
            report: record.report().map(str::to_string),
            failure: record.failure,
        })
    }

    /// 订阅阶段变化（展示层）
    pub async fn watch_stage(&self, run_id: &str) -> Option<watch::Receiver<StageSnapshot>> {
        let runs = self.runs.read().await;
        runs.get(run_id).map(|h| h.tracker.subscribe())
    }

    /// 已发生的阶段转换
    pub async fn stage_transitions(&self, run_id: &str) -> Option<Vec<Stage>> {
        let runs = self.runs.read().await;
        runs.get(run_id).map(|h| h.tracker.transitions())
    }

    /// 请求取消：驱动中的 Run 在下一个步骤边界失败（Cancelled）；
    /// 未被驱动的 running Run 直接标记为失败
    pub async fn cancel(&self, run_id: &str) -> Result<(), WorkflowError> {
        {
            let runs = self.runs.read().await;
            if let Some(handle) = runs.get(run_id) {
                if !handle.is_finished() {
                    tracing::info!(run_id = %run_id, "cancellation requested");
                    handle.cancel.cancel();
                }
                return Ok(());
            }
        }

        let mut record = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
        if record.is_terminal() {
            return Ok(());
        }
        let step = record.next_step().unwrap_or(StepName::Synthesize);
        record.mark_failed(
            step,
            &StepFailure {
                error: AgentError::Cancelled,
                attempts: 0,
            },
        );
        self.store.save(&record).await?;
        Ok(())
    }

    /// 执行单个步骤并写入 checkpoint
    ///
    /// 步骤已有记录时不调用编排器，直接返回记录的结果；步骤必须按顺序执行。
    pub async fn run_step(
        &self,
        record: &mut RunRecord,
        step: StepName,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, WorkflowError> {
        if let Some(done) = record.output(step) {
            tracing::debug!(run_id = %record.run_id, step = %step, "step already recorded");
            return Ok(done.clone());
        }
        if record.is_terminal() {
            return Err(WorkflowError::AlreadyFinished(record.run_id.clone()));
        }
        let expected = record.next_step().unwrap_or(StepName::Synthesize);
        if step != expected {
            return Err(WorkflowError::OutOfOrder { step, expected });
        }
        if cancel.is_cancelled() {
            return Err(StepFailure {
                error: AgentError::Cancelled,
                attempts: 0,
            }
            .into());
        }

        tracing::info!(run_id = %record.run_id, step = %step, "step started");
        let output = match step {
            StepName::Plan => {
                let start = self.orchestrator.start_run(&record.topic, cancel).await?;
                record.session = Some(start.session);
                StepOutput::Plan {
                    subtasks: start.subtasks,
                }
            }
            StepName::Research => {
                let subtasks = record
                    .subtasks()
                    .ok_or_else(|| corrupt(record, "plan output"))?
                    .to_vec();
                let mut session = record
                    .session
                    .clone()
                    .ok_or_else(|| corrupt(record, "session"))?;
                let findings = self
                    .orchestrator
                    .research_subtasks(&mut session, &subtasks, cancel)
                    .await;
                if cancel.is_cancelled() {
                    return Err(StepFailure {
                        error: AgentError::Cancelled,
                        attempts: 1,
                    }
                    .into());
                }
                record.session = Some(session);
                StepOutput::Research { findings }
            }
            StepName::Synthesize => {
                let findings = record
                    .findings()
                    .ok_or_else(|| corrupt(record, "research output"))?
                    .to_vec();
                let mut session = record
                    .session
                    .clone()
                    .ok_or_else(|| corrupt(record, "session"))?;
                let report = self
                    .orchestrator
                    .synthesize(&mut session, &record.topic, &findings, cancel)
                    .await;
                // 失败的尝试也计入步数
                let steps_used = session.steps_used;
                record.session = Some(session);
                let report = report?;
                tracing::debug!(run_id = %record.run_id, steps_used, "synthesis recorded");
                StepOutput::Synthesize { report }
            }
        };

        record.record(output.clone());
        self.store.save(record).await?;
        tracing::info!(run_id = %record.run_id, step = %step, "step recorded");
        Ok(output)
    }

    async fn is_driving(&self, run_id: &str) -> bool {
        let runs = self.runs.read().await;
        runs.get(run_id).is_some_and(|h| !h.is_finished())
    }

    /// 登记并启动驱动任务；同一 Run 已在驱动时返回 false
    async fn spawn_driver(&self, record: RunRecord) -> bool {
        let tracker = Arc::new(StageTracker::new());
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        {
            let mut runs = self.runs.write().await;
            if runs
                .get(&record.run_id)
                .is_some_and(|h| !h.is_finished())
            {
                return false;
            }
            runs.insert(
                record.run_id.clone(),
                RunHandle {
                    tracker: tracker.clone(),
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
        }

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.drive(record, &tracker, &cancel).await;
            done_tx.send_replace(Some(outcome));
        });
        true
    }

    async fn drive(
        &self,
        mut record: RunRecord,
        tracker: &StageTracker,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        while let Some(step) = record.next_step() {
            if let Err(e) = tracker.advance_to(step.stage()) {
                tracing::warn!(run_id = %record.run_id, error = %e, "stage not advanced");
            }
            match self.run_step(&mut record, step, cancel).await {
                Ok(_) => {}
                Err(WorkflowError::Step(failure)) => {
                    return self.fail(record, step, failure, tracker).await;
                }
                Err(e) => {
                    return self.fail_storage(record, step, e, tracker).await;
                }
            }
        }
        self.complete(record, tracker).await
    }

    async fn complete(&self, mut record: RunRecord, tracker: &StageTracker) -> RunOutcome {
        let Some(report) = record.report().map(str::to_string) else {
            let e = corrupt(&record, "report");
            return self.fail_storage(record, StepName::Synthesize, e, tracker).await;
        };
        record.status = RunStatus::Completed;
        record.updated_at = chrono::Utc::now();
        if let Err(e) = self.store.save(&record).await {
            tracing::error!(run_id = %record.run_id, error = %e, "failed to persist completed run");
        }
        if let Err(e) = tracker.finish() {
            tracing::warn!(run_id = %record.run_id, error = %e, "stage not finished");
        }

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.store(&record.run_id, &record.topic, &report).await {
                tracing::warn!(run_id = %record.run_id, error = %e, "report archive failed");
            }
        }
        let steps_used = record.session.as_ref().map_or(0, |s| s.steps_used);
        tracing::info!(run_id = %record.run_id, steps_used, "run completed");
        RunOutcome::Completed { report }
    }

    async fn fail(
        &self,
        mut record: RunRecord,
        step: StepName,
        failure: StepFailure,
        tracker: &StageTracker,
    ) -> RunOutcome {
        let info = record.mark_failed(step, &failure);
        if let Err(e) = self.store.save(&record).await {
            tracing::error!(run_id = %record.run_id, error = %e, "failed to persist failed run");
        }
        tracker.reset();
        tracing::error!(run_id = %record.run_id, failure = %info, "run failed");
        RunOutcome::Failed(info)
    }

    async fn fail_storage(
        &self,
        mut record: RunRecord,
        step: StepName,
        error: WorkflowError,
        tracker: &StageTracker,
    ) -> RunOutcome {
        let info = RunFailure {
            kind: crate::core::ErrorKind::Storage,
            reason: error.to_string(),
            failed_step: step,
            attempts: 1,
            last_completed_stage: record.last_completed_stage(),
        };
        record.fail_with(info.clone());
        if let Err(e) = self.store.save(&record).await {
            tracing::error!(run_id = %record.run_id, error = %e, "failed to persist failed run");
        }
        tracker.reset();
        tracing::error!(run_id = %record.run_id, failure = %info, "run failed");
        RunOutcome::Failed(info)
    }
}

fn corrupt(record: &RunRecord, missing: &'static str) -> WorkflowError {
    WorkflowError::Corrupt {
        run_id: record.run_id.clone(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::OrchestratorBuilder;
    use crate::llm::MockLlmClient;
    use crate::workflow::store::MemoryCheckpointStore;

    fn workflow(llm: MockLlmClient) -> (ResearchWorkflow, Arc<MockLlmClient>) {
        let llm = Arc::new(llm);
        let orch = OrchestratorBuilder::new(AppConfig::default()).build(llm.clone());
        let wf = ResearchWorkflow::new(Arc::new(orch), Arc::new(MemoryCheckpointStore::new()));
        (wf, llm)
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let (wf, llm) = workflow(MockLlmClient::new());
        assert!(matches!(wf.start("  ").await, Err(WorkflowError::InvalidTopic)));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_step_is_idempotent() {
        let (wf, llm) = workflow(MockLlmClient::new().on("research planning expert", r#"["a"]"#));
        let mut record = RunRecord::new("topic");
        let cancel = CancellationToken::new();

        let first = wf.run_step(&mut record, StepName::Plan, &cancel).await.unwrap();
        let second = wf.run_step(&mut record, StepName::Plan, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_run_step_out_of_order() {
        let (wf, _) = workflow(MockLlmClient::new());
        let mut record = RunRecord::new("topic");
        let err = wf
            .run_step(&mut record, StepName::Synthesize, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::OutOfOrder {
                step: StepName::Synthesize,
                expected: StepName::Plan
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let (wf, _) = workflow(MockLlmClient::new());
        assert!(matches!(
            wf.status("run_missing").await,
            Err(WorkflowError::RunNotFound(_))
        ));
        assert!(matches!(
            wf.resume("run_missing").await,
            Err(WorkflowError::RunNotFound(_))
        ));
    }
}
