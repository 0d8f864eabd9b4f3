//! Delve - 多 Agent 深度研究工作流
//!
//! 入口：初始化日志、加载配置（缺少 API Key 立即退出）、恢复未完成的 Run，
//! 提交命令行给出的主题，打印阶段变化与最终报告。被恢复的 Run 在进程退出前一并等待结束。

use std::sync::Arc;

use anyhow::{bail, Context};
use delve::archive::SqliteReportArchive;
use delve::core::create_orchestrator_builder;
use delve::observability::{self, UsageLedger};
use delve::workflow::{
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ResearchWorkflow, RunOutcome,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let topic = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if topic.trim().is_empty() {
        bail!("usage: delve \"<research topic>\"");
    }

    let ledger = Arc::new(UsageLedger::new());
    let builder = create_orchestrator_builder(None)
        .context("Failed to load config")?
        .with_usage_hook(ledger.clone());
    let cfg = builder.config().clone();
    let orchestrator = builder
        .build_from_config()
        .context("Failed to create LLM client")?;
    tracing::info!(tools = ?orchestrator.registry().tool_names(), "orchestrator ready");

    let store: Arc<dyn CheckpointStore> = match &cfg.workflow.checkpoint_dir {
        Some(dir) => Arc::new(
            FileCheckpointStore::new(dir).context("Failed to open checkpoint directory")?,
        ),
        None => Arc::new(MemoryCheckpointStore::new()),
    };
    let mut workflow = ResearchWorkflow::new(Arc::new(orchestrator), store);
    if let Some(path) = &cfg.workflow.archive_path {
        let archive = SqliteReportArchive::open(path).context("Failed to open report archive")?;
        workflow = workflow.with_archive(Arc::new(archive));
    }

    let resumed = workflow
        .resume_pending()
        .await
        .context("Failed to resume pending runs")?;

    let run_id = workflow.start(&topic).await.context("Failed to start run")?;
    tracing::info!(run_id = %run_id, "research started");

    if let Some(mut rx) = workflow.watch_stage(&run_id).await {
        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if let Some(name) = snapshot.name {
                    eprintln!("==> {name} ({})", snapshot.sub_steps.join(", "));
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    let outcome = tokio::select! {
        outcome = workflow.await_completion(&run_id) => outcome,
        _ = tokio::signal::ctrl_c() => {
            for id in resumed.iter().chain(std::iter::once(&run_id)) {
                workflow.cancel(id).await.context("Failed to cancel run")?;
            }
            workflow.await_completion(&run_id).await
        }
    }
    .context("Run did not finish")?;

    finish_resumed(&workflow, &resumed).await;

    let (prompt, completion, total) = ledger.totals();
    tracing::info!(prompt, completion, total, "token usage for this process");

    match outcome {
        RunOutcome::Completed { report } => {
            println!("{report}");
            Ok(())
        }
        RunOutcome::Failed(failure) => {
            eprintln!(
                "research failed: {} (last completed stage: {:?})",
                failure, failure.last_completed_stage
            );
            std::process::exit(1);
        }
    }
}

/// 等待本进程恢复的旧 Run 结束；Ctrl-C 时取消剩余的 Run
async fn finish_resumed(workflow: &ResearchWorkflow, resumed: &[String]) {
    for id in resumed {
        let outcome = tokio::select! {
            outcome = workflow.await_completion(id) => outcome,
            _ = tokio::signal::ctrl_c() => {
                for rest in resumed {
                    if let Err(e) = workflow.cancel(rest).await {
                        tracing::warn!(run_id = %rest, error = %e, "cancel failed");
                    }
                }
                workflow.await_completion(id).await
            }
        };
        match outcome {
            Ok(RunOutcome::Completed { .. }) => {
                tracing::info!(run_id = %id, "resumed run completed")
            }
            Ok(RunOutcome::Failed(failure)) => {
                tracing::warn!(run_id = %id, failure = %failure, "resumed run failed")
            }
            Err(e) => tracing::warn!(run_id = %id, error = %e, "resumed run did not finish"),
        }
    }
}
