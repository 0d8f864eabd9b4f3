//! 阶段追踪：对外展示的研究进度
//!
//! 有限状态机 None -> Planning -> Researching -> Finalizing -> None，失败时任意阶段直接回到 None。
//! 每个阶段带固定的名称、描述与子步骤标签，只用于展示「正在做什么」，从不参与工作流决策。

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// 研究阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    None,
    Planning,
    Researching,
    Finalizing,
}

/// 阶段的静态展示信息
#[derive(Debug, Clone, Copy)]
pub struct StageInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub sub_steps: &'static [&'static str],
}

const PLANNING: StageInfo = StageInfo {
    name: "Planning Research",
    description: "Analyzing the topic and creating research strategy",
    sub_steps: &["Understanding the topic", "Identifying key areas", "Planning approach"],
};

const RESEARCHING: StageInfo = StageInfo {
    name: "Conducting Research",
    description: "Gathering information from various sources",
    sub_steps: &["Searching databases", "Analyzing sources", "Collecting data"],
};

const FINALIZING: StageInfo = StageInfo {
    name: "Finalizing Report",
    description: "Compiling and structuring the final report",
    sub_steps: &["Organizing findings", "Writing report", "Final review"],
};

impl Stage {
    /// 固定顺序中的下一阶段
    pub fn next(self) -> Stage {
        match self {
            Stage::None => Stage::Planning,
            Stage::Planning => Stage::Researching,
            Stage::Researching => Stage::Finalizing,
            Stage::Finalizing => Stage::None,
        }
    }

    pub fn info(self) -> Option<StageInfo> {
        match self {
            Stage::None => None,
            Stage::Planning => Some(PLANNING),
            Stage::Researching => Some(RESEARCHING),
            Stage::Finalizing => Some(FINALIZING),
        }
    }

    pub fn sub_steps(self) -> &'static [&'static str] {
        self.info().map(|i| i.sub_steps).unwrap_or(&[])
    }
}

/// 推送给展示层的快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub name: Option<&'static str>,
    pub sub_steps: Vec<&'static str>,
}

impl StageSnapshot {
    fn of(stage: Stage) -> Self {
        Self {
            stage,
            name: stage.info().map(|i| i.name),
            sub_steps: stage.sub_steps().to_vec(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StageError {
    #[error("stage cannot move from {from:?} to {to:?}")]
    Backward { from: Stage, to: Stage },
}

/// 单个 Run 的阶段状态机；watch 通道推送快照，同时保留转换日志
pub struct StageTracker {
    tx: watch::Sender<StageSnapshot>,
    transitions: Mutex<Vec<Stage>>,
}

impl StageTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StageSnapshot::of(Stage::None));
        Self {
            tx,
            transitions: Mutex::new(vec![Stage::None]),
        }
    }

    pub fn current(&self) -> Stage {
        self.tx.borrow().stage
    }

    pub fn snapshot(&self) -> StageSnapshot {
        self.tx.borrow().clone()
    }

    /// 只读订阅（展示层轮询或推送）
    pub fn subscribe(&self) -> watch::Receiver<StageSnapshot> {
        self.tx.subscribe()
    }

    /// 已发生的阶段序列，首项恒为 None
    pub fn transitions(&self) -> Vec<Stage> {
        self.lock().clone()
    }

    /// None -> Planning
    pub fn begin(&self) -> Result<(), StageError> {
        self.advance_to(Stage::Planning)
    }

    /// 沿固定顺序前进到 target，中间阶段依次发出；目标不在前方时报错
    pub fn advance_to(&self, target: Stage) -> Result<(), StageError> {
        let from = self.current();
        if target == from {
            return Ok(());
        }
        if target == Stage::None || target < from {
            return Err(StageError::Backward { from, to: target });
        }
        let mut stage = from;
        while stage != target {
            stage = stage.next();
            self.emit(stage);
        }
        Ok(())
    }

    /// 合成完成：Finalizing -> None
    pub fn finish(&self) -> Result<(), StageError> {
        let from = self.current();
        if from != Stage::Finalizing {
            return Err(StageError::Backward {
                from,
                to: Stage::None,
            });
        }
        self.emit(Stage::None);
        Ok(())
    }

    /// Run 失败：从任意阶段回到 None
    pub fn reset(&self) {
        if self.current() != Stage::None {
            self.emit(Stage::None);
        }
    }

    fn emit(&self, stage: Stage) {
        self.lock().push(stage);
        self.tx.send_replace(StageSnapshot::of(stage));
        tracing::debug!(stage = ?stage, "stage transition");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Stage>> {
        self.transitions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}
