//! Checkpoint 存储
//!
//! 每完成一步即保存整条 RunRecord。FileCheckpointStore 每个 Run 一个 JSON 文件，
//! 先写临时文件再 rename，进程崩溃时不会留下半截 checkpoint。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::workflow::types::{RunRecord, RunStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError>;

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;

    /// 全部仍处于 running 的 Run（进程重启后恢复用）
    async fn list_running(&self) -> Result<Vec<RunRecord>, StoreError>;
}

/// 内存存储（测试 / 未配置 checkpoint 目录时）
#[derive(Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<String, RunRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.records.read().await.get(run_id).cloned())
    }

    async fn list_running(&self) -> Result<Vec<RunRecord>, StoreError> {
        let mut running: Vec<RunRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == RunStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(|r| r.created_at);
        Ok(running)
    }
}

/// 文件存储：<dir>/<run_id>.json
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// 目录不存在时创建
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// run_id 只允许字母数字、'_' 与 '-'，防止路径穿越
    fn path_for(&self, run_id: &str) -> Option<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| self.dir.join(format!("{run_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.run_id).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid run id: {}", record.run_id),
            )
        })?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let Some(path) = self.path_for(run_id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_running(&self) -> Result<Vec<RunRecord>, StoreError> {
        let mut running = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<RunRecord>(&data) {
                Ok(record) if record.status == RunStatus::Running => running.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable checkpoint"
                    );
                }
            }
        }
        running.sort_by_key(|r| r.created_at);
        Ok(running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::StepOutput;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let mut record = RunRecord::new("grid storage");
        record.record(StepOutput::Plan {
            subtasks: vec!["a".into()],
        });
        store.save(&record).await.unwrap();

        let loaded = store.load(&record.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.steps, record.steps);
        assert!(!dir
            .path()
            .join(format!("{}.json.tmp", record.run_id))
            .exists());
    }

    #[tokio::test]
    async fn test_file_store_lists_only_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let running = RunRecord::new("a");
        let mut done = RunRecord::new("b");
        done.status = RunStatus::Completed;
        store.save(&running).await.unwrap();
        store.save(&done).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), "{").unwrap();

        let pending = store.list_running().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_id, running.run_id);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        assert!(store.load("../etc/passwd").await.unwrap().is_none());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        let record = RunRecord::new("a");
        store.save(&record).await.unwrap();
        assert!(store.load(&record.run_id).await.unwrap().is_some());
        assert_eq!(store.list_running().await.unwrap().len(), 1);
    }
}
