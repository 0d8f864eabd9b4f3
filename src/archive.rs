//! 报告归档：已完成 Run 的 (topic, report) 持久化
//!
//! 工作流在 Run 完成后调用 ReportArchive::store；归档失败只记日志，不影响 Run 结果。
//! SqliteReportArchive 使用同步 rusqlite，所有操作放进 spawn_blocking。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("archive task failed: {0}")]
    Join(String),
}

/// 已归档的报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedReport {
    pub id: i64,
    pub run_id: String,
    pub topic: String,
    pub report: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportArchive: Send + Sync {
    /// 保存一份报告，返回归档 ID
    async fn store(&self, run_id: &str, topic: &str, report: &str) -> Result<i64, ArchiveError>;

    /// 按时间倒序列出全部报告
    async fn list(&self) -> Result<Vec<ArchivedReport>, ArchiveError>;
}

/// SQLite 报告归档
#[derive(Clone)]
pub struct SqliteReportArchive {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReportArchive {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, ArchiveError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ArchiveError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                topic TEXT NOT NULL,
                report TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reports_created ON reports(created_at);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, ArchiveError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&conn).map_err(ArchiveError::from)
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
    }
}

#[async_trait]
impl ReportArchive for SqliteReportArchive {
    async fn store(&self, run_id: &str, topic: &str, report: &str) -> Result<i64, ArchiveError> {
        let (run_id, topic, report) = (run_id.to_string(), topic.to_string(), report.to_string());
        self.with_conn(move |conn| {
            // 同一 Run 重复归档（恢复后再次完成）时覆盖
            conn.execute(
                "INSERT INTO reports (run_id, topic, report, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_id) DO UPDATE SET topic = excluded.topic, report = excluded.report",
                params![run_id, topic, report, Utc::now()],
            )?;
            conn.query_row(
                "SELECT id FROM reports WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ArchivedReport>, ArchiveError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, topic, report, created_at FROM reports ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ArchivedReport {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    topic: row.get(2)?,
                    report: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            let reports = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(reports)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_list() {
        let archive = SqliteReportArchive::in_memory().unwrap();
        archive.store("run_a", "grid storage", "# A").await.unwrap();
        archive.store("run_b", "solar", "# B").await.unwrap();

        let reports = archive.list().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].run_id, "run_b");
        assert_eq!(reports[1].topic, "grid storage");
    }

    #[tokio::test]
    async fn test_same_run_overwrites() {
        let archive = SqliteReportArchive::in_memory().unwrap();
        let first = archive.store("run_a", "t", "old").await.unwrap();
        let second = archive.store("run_a", "t", "new").await.unwrap();
        assert_eq!(first, second);

        let reports = archive.list().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report, "new");
    }

    #[tokio::test]
    async fn test_file_backed_archive_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.db");
        {
            let archive = SqliteReportArchive::open(&path).unwrap();
            archive.store("run_a", "t", "body").await.unwrap();
        }
        let reopened = SqliteReportArchive::open(&path).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
