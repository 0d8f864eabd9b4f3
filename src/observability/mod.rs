//! 可观测性：日志初始化与 token 用量记账
//!
//! UsageHook 在每次底层 LLM 调用后被同步调用，不返回错误、不阻塞主流程。
//! UsageLedger 是进程级的追加式账本：原子累计 + 互斥保护的记录列表，多个 Run 并发写入不会交错损坏。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::llm::TokenUsage;

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// 用量回调：模型标识 + token 数
pub trait UsageHook: Send + Sync {
    fn record(&self, model: &str, usage: &TokenUsage);
}

/// 单条用量记录
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub model: String,
    pub usage: TokenUsage,
    pub at: DateTime<Utc>,
}

/// 追加式用量账本
#[derive(Debug, Default)]
pub struct UsageLedger {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计 (prompt, completion, total)
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl UsageHook for UsageLedger {
    fn record(&self, model: &str, usage: &TokenUsage) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);

        let record = UsageRecord {
            model: model.to_string(),
            usage: *usage,
            at: Utc::now(),
        };
        // 被毒化的锁仍可追加
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record);
        drop(records);

        tracing::info!(
            model = %model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "token usage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ledger_accumulates() {
        let ledger = UsageLedger::new();
        ledger.record("m", &TokenUsage::new(10, 5));
        ledger.record("m", &TokenUsage::new(1, 1));
        assert_eq!(ledger.totals(), (11, 6, 17));
        assert_eq!(ledger.records().len(), 2);
    }

    #[test]
    fn test_concurrent_writers_keep_every_record() {
        let ledger = Arc::new(UsageLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        ledger.record("m", &TokenUsage::new(1, 1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.records().len(), 400);
        assert_eq!(ledger.totals().2, 800);
    }
}
