//! 会话线程：单次研究 Run 的对话历史
//!
//! Thread 只追加不删除；由创建它的 Run 独占，随 checkpoint 一起持久化，恢复后上下文不丢失。
//! 并行研究时每个子任务在 fork 出的分支上工作，批次结束后按子任务顺序把分支增量追加回主线程。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 追加式会话线程
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    thread_id: String,
    turns: Vec<Message>,
}

impl Thread {
    pub fn new() -> Self {
        Self {
            thread_id: format!("thread_{}", uuid::Uuid::new_v4()),
            turns: Vec::new(),
        }
    }

    /// 以一条 system 消息开头的线程（编排器前言 + 工具清单）
    pub fn with_system(preamble: impl Into<String>) -> Self {
        let mut thread = Self::new();
        thread.push(Message::system(preamble));
        thread
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn push(&mut self, msg: Message) {
        self.turns.push(msg);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 派生分支：同一 thread_id，复制当前全部消息
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// 分支在 fork 之后新增的消息
    pub fn delta_since(&self, base_len: usize) -> &[Message] {
        &self.turns[base_len.min(self.turns.len())..]
    }

    /// 合并分支增量（按调用顺序追加）
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Message>) {
        self.turns.extend(turns);
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_is_append_only_and_ordered() {
        let mut thread = Thread::with_system("preamble");
        thread.push(Message::user("q"));
        thread.push(Message::assistant("a"));
        let roles: Vec<Role> = thread.turns().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert!(thread.thread_id().starts_with("thread_"));
    }

    #[test]
    fn test_fork_delta_merges_back() {
        let mut main = Thread::with_system("preamble");
        let base = main.len();
        let mut branch = main.fork();
        branch.push(Message::user("sub"));
        branch.push(Message::assistant("found"));
        assert_eq!(branch.thread_id(), main.thread_id());

        main.extend(branch.delta_since(base).to_vec());
        assert_eq!(main.len(), 3);
        assert_eq!(main.turns()[2].content, "found");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(json.contains("\"user\""));
    }
}
