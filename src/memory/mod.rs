//! 记忆层：单次 Run 的会话线程

pub mod conversation;

pub use conversation::{Message, Role, Thread};
