//! LLM 层：客户端抽象与实现（OpenAI 兼容 / OpenRouter / Mock）

pub mod mock;
pub mod openai;
pub mod openrouter;
pub mod traits;

pub use mock::{MockLlmClient, MockReply};
pub use openai::OpenAiClient;
pub use openrouter::{
    create_openrouter_client, OPENROUTER_API_KEY_ENV, OPENROUTER_BASE_URL, OPENROUTER_DEFAULT_MODEL,
};
pub use traits::{Completion, LlmClient, LlmError, TokenUsage};
