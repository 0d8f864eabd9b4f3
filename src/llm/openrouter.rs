//! OpenRouter 客户端（OpenAI 兼容格式）
//!
//! OpenRouter 提供与 OpenAI 兼容的 API 接口，可路由到多家模型。
//! - Base URL: https://openrouter.ai/api/v1
//! - 默认模型: deepseek/deepseek-r1-0528:free（推理模型，输出可能带 <think> 块）

use crate::config::ProviderConfig;
use crate::llm::OpenAiClient;

/// OpenRouter API 常量
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_DEFAULT_MODEL: &str = "deepseek/deepseek-r1-0528:free";
pub const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// 创建 OpenRouter 客户端
///
/// ProviderConfig 未设置 base_url 时使用 OpenRouter 端点；模型与 key 照搬配置
pub fn create_openrouter_client(provider: &ProviderConfig) -> OpenAiClient {
    let mut provider = provider.clone();
    if provider.base_url.is_none() {
        provider.base_url = Some(OPENROUTER_BASE_URL.to_string());
    }
    OpenAiClient::new(&provider)
}
