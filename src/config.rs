//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DELVE__*` 覆盖（双下划线表示嵌套，如 `DELVE__AGENT__MAX_RETRIES=2`）。
//! Provider 的 API Key 只从 `llm.api_key_env` 指定的环境变量读取，缺失时启动即失败。

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::{OPENROUTER_API_KEY_ENV, OPENROUTER_DEFAULT_MODEL};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub workflow: WorkflowSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：端点、模型、密钥所在环境变量、超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 未设置时使用 OpenRouter 端点
    pub base_url: Option<String>,
    pub model: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: OPENROUTER_DEFAULT_MODEL.to_string(),
            api_key_env: OPENROUTER_API_KEY_ENV.to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// [agent] 段：编排器预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单个 Run 内角色/工具调用总次数上限
    pub max_steps: usize,
    /// 单步失败后的最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    /// 计划中子任务数量上限
    pub max_subtasks: usize,
    /// 子任务研究并发度
    pub research_concurrency: usize,
    /// 研究结果是否再经过 Analyst 角色分析
    pub analyze_findings: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_retries: 5,
            max_subtasks: 5,
            research_concurrency: 3,
            analyze_findings: false,
        }
    }
}

/// [workflow] 段：checkpoint 目录与报告归档
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkflowSection {
    /// 未设置时 checkpoint 仅保存在内存（进程重启不可恢复）
    pub checkpoint_dir: Option<PathBuf>,
    /// SQLite 报告归档路径；未设置则不归档
    pub archive_path: Option<PathBuf>,
}

/// 启动配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("config load failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// 传给 Completion Client 构造函数的显式 Provider 配置
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub api_key: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    /// 从 [llm] 段与环境变量构建；API Key 缺失或为空时返回 MissingApiKey
    pub fn from_config(llm: &LlmSection) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(llm.api_key_env.clone()))?;

        Ok(Self {
            base_url: llm.base_url.clone(),
            api_key,
            model: llm.model.clone(),
            request_timeout_secs: llm.request_timeout_secs,
        })
    }
}

/// 从 config 目录加载配置，环境变量 DELVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DELVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DELVE")
            .separator("__")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}
