//! 工具注册表
//!
//! 每个工具实现 StructuredTool（输入 Schema、prompt 模板、输出解码、失败兜底）；
//! ToolRegistry 按名登记工具描述，用于生成编排器 system prompt 中的工具清单。

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::tools::decode::DecodeError;
use crate::tools::schema::{input_schema, Validate};

/// 结构化工具：对一次模型调用的类型化包装
pub trait StructuredTool: Send + Sync {
    type Input: DeserializeOwned + JsonSchema + Validate + Send + Sync;
    type Output: Serialize + Send;

    /// 工具名称
    fn name(&self) -> &'static str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &'static str;

    /// 工具自带的任务说明，置于 prompt 模板之前
    fn framing(&self) -> &'static str;

    /// 由已校验输入确定性地构造 prompt
    fn prompt(&self, input: &Self::Input) -> String;

    /// 解析并校验模型原始输出
    fn decode(&self, raw: &str) -> Result<Self::Output, DecodeError>;

    /// 解码失败时的确定性兜底；None 表示失败向上抛出
    fn fallback(&self, _input: &Self::Input, _err: &DecodeError) -> Option<Self::Output> {
        None
    }
}

/// 工具描述 trait：名称、描述、参数 schema（对象安全，可放入注册表）
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
}

impl<T: StructuredTool> Tool for T {
    fn name(&self) -> &str {
        StructuredTool::name(self)
    }

    fn description(&self) -> &str {
        StructuredTool::description(self)
    }

    fn parameters_schema(&self) -> Value {
        input_schema::<T::Input>()
    }
}

/// 工具注册表：按名称有序存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 工具清单 JSON（名称、描述、参数 schema），按名称排序，输出确定
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
