//! 工具输入 Schema 与校验（schemars 自动生成参数 Schema）
//!
//! Schema 拼入编排器 system prompt，告诉模型每个工具需要哪些字段；
//! Validate 在调用模型前检查字段约束，不通过即 InvalidToolInput。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 输入字段约束
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// 非空（忽略首尾空白）字符串约束
pub fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} cannot be empty"))
    } else {
        Ok(())
    }
}

/// 输入类型的 JSON Schema
pub fn input_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({}))
}
