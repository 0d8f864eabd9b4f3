//! Plan 工具：把研究主题拆成 1..=N 个子任务
//!
//! 唯一必须成功的工具：解析或校验失败时返回由主题派生的五个默认子任务，绝不返回空列表。

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::decode::{clean_model_text, extract_json_array, parse_numbered_list, DecodeError};
use crate::tools::schema::{require_non_empty, Validate};
use crate::tools::StructuredTool;

pub const PLAN_TOOL: &str = "plan_query";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanInput {
    /// The original user research question
    pub topic: String,
}

impl Validate for PlanInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("topic", &self.topic)
    }
}

pub struct PlanTool {
    max_subtasks: usize,
}

impl PlanTool {
    pub fn new(max_subtasks: usize) -> Self {
        Self {
            max_subtasks: max_subtasks.max(1),
        }
    }
}

/// 由主题派生的默认计划（恰好五项）
pub fn fallback_subtasks(topic: &str) -> Vec<String> {
    vec![
        format!("Define key concepts and terms in the query: \"{topic}\""),
        format!("Identify relevant domains or disciplines for \"{topic}\""),
        format!("Search for recent literature or data related to \"{topic}\""),
        format!("Compare different approaches or findings for \"{topic}\""),
        format!("Summarize potential implications or conclusions for \"{topic}\""),
    ]
}

/// 子任务列表约束：1..=max 项、非空、互不相同；不去重不重排
pub fn validate_subtasks(items: &[String], max: usize) -> Result<(), DecodeError> {
    if items.is_empty() {
        return Err(DecodeError::Shape("plan has no subtasks".to_string()));
    }
    if items.len() > max {
        return Err(DecodeError::Shape(format!(
            "plan has {} subtasks, at most {max} allowed",
            items.len()
        )));
    }
    if items.iter().any(|s| s.trim().is_empty()) {
        return Err(DecodeError::Shape("subtask cannot be empty".to_string()));
    }
    let mut seen = HashSet::new();
    if !items.iter().all(|s| seen.insert(s.as_str())) {
        return Err(DecodeError::Shape("subtasks must be distinct".to_string()));
    }
    Ok(())
}

impl StructuredTool for PlanTool {
    type Input = PlanInput;
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        PLAN_TOOL
    }

    fn description(&self) -> &'static str {
        "Breaks a research query into 3-5 distinct, actionable subtasks that collectively contribute to a comprehensive research report. Each subtask focuses on a unique aspect of the query."
    }

    fn framing(&self) -> &'static str {
        "You are a research planning expert."
    }

    fn prompt(&self, input: &PlanInput) -> String {
        format!(
            r#"Break down the following research query into 3-{max} specific, distinct, and actionable subtasks. Each subtask should:
- Focus on a unique aspect of the query.
- Be clear, concise, and actionable (e.g., start with a verb like "Identify", "Analyze", "Search").
- Contribute to a comprehensive research report when combined.
- Avoid overlap with other subtasks.

Query: "{topic}"

Return a JSON array of subtasks, where each subtask is a string describing a specific research task. For example:
["Identify key challenges in X", "Search for recent studies on Y", "Analyze the impact of Z"]

Ensure the subtasks are tailored to the query's context and domain."#,
            max = self.max_subtasks.max(3),
            topic = input.topic
        )
    }

    fn decode(&self, raw: &str) -> Result<Vec<String>, DecodeError> {
        let text = clean_model_text(raw);
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        let items = match extract_json_array(&text) {
            Some(json) => serde_json::from_str::<Vec<String>>(json)
                .map_err(|e| DecodeError::Json(e.to_string()))?,
            None => parse_numbered_list(&text).ok_or_else(|| {
                DecodeError::Shape("expected a JSON array of subtask strings".to_string())
            })?,
        };

        validate_subtasks(&items, self.max_subtasks)?;
        Ok(items)
    }

    fn fallback(&self, input: &PlanInput, err: &DecodeError) -> Option<Vec<String>> {
        tracing::warn!(error = %err, "plan output rejected, using default subtasks");
        Some(fallback_subtasks(&input.topic))
    }
}
