//! SummarizeOrQuery 工具：把一段文本压缩为要点；可指定关注点

use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::decode::{decode_free_text, DecodeError};
use crate::tools::schema::{require_non_empty, Validate};
use crate::tools::StructuredTool;

pub const SUMMARIZE_TOOL: &str = "summarize_or_query";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SummarizeInput {
    /// Text content to summarize
    pub text: String,
    /// Optional question or aspect to focus the summary on
    #[serde(default)]
    pub focus: Option<String>,
}

impl Validate for SummarizeInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("text", &self.text)?;
        if let Some(focus) = &self.focus {
            require_non_empty("focus", focus)?;
        }
        Ok(())
    }
}

pub struct SummarizeTool;

impl StructuredTool for SummarizeTool {
    type Input = SummarizeInput;
    type Output = String;

    fn name(&self) -> &'static str {
        SUMMARIZE_TOOL
    }

    fn description(&self) -> &'static str {
        "Summarizes a document into key points, optionally answering a focused question about it."
    }

    fn framing(&self) -> &'static str {
        "Summarize the following text into concise key points:"
    }

    fn prompt(&self, input: &SummarizeInput) -> String {
        match &input.focus {
            Some(focus) => format!("Focus on: {focus}\n\n{}", input.text),
            None => input.text.clone(),
        }
    }

    fn decode(&self, raw: &str) -> Result<String, DecodeError> {
        decode_free_text(raw)
    }
}
