use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::decode::{decode_free_text, DecodeError};
use crate::tools::schema::{require_non_empty, Validate};
use crate::tools::StructuredTool;

pub const GENERATE_REPORT_TOOL: &str = "generate_report";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReportInput {
    /// The original research topic
    pub topic: String,
    /// Concatenated research findings
    pub findings: String,
}

impl Validate for ReportInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("topic", &self.topic)?;
        require_non_empty("findings", &self.findings)
    }
}

pub struct GenerateReportTool;

impl StructuredTool for GenerateReportTool {
    type Input = ReportInput;
    type Output = String;

    fn name(&self) -> &'static str {
        GENERATE_REPORT_TOOL
    }

    fn description(&self) -> &'static str {
        "Generates a final Markdown research report based on research findings."
    }

    fn framing(&self) -> &'static str {
        "Generate a final report based on research findings:"
    }

    fn prompt(&self, input: &ReportInput) -> String {
        format!(
            r#"Generate a comprehensive research report in Markdown format.

Topic: {}

Research Findings:
{}

Format:
# [Report Title]

## Executive Summary
[Brief overview]

## Key Findings
- Finding 1
- Finding 2

## Analysis
[Detailed analysis]

## Conclusions
[Main conclusions]

## References
- Source 1
- Source 2

Report:"#,
            input.topic, input.findings
        )
    }

    fn decode(&self, raw: &str) -> Result<String, DecodeError> {
        decode_free_text(raw)
    }
}
