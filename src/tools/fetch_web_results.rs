//! FetchWebResults 工具：由模型为主题给出网页结果列表
//!
//! 不做真实网络检索，结果完全来自模型知识。输出契约：非空 JSON 数组，
//! 元素为字符串或含 snippet（可带 title / url）的对象。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::decode::{clean_model_text, extract_json_array, DecodeError};
use crate::tools::schema::{require_non_empty, Validate};
use crate::tools::StructuredTool;

pub const FETCH_WEB_RESULTS_TOOL: &str = "fetch_web_results";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FetchInput {
    /// The topic to search for
    pub topic: String,
}

impl Validate for FetchInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("topic", &self.topic)
    }
}

/// 单条网页结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub snippet: String,
}

impl WebResult {
    /// 供 Summarize 使用的单行文本
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        if let Some(title) = &self.title {
            line.push_str(title);
            line.push_str(": ");
        }
        line.push_str(&self.snippet);
        if let Some(url) = &self.url {
            line.push_str(&format!(" ({url})"));
        }
        line
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResult {
    Text(String),
    Object {
        #[serde(default, alias = "name")]
        title: Option<String>,
        #[serde(default, alias = "link", alias = "source")]
        url: Option<String>,
        #[serde(default, alias = "summary", alias = "content", alias = "description")]
        snippet: Option<String>,
    },
}

impl RawResult {
    fn into_result(self) -> Option<WebResult> {
        match self {
            RawResult::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| WebResult {
                    title: None,
                    url: None,
                    snippet: s.to_string(),
                })
            }
            RawResult::Object {
                title,
                url,
                snippet,
            } => {
                // 没有 snippet 时用 title 充当正文
                let snippet = snippet
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| title.clone().filter(|t| !t.trim().is_empty()))?;
                Some(WebResult {
                    title,
                    url,
                    snippet,
                })
            }
        }
    }
}

pub struct FetchWebResultsTool;

impl StructuredTool for FetchWebResultsTool {
    type Input = FetchInput;
    type Output = Vec<WebResult>;

    fn name(&self) -> &'static str {
        FETCH_WEB_RESULTS_TOOL
    }

    fn description(&self) -> &'static str {
        "Fetches web results for a given topic."
    }

    fn framing(&self) -> &'static str {
        "You are a web search expert."
    }

    fn prompt(&self, input: &FetchInput) -> String {
        format!(
            "Fetch web results for the following topic:\n{}\n\n\
             Return only the web results in a JSON array format, each item an object with \
             \"title\", \"url\" and \"snippet\". Do not include any additional text or explanation.",
            input.topic
        )
    }

    fn decode(&self, raw: &str) -> Result<Vec<WebResult>, DecodeError> {
        let text = clean_model_text(raw);
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }
        let json = extract_json_array(&text)
            .ok_or_else(|| DecodeError::Shape("expected a JSON array of web results".to_string()))?;
        let items: Vec<RawResult> =
            serde_json::from_str(json).map_err(|e| DecodeError::Json(e.to_string()))?;

        let results: Vec<WebResult> = items
            .into_iter()
            .filter_map(RawResult::into_result)
            .collect();
        if results.is_empty() {
            return Err(DecodeError::Shape("no usable web results".to_string()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_objects_and_strings() {
        let raw = r#"```json
[
  {"title": "Grid storage", "link": "https://example.org/a", "summary": "Batteries dominate"},
  "Pumped hydro still leads capacity"
]
```"#;
        let out = FetchWebResultsTool.decode(raw).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].url.as_deref(), Some("https://example.org/a"));
        assert_eq!(out[0].snippet, "Batteries dominate");
        assert_eq!(out[1].title, None);
        assert_eq!(out[0].to_line(), "Grid storage: Batteries dominate (https://example.org/a)");
    }

    #[test]
    fn test_decode_rejects_prose_and_empty_array() {
        assert!(matches!(
            FetchWebResultsTool.decode("I searched the web for you."),
            Err(DecodeError::Shape(_))
        ));
        assert!(FetchWebResultsTool.decode("[]").is_err());
        assert!(FetchWebResultsTool.decode("").is_err());
    }

    #[test]
    fn test_no_fallback() {
        let input = FetchInput { topic: "t".into() };
        assert!(FetchWebResultsTool.fallback(&input, &DecodeError::Empty).is_none());
    }
}
