//! 模型输出解码辅助
//!
//! 模型回复一律视为不可信输入：先去掉推理模型的 `<think>` 块与 Markdown 代码围栏，
//! 再交给各工具按自身的输出契约解析；失败时给出具名的 DecodeError。

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("model returned no content")]
    Empty,

    #[error("output is not valid JSON: {0}")]
    Json(String),

    #[error("output has the wrong shape: {0}")]
    Shape(String),
}

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"))
}

/// 整段回复被一个围栏包住时才匹配
fn whole_reply_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\A```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?[ \t]*```\z").expect("valid regex")
    })
}

fn numbered_item() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s+(.+?)\s*$").expect("valid regex"))
}

/// 去掉 `<think>` 块；只有整段回复被围栏包住时才拆掉围栏，正文中的代码块原样保留
pub fn clean_model_text(raw: &str) -> String {
    let without_think = think_block().replace_all(raw, "");
    let text = without_think.trim();
    match whole_reply_fence().captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.to_string(),
    }
}

/// 第一个 '[' 到最后一个 ']' 之间的片段
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// 「1. xxx\n2. yyy」形式的编号列表；没有任何编号行时返回 None
pub fn parse_numbered_list(text: &str) -> Option<Vec<String>> {
    let items: Vec<String> = numbered_item()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// 自由文本输出：清理后非空即可
pub fn decode_free_text(raw: &str) -> Result<String, DecodeError> {
    let text = clean_model_text(raw);
    if text.is_empty() {
        Err(DecodeError::Empty)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_think_and_fence() {
        let raw = "<think>let me see\n[\"no\"]</think>\n```json\n[\"a\", \"b\"]\n```";
        assert_eq!(clean_model_text(raw), "[\"a\", \"b\"]");
    }

    #[test]
    fn test_keeps_inline_code_blocks() {
        let raw = "Intro\n```python\nprint(1)\n```\nOutro";
        assert_eq!(clean_model_text(raw), raw);
    }

    #[test]
    fn test_extract_json_array_from_prose() {
        let text = "Here you go: [\"x\", \"y\"] hope it helps";
        assert_eq!(extract_json_array(text), Some("[\"x\", \"y\"]"));
        assert_eq!(extract_json_array("no array"), None);
    }

    #[test]
    fn test_numbered_list() {
        let text = "Plan:\n1. Identify storage types\n2) Analyze costs\nnot an item";
        assert_eq!(
            parse_numbered_list(text).unwrap(),
            vec!["Identify storage types", "Analyze costs"]
        );
        assert!(parse_numbered_list("just prose").is_none());
    }

    #[test]
    fn test_free_text_rejects_blank() {
        assert_eq!(decode_free_text("<think>hmm</think>   "), Err(DecodeError::Empty));
        assert_eq!(decode_free_text(" report ").unwrap(), "report");
    }
}
