//! 结构化输出提取
//!
//! 生成式文本不保证是合法 JSON，这里按固定优先级尝试：
//! 工具结果（已是结构化对象）-> 候选块（带标签代码块 / JSON 样代码块 / 平衡花括号 / 贪婪花括号，
//! 按长度从长到短解析）-> 全文解析 -> 状态短语兜底。
//! 每个候选策略都是独立的纯函数 `&str -> Vec<String>`，可单独测试。

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use super::result::{ParsedSource, TurnResult};

static TAGGED_FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ANY_FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static GREEDY_BRACES_RE: OnceLock<Option<Regex>> = OnceLock::new();
static STATUS_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 候选块提取策略（按此顺序收集）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// ```json ... ```
    TaggedFence,
    /// 任意代码块，内容以 { 或 [ 开头
    JsonLikeFence,
    /// 基于栈匹配的顶层 {...}
    BalancedBraces,
    /// 从第一个 { 到最后一个 }
    GreedyBraces,
}

impl ExtractionStrategy {
    pub const CHAIN: [ExtractionStrategy; 4] = [
        ExtractionStrategy::TaggedFence,
        ExtractionStrategy::JsonLikeFence,
        ExtractionStrategy::BalancedBraces,
        ExtractionStrategy::GreedyBraces,
    ];

    pub fn candidates(&self, text: &str) -> Vec<String> {
        match self {
            ExtractionStrategy::TaggedFence => cached(&TAGGED_FENCE_RE, r"(?is)```json\s*(.*?)```")
                .map(|re| {
                    re.captures_iter(text)
                        .filter_map(|c| c.get(1))
                        .map(|m| m.as_str().trim().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            ExtractionStrategy::JsonLikeFence => cached(&ANY_FENCE_RE, r"(?s)```\s*(.*?)```")
                .map(|re| {
                    re.captures_iter(text)
                        .filter_map(|c| c.get(1))
                        .map(|m| m.as_str().trim())
                        .filter(|body| body.starts_with('{') || body.starts_with('['))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ExtractionStrategy::BalancedBraces => balanced_brace_spans(text),
            ExtractionStrategy::GreedyBraces => greedy_brace_span(text).into_iter().collect(),
        }
    }
}

/// 栈匹配：每当栈清空时得到一个顶层 {...}
fn balanced_brace_spans(text: &str) -> Vec<String> {
    let mut stack: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => stack.push(i),
            '}' => {
                if let Some(start) = stack.pop() {
                    if stack.is_empty() {
                        spans.push(text[start..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

fn greedy_brace_span(text: &str) -> Option<String> {
    cached(&GREEDY_BRACES_RE, r"\{[\s\S]*\}")
        .and_then(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

/// 收集所有候选，去重（保序）后按长度降序
pub fn collect_candidates(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<String> = ExtractionStrategy::CHAIN
        .iter()
        .flat_map(|s| s.candidates(text))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect();
    candidates.sort_by_key(|c| Reverse(c.chars().count()));
    candidates
}

/// 候选块中第一个能解析的
pub fn parse_candidates(text: &str) -> Option<Value> {
    collect_candidates(text)
        .iter()
        .find_map(|c| serde_json::from_str(c).ok())
}

pub fn parse_full_text(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// 状态短语兜底：OUTCOME OK / OUTCOME: ERROR / OUTCOME_OK / 裸 OK、SUCCESS、ERROR、FAIL
///
/// 下划线先视为空格，状态词两侧都要求单词边界（`OUTCOMEOK` 不算）。
pub fn status_fallback(text: &str) -> Option<Value> {
    let cleaned = text.trim().to_uppercase().replace('_', " ");
    let status = cached(&STATUS_RE, r"OUTCOME[:\s-]*\b(OK|SUCCESS|FAIL|ERROR)\b")
        .and_then(|re| re.captures(&cleaned))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| match cleaned.as_str() {
            "OK" | "SUCCESS" | "ERROR" | "FAIL" => Some(cleaned.clone()),
            _ => None,
        })?;
    let outcome = match status.as_str() {
        "OK" | "SUCCESS" => "OK",
        _ => "ERROR",
    };
    Some(json!({ "outcome": outcome }))
}

/// 工具结果本身是对象时直接作为结构化负载
pub fn from_tool_responses(turn: &TurnResult) -> Option<Value> {
    turn.tool_responses.values().find(|v| v.is_object()).cloned()
}

/// 完整提取链（不含重试）
pub fn extract(turn: &TurnResult) -> Option<(Value, ParsedSource)> {
    if let Some(v) = from_tool_responses(turn) {
        return Some((v, ParsedSource::ToolResponse));
    }
    extract_text(&turn.text)
}

/// 只针对文本的提取链
pub fn extract_text(text: &str) -> Option<(Value, ParsedSource)> {
    if text.trim().is_empty() {
        return None;
    }
    if let Some(v) = parse_candidates(text) {
        return Some((v, ParsedSource::ExtractedBlock));
    }
    if let Some(v) = parse_full_text(text) {
        return Some((v, ParsedSource::FullText));
    }
    status_fallback(text).map(|v| (v, ParsedSource::StatusFallback))
}

/// 重试响应只做直接 JSON 解析与贪婪花括号匹配
pub fn extract_retry(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    parse_full_text(text)
        .or_else(|| greedy_brace_span(text).and_then(|c| serde_json::from_str(&c).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_fence() {
        let text = "noise ```json\n{\"sql_required\": true, \"python_required\": false}\n``` more noise";
        let (v, src) = extract_text(text).unwrap();
        assert_eq!(v, json!({"sql_required": true, "python_required": false}));
        assert_eq!(src, ParsedSource::ExtractedBlock);
        assert_eq!(
            ExtractionStrategy::TaggedFence.candidates(text),
            vec!["{\"sql_required\": true, \"python_required\": false}".to_string()]
        );
    }

    #[test]
    fn test_untagged_fence_needs_json_start() {
        let text = "```\n[1, 2]\n```\n```\nplain words\n```";
        assert_eq!(
            ExtractionStrategy::JsonLikeFence.candidates(text),
            vec!["[1, 2]".to_string()]
        );
    }

    #[test]
    fn test_balanced_braces_finds_each_top_level_object() {
        let text = r#"a {"x": {"y": 1}} b {"z": 2} c"#;
        assert_eq!(
            ExtractionStrategy::BalancedBraces.candidates(text),
            vec![r#"{"x": {"y": 1}}"#.to_string(), r#"{"z": 2}"#.to_string()]
        );
    }

    #[test]
    fn test_longer_block_wins() {
        let text = r#"first {"a": 1} then {"greeting": "hi", "sql_required": true}"#;
        let (v, src) = extract_text(text).unwrap();
        assert_eq!(v, json!({"greeting": "hi", "sql_required": true}));
        assert_eq!(src, ParsedSource::ExtractedBlock);
    }

    #[test]
    fn test_greedy_span_is_skipped_when_unparsable() {
        // 贪婪匹配跨越两个对象无法解析，回退到较短的平衡块
        let text = r#"{"a": 1} and {"b": 22}"#;
        let candidates = collect_candidates(text);
        assert_eq!(candidates[0], text);
        let (v, _) = extract_text(text).unwrap();
        assert_eq!(v, json!({"b": 22}));
    }

    #[test]
    fn test_full_text_fallback() {
        let (v, src) = extract_text("true").unwrap();
        assert_eq!(v, json!(true));
        assert_eq!(src, ParsedSource::FullText);
    }

    #[test]
    fn test_status_phrase_fallback() {
        let (v, src) = extract_text("OUTCOME OK").unwrap();
        assert_eq!(v, json!({"outcome": "OK"}));
        assert_eq!(src, ParsedSource::StatusFallback);

        assert_eq!(status_fallback("outcome: error in join"), Some(json!({"outcome": "ERROR"})));
        assert_eq!(status_fallback("Outcome - success"), Some(json!({"outcome": "OK"})));
        assert_eq!(status_fallback(" fail "), Some(json!({"outcome": "ERROR"})));
        assert_eq!(status_fallback("ok"), Some(json!({"outcome": "OK"})));
        assert_eq!(status_fallback("looks fine to me"), None);
        assert_eq!(status_fallback("outcome_ok"), Some(json!({"outcome": "OK"})));
    }

    #[test]
    fn test_status_word_needs_boundary() {
        assert_eq!(status_fallback("OUTCOMEOK"), None);
        assert_eq!(status_fallback("OUTCOME OKAY"), None);
        assert!(extract_text("OUTCOMEOK").is_none());
    }

    #[test]
    fn test_nothing_extractable() {
        assert!(extract_text("I could not decide").is_none());
        assert!(extract_text("   ").is_none());
    }

    #[test]
    fn test_tool_response_takes_priority() {
        let mut turn = TurnResult::new("a", "q");
        turn.push_text(r#"{"ignored": true}"#);
        turn.record_tool_response("execute_sql", json!({"status": "SUCCESS", "rows": []}));
        let (v, src) = extract(&turn).unwrap();
        assert_eq!(src, ParsedSource::ToolResponse);
        assert_eq!(v["status"], "SUCCESS");
    }

    #[test]
    fn test_non_object_tool_response_is_ignored() {
        let mut turn = TurnResult::new("a", "q");
        turn.push_text(r#"{"kept": 1}"#);
        turn.record_tool_response("lookup", json!("plain"));
        let (v, src) = extract(&turn).unwrap();
        assert_eq!(src, ParsedSource::ExtractedBlock);
        assert_eq!(v, json!({"kept": 1}));
    }

    #[test]
    fn test_extract_retry() {
        assert_eq!(extract_retry(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(extract_retry(r#"Sure! {"a": 1} done"#), Some(json!({"a": 1})));
        assert_eq!(extract_retry("OUTCOME OK"), None);
    }
}
