//! 单轮调用结果：一次 Agent 调用所发出内容的聚合

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 结构化负载的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsedSource {
    ToolResponse,
    ExtractedBlock,
    FullText,
    StatusFallback,
    Retry,
    ExceptionFallback,
}

/// 工具调用记录键前缀
pub const TOOL_CALL_PREFIX: &str = "[tool_call]_";
/// 工具结果记录键前缀
pub const TOOL_RESPONSE_PREFIX: &str = "[tool_response]_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResult {
    pub agent: String,
    pub user_query: String,
    /// 累加的文本（不替换）
    pub text: String,
    /// "[tool_call]_<name>" -> args
    pub tool_calls: BTreeMap<String, Value>,
    /// "[tool_response]_<name>" -> result
    pub tool_responses: BTreeMap<String, Value>,
    pub python_code_output: Option<String>,
    pub python_code_execution_outcome: Option<String>,
    pub parsed_json: Option<Value>,
    pub parsed_json_source: Option<ParsedSource>,
    /// 本轮累计 token
    pub total_token_count: u64,
    /// 本轮是否已做过一次解析重试（每轮最多一次）
    pub retried: bool,
    pub error: Option<String>,
    pub retry_error: Option<String>,
}

impl TurnResult {
    pub fn new(agent: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            user_query: user_query.into(),
            ..Self::default()
        }
    }

    pub fn push_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn record_tool_call(&mut self, name: &str, args: Value) {
        self.tool_calls.insert(format!("{TOOL_CALL_PREFIX}{name}"), args);
    }

    pub fn record_tool_response(&mut self, name: &str, response: Value) {
        self.tool_responses
            .insert(format!("{TOOL_RESPONSE_PREFIX}{name}"), response);
    }

    pub fn tool_call(&self, name: &str) -> Option<&Value> {
        self.tool_calls.get(&format!("{TOOL_CALL_PREFIX}{name}"))
    }

    pub fn tool_response(&self, name: &str) -> Option<&Value> {
        self.tool_responses.get(&format!("{TOOL_RESPONSE_PREFIX}{name}"))
    }

    pub fn set_parsed(&mut self, value: Value, source: ParsedSource) {
        self.parsed_json = Some(value);
        self.parsed_json_source = Some(source);
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed_json.is_some()
    }
}
