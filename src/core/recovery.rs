//! 错误恢复引擎
//!
//! 两类本地恢复：
//! - Agent 传输失败 -> 保守兜底增量（空问候、失败意图、两个需求标志为 false）
//! - 结构化输出无法解析 -> 生成一次性的「只输出 JSON」重试提示

use crate::core::AgentError;
use crate::session::{StateDelta, StateKey};

/// Agent 未能给出结构化结果时写入的意图文本
pub const AGENT_FAILED_INTENT: &str = "(agent failed to produce structured response)";

/// 重试提示中嵌入的上一轮输出最大字符数
const MAX_PREVIOUS_CHARS: usize = 4000;

/// 未声明 schema 的 Agent 在重试提示中使用的默认形状
const DEFAULT_SHAPE: &str = r#"{"outcome": "OK" | "ERROR"}"#;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 传输失败时的兜底增量；下游读取缺失标志时同样得到 false
    pub fn fallback_delta(&self, err: &AgentError) -> StateDelta {
        let mut delta = StateDelta::new();
        delta
            .set_text(StateKey::Greeting, "")
            .set_text(StateKey::UserIntentText, AGENT_FAILED_INTENT)
            .set_flag(StateKey::SqlRequired, false)
            .set_flag(StateKey::PythonRequired, false)
            .set_text(StateKey::LatestAgentError, err.to_string());
        delta
    }

    /// 兜底增量对应的结构化负载（作为 parsed_json 返回给调用方）
    pub fn fallback_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "greeting": "",
            "user_intent": AGENT_FAILED_INTENT,
            "sql_required": false,
            "python_required": false,
        })
    }

    /// 结构化输出解析失败后的重试提示
    pub fn reprompt(&self, previous_text: &str, schema: Option<&str>) -> String {
        let previous: String = previous_text.chars().take(MAX_PREVIOUS_CHARS).collect();
        format!(
            "The assistant's previous response did not contain valid JSON. \
             Please respond with ONLY a JSON object matching this schema: {}. \
             Do not include any additional commentary.\n\n\
             Previous response for context:\n{}",
            schema.unwrap_or(DEFAULT_SHAPE),
            previous
        )
    }
}
