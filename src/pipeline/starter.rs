//! Starter 阶段：意图识别结果折叠进会话状态
//!
//! `python_required ⇒ sql_required` 只在这里强制一次，下游阶段不再检查。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AGENT_FAILED_INTENT;
use crate::session::{StateDelta, StateKey};

/// Starter Agent 的结构化输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StarterResponse {
    pub greeting: String,
    pub user_intent: String,
    pub sql_required: bool,
    pub python_required: bool,
}

impl Default for StarterResponse {
    fn default() -> Self {
        Self {
            greeting: String::new(),
            user_intent: AGENT_FAILED_INTENT.to_string(),
            sql_required: false,
            python_required: false,
        }
    }
}

impl StarterResponse {
    /// 从解析出的负载构造；整体校验失败时逐字段取值，缺失字段取默认
    pub fn from_payload(payload: Option<&Value>) -> Self {
        let Some(value) = payload else {
            return Self::default();
        };
        if let Ok(parsed) = serde_json::from_value::<StarterResponse>(value.clone()) {
            return parsed;
        }
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        tracing::debug!("starter payload did not validate, reading field by field");
        let defaults = Self::default();
        Self {
            greeting: map
                .get("greeting")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.greeting),
            user_intent: map
                .get("user_intent")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.user_intent),
            sql_required: map.get("sql_required").map(truthy).unwrap_or(false),
            python_required: map.get("python_required").map(truthy).unwrap_or(false),
        }
    }

    /// 可视化一定依赖查询结果
    pub fn sql_needed(&self) -> bool {
        self.sql_required || self.python_required
    }

    pub fn to_delta(&self) -> StateDelta {
        let mut delta = StateDelta::new();
        delta
            .set_text(StateKey::Greeting, self.greeting.clone())
            .set_text(StateKey::UserIntentText, self.user_intent.clone())
            .set_flag(StateKey::PythonRequired, self.python_required)
            .set_flag(StateKey::SqlRequired, self.sql_needed());
        delta
    }

    /// 嵌入重试提示的 JSON schema
    pub fn schema_json() -> Option<String> {
        serde_json::to_string(&schemars::schema_for!(StarterResponse)).ok()
    }
}

/// 布尔、"true"（不区分大小写）、非零数字为真
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use serde_json::json;

    fn fold(payload: Value) -> SessionState {
        let mut state = SessionState::new();
        state.apply(&StarterResponse::from_payload(Some(&payload)).to_delta());
        state
    }

    #[test]
    fn test_python_forces_sql() {
        let state = fold(json!({
            "greeting": "Hi",
            "user_intent": "chart revenue",
            "sql_required": false,
            "python_required": true
        }));
        assert!(state.flag(StateKey::PythonRequired));
        assert!(state.flag(StateKey::SqlRequired));
    }

    #[test]
    fn test_sql_only() {
        let state = fold(json!({
            "greeting": "Hi",
            "user_intent": "count orders",
            "sql_required": true,
            "python_required": false
        }));
        assert!(state.flag(StateKey::SqlRequired));
        assert!(!state.flag(StateKey::PythonRequired));
        assert_eq!(state.text(StateKey::UserIntentText), Some("count orders"));
    }

    #[test]
    fn test_partial_payload_falls_back_per_field() {
        let r = StarterResponse::from_payload(Some(&json!({
            "greeting": "Hello",
            "python_required": "true"
        })));
        assert_eq!(r.greeting, "Hello");
        assert_eq!(r.user_intent, AGENT_FAILED_INTENT);
        assert!(r.python_required);
        assert!(r.sql_needed());

        let r = StarterResponse::from_payload(Some(&json!({
            "sql_required": 1,
            "python_required": 0
        })));
        assert!(r.sql_required);
        assert!(!r.python_required);
        assert_eq!(r.greeting, "");
    }

    #[test]
    fn test_missing_payload_is_conservative() {
        let r = StarterResponse::from_payload(None);
        assert_eq!(r, StarterResponse::default());
        assert!(!r.sql_needed());

        let r = StarterResponse::from_payload(Some(&json!({"outcome": "OK"})));
        assert!(!r.sql_required && !r.python_required);
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = StarterResponse::schema_json().unwrap();
        assert!(schema.contains("python_required"));
        assert!(schema.contains("user_intent"));
    }
}
