//! 工具结果摘要与提示词状态视图
//!
//! SQL 结果可能很大，写入提示词前压缩为 {status, row_count, sample_rows}；
//! 状态中过长的字符串截断，避免每轮都把大对象重新注入上下文。

use serde_json::{json, Map, Value};

use crate::config::StateSection;
use crate::session::{SessionState, StateKey};

const TRUNCATED_MARKER: &str = "\n...[truncated]...";

/// 摘要 SQL 工具结果；非对象输入得到 UNKNOWN 摘要
pub fn summarize_sql_response(response: &Value, settings: &StateSection) -> Value {
    let Some(obj) = response.as_object() else {
        return json!({ "status": "UNKNOWN", "row_count": 0, "sample_rows": [] });
    };

    let status = obj
        .get("status")
        .cloned()
        .unwrap_or_else(|| Value::String("UNKNOWN".to_string()));
    let rows = obj
        .get("rows")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let sample: Vec<Value> = rows
        .iter()
        .take(settings.sample_rows)
        .map(|row| match row {
            Value::Object(cells) => Value::Object(
                cells
                    .iter()
                    .map(|(k, v)| (k.clone(), truncate_cell(v, settings.max_cell_chars)))
                    .collect(),
            ),
            Value::Array(cells) => Value::Array(
                cells
                    .iter()
                    .map(|v| truncate_cell(v, settings.max_cell_chars))
                    .collect(),
            ),
            other => truncate_cell(other, settings.max_cell_chars),
        })
        .collect();

    json!({ "status": status, "row_count": rows.len(), "sample_rows": sample })
}

fn truncate_cell(value: &Value, max_chars: usize) -> Value {
    let s = match value {
        Value::Null => return Value::Null,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        Value::String(format!("{head}…"))
    } else {
        Value::String(s)
    }
}

/// 超长字符串截断并追加标记
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{head}{TRUNCATED_MARKER}")
}

/// 供 Agent 提示词使用的状态视图：SQL 结果替换为摘要，长字符串截断
pub fn prompt_view(state: &SessionState, settings: &StateSection) -> Map<String, Value> {
    let sql_response_key = StateKey::LatestSqlResponse.as_str();
    let mut view = Map::new();
    for (key, value) in state.as_map() {
        if key == sql_response_key {
            continue;
        }
        let value = match value {
            Value::String(s) => Value::String(truncate_text(s, settings.max_prompt_chars)),
            other => other.clone(),
        };
        view.insert(key.clone(), value);
    }
    if let Some(rows) = state.get(StateKey::LatestSqlResponse) {
        if !view.contains_key(StateKey::LatestSqlResponseSummary.as_str()) {
            let status = state
                .get(StateKey::LatestBqExecutionStatus)
                .cloned()
                .unwrap_or(Value::Null);
            let summary = summarize_sql_response(&json!({ "status": status, "rows": rows }), settings);
            view.insert(StateKey::LatestSqlResponseSummary.as_str().to_string(), summary);
        }
    }
    view
}
