//! 会话状态与状态增量
//!
//! SessionState 是事件日志的投影：只能通过合并 StateDelta 改变。
//! StateDelta 在写入边界校验已知键的值形状，未知键视为扩展字段原样保留。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::keys::{SequenceOutcome, StateKey, ValueShape};
use crate::core::SessionError;

/// 一次状态变更（后写覆盖先写，缺省键保持不变）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDelta {
    entries: Map<String, Value>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn set_flag(&mut self, key: StateKey, value: bool) -> &mut Self {
        self.entries.insert(key.as_str().to_string(), Value::Bool(value));
        self
    }

    pub fn set_text(&mut self, key: StateKey, value: impl Into<String>) -> &mut Self {
        self.entries
            .insert(key.as_str().to_string(), Value::String(value.into()));
        self
    }

    pub fn set_counter(&mut self, key: StateKey, value: u64) -> &mut Self {
        self.entries.insert(key.as_str().to_string(), Value::from(value));
        self
    }

    pub fn set_outcome(&mut self, key: StateKey, outcome: SequenceOutcome) -> &mut Self {
        self.entries
            .insert(key.as_str().to_string(), Value::String(outcome.as_str().to_string()));
        self
    }

    /// 写入任意形状的已知键（工具结果、摘要、结构化负载）
    pub fn set_value(&mut self, key: StateKey, value: Value) -> &mut Self {
        debug_assert_eq!(key.shape(), ValueShape::Any, "{key} has a typed setter");
        self.entries.insert(key.as_str().to_string(), value);
        self
    }

    /// 清除键（写入 null，回放时同样得到 null）
    pub fn clear(&mut self, key: StateKey) -> &mut Self {
        self.entries.insert(key.as_str().to_string(), Value::Null);
        self
    }

    /// 写入任意 JSON 值；已知键按 schema 校验，未知键进入扩展命名空间
    pub fn insert_raw(&mut self, key: &str, value: Value) -> Result<&mut Self, SessionError> {
        if let Ok(known) = key.parse::<StateKey>() {
            let shape = known.shape();
            if !shape.accepts(&value) {
                return Err(SessionError::InvalidStateValue {
                    key: key.to_string(),
                    expected: shape.describe(),
                });
            }
        }
        self.entries.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn get(&self, key: StateKey) -> Option<&Value> {
        self.entries.get(key.as_str())
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

/// 会话状态（字符串键 -> JSON 值），附带按已知键的类型化读取
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState {
    values: Map<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并增量：逐键覆盖，增量中不存在的键保持不变
    pub fn apply(&mut self, delta: &StateDelta) {
        for (k, v) in delta.iter() {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: StateKey) -> Option<&Value> {
        self.values.get(key.as_str()).filter(|v| !v.is_null())
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// 缺失或非布尔一律视为 false（安全默认值）
    pub fn flag(&self, key: StateKey) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn text(&self, key: StateKey) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// 缺失视为 0
    pub fn counter(&self, key: StateKey) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn outcome(&self, key: StateKey) -> Option<SequenceOutcome> {
        self.text(key).and_then(|s| s.parse().ok())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
