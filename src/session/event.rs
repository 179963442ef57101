//! 会话事件：不可变记录，事件日志是会话状态的唯一事实来源

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::StateDelta;
use crate::agent::AgentEvent;

/// 系统组件写入状态增量时使用的作者名
pub const SYSTEM_AUTHOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Agent 名或 "system"
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Agent 原始输出（系统事件为 None）
    pub content: Option<AgentEvent>,
    #[serde(default)]
    pub state_delta: StateDelta,
}

impl Event {
    /// 系统事件：只携带状态增量
    pub fn system(state_delta: StateDelta) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: SYSTEM_AUTHOR.to_string(),
            timestamp: Utc::now(),
            content: None,
            state_delta,
        }
    }

    /// Agent 事件：原样记录输出，不带增量
    pub fn from_agent(event: AgentEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: event.author.clone(),
            timestamp: Utc::now(),
            content: Some(event),
            state_delta: StateDelta::default(),
        }
    }
}
