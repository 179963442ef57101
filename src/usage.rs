//! 用量统计：把每轮的用量增量折叠进会话级 `app:` 计数器
//!
//! 累加计数器只增不减；cached_content 描述缓存大小而非单次成本，取最后一次观测值。
//! 读取当前值再累加的方式只在「每会话单写者」前提下安全。

use serde::{Deserialize, Serialize};

use crate::agent::UsageMetadata;
use crate::session::{SessionState, StateDelta, StateKey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total: u64,
    pub prompt: u64,
    pub candidates: u64,
    pub thoughts: u64,
    pub tool_use_prompt: u64,
    pub cached_content: u64,
    pub bq_api_failures: u64,
}

impl UsageCounters {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            total: state.counter(StateKey::TotalTokenCount),
            prompt: state.counter(StateKey::PromptTokenCount),
            candidates: state.counter(StateKey::CandidatesTokenCount),
            thoughts: state.counter(StateKey::ThoughtsTokenCount),
            tool_use_prompt: state.counter(StateKey::ToolUsePromptTokenCount),
            cached_content: state.counter(StateKey::CachedContentTokenCount),
            bq_api_failures: state.counter(StateKey::BqApiFailureCount),
        }
    }

    /// 折叠一次用量：缺失字段按 0 计，cached_content 有观测值时覆盖
    pub fn fold(&self, usage: &UsageMetadata) -> Self {
        Self {
            total: self.total.saturating_add(turn_total(usage)),
            prompt: self.prompt.saturating_add(usage.prompt_token_count.unwrap_or(0)),
            candidates: self
                .candidates
                .saturating_add(usage.candidates_token_count.unwrap_or(0)),
            thoughts: self
                .thoughts
                .saturating_add(usage.thoughts_token_count.unwrap_or(0)),
            tool_use_prompt: self
                .tool_use_prompt
                .saturating_add(usage.tool_use_prompt_token_count.unwrap_or(0)),
            cached_content: usage.cached_content_token_count.unwrap_or(self.cached_content),
            bq_api_failures: self.bq_api_failures,
        }
    }

    pub fn record_api_failure(&self) -> Self {
        Self {
            bq_api_failures: self.bq_api_failures.saturating_add(1),
            ..*self
        }
    }

    /// 写入 token 相关计数器（不含失败计数）
    pub fn write_tokens(&self, delta: &mut StateDelta) {
        delta
            .set_counter(StateKey::TotalTokenCount, self.total)
            .set_counter(StateKey::PromptTokenCount, self.prompt)
            .set_counter(StateKey::CandidatesTokenCount, self.candidates)
            .set_counter(StateKey::ThoughtsTokenCount, self.thoughts)
            .set_counter(StateKey::ToolUsePromptTokenCount, self.tool_use_prompt)
            .set_counter(StateKey::CachedContentTokenCount, self.cached_content);
    }

    pub fn write_failures(&self, delta: &mut StateDelta) {
        delta.set_counter(StateKey::BqApiFailureCount, self.bq_api_failures);
    }
}

/// 单次用量中的总 token（缺失按 0）
pub fn turn_total(usage: &UsageMetadata) -> u64 {
    usage.total_token_count.unwrap_or(0)
}
