//! 事件归一化：把一条 Agent 原始事件折叠成一个状态增量 + 本轮结果的旁路记录
//!
//! 一条原始事件的全部后果作为一个系统事件整体追加，不允许部分应用。
//! 计数器（失败次数、总 token）读取的是当前会话值而不是本轮局部值，
//! 因为它们需要跨轮累积。

use serde_json::Value;

use crate::agent::{AgentEvent, ExecutionOutput, Part};
use crate::config::StateSection;
use crate::core::SessionError;
use crate::session::{Event, Session, SessionState, SessionStore, StateDelta, StateKey};
use crate::usage::{turn_total, UsageCounters};

use super::result::TurnResult;
use super::summarizer::summarize_sql_response;

/// 查询执行工具名
pub const EXECUTE_SQL_TOOL: &str = "execute_sql";

/// 查询服务返回的错误状态
const STATUS_ERROR: &str = "ERROR";

#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    settings: StateSection,
}

impl EventNormalizer {
    pub fn new(settings: StateSection) -> Self {
        Self { settings }
    }

    /// 纯函数部分：基于当前状态计算增量，并把文本 / 工具调用 / 工具结果记录到 turn
    pub fn fold(&self, event: &AgentEvent, current: &SessionState, turn: &mut TurnResult) -> StateDelta {
        let mut delta = StateDelta::new();
        let mut counters = UsageCounters::from_state(current);
        let mut failures_seen = false;

        for part in &event.parts {
            match part {
                Part::Text { text } => turn.push_text(text),
                Part::ExecutableCode { code } => {
                    turn.python_code_output = Some(code.clone());
                    delta.set_text(StateKey::LatestPythonCodeOutput, code.clone());
                }
                Part::CodeExecutionResult { outcome, output } => {
                    turn.python_code_execution_outcome = Some(outcome.clone());
                    delta.set_text(StateKey::LatestPythonCodeExecutionOutcome, outcome.clone());
                    match output {
                        Some(ExecutionOutput::Inline(data)) => {
                            delta.set_text(StateKey::LatestImgBytes, data.clone());
                        }
                        Some(ExecutionOutput::Url(url)) => {
                            delta.set_text(StateKey::LatestImgUrl, url.clone());
                        }
                        None => {}
                    }
                }
                Part::FunctionCall { name, args } => {
                    turn.record_tool_call(name, args.clone());
                    if name == EXECUTE_SQL_TOOL {
                        if let Some(query) = args.get("query").and_then(Value::as_str) {
                            delta.set_text(StateKey::LatestSqlOutput, query);
                        }
                    }
                }
                Part::FunctionResponse { name, response } => {
                    turn.record_tool_response(name, response.clone());
                    self.stage_tool_response(response, &mut delta);
                    if response.get("status").and_then(Value::as_str) == Some(STATUS_ERROR) {
                        counters = counters.record_api_failure();
                        failures_seen = true;
                    }
                }
            }
        }

        if let Some(usage) = &event.usage {
            turn.total_token_count = turn.total_token_count.saturating_add(turn_total(usage));
            counters = counters.fold(usage);
            counters.write_tokens(&mut delta);
        }
        if failures_seen {
            counters.write_failures(&mut delta);
        }

        delta
    }

    fn stage_tool_response(&self, response: &Value, delta: &mut StateDelta) {
        let rows = response.get("rows").cloned().unwrap_or(Value::Null);
        delta.set_value(StateKey::LatestSqlResponse, rows);
        match response.get("status").and_then(Value::as_str) {
            Some(status) => delta.set_text(StateKey::LatestBqExecutionStatus, status),
            None => delta.clear(StateKey::LatestBqExecutionStatus),
        };
        let summary = summarize_sql_response(response, &self.settings);
        delta.set_value(StateKey::LatestSqlResponseSummary, summary);
    }

    /// 折叠并把增量作为一个系统事件追加；空增量不追加
    pub async fn process(
        &self,
        store: &dyn SessionStore,
        session: &Session,
        event: &AgentEvent,
        turn: &mut TurnResult,
    ) -> Result<Session, SessionError> {
        let delta = self.fold(event, &session.state, turn);
        if delta.is_empty() {
            return Ok(session.clone());
        }
        store.append_event(session, Event::system(delta)).await
    }
}
