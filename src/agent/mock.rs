//! 脚本化 Agent（用于测试与演示，无需模型 API）
//!
//! 每次 run 依次消费一轮预设脚本；脚本用完后重复最后一轮。
//! 记录调用次数与收到的消息，便于断言「某个 Agent 被调用了几次」。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};

use crate::core::AgentError;

use super::events::{AgentEvent, ExecutionOutput, Part, UsageMetadata};
use super::traits::{Agent, AgentEventStream, InvocationContext};

/// 一轮预设输出
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// 正常输出一组事件
    Events(Vec<AgentEvent>),
    /// run 本身失败
    FailOnStart(AgentError),
    /// 输出若干事件后流中出错
    FailMidStream(Vec<AgentEvent>, AgentError),
}

pub struct ScriptedAgent {
    name: String,
    output_key: Option<String>,
    schema: Option<String>,
    structured: bool,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    last: Mutex<Option<ScriptedTurn>>,
    calls: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_key: None,
            schema: None,
            structured: false,
            turns: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// 输出键保存解析后的结构化负载
    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    pub fn then(self, turn: ScriptedTurn) -> Self {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
        self
    }

    pub fn reply(self, events: Vec<AgentEvent>) -> Self {
        self.then(ScriptedTurn::Events(events))
    }

    pub fn reply_text(self, text: impl Into<String>) -> Self {
        let event = AgentEvent::text(self.name.clone(), text);
        self.reply(vec![event])
    }

    pub fn fail(self, err: AgentError) -> Self {
        self.then(ScriptedTurn::FailOnStart(err))
    }

    pub fn fail_mid_stream(self, events: Vec<AgentEvent>, err: AgentError) -> Self {
        self.then(ScriptedTurn::FailMidStream(events, err))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn next_turn(&self) -> ScriptedTurn {
        let next = self.turns.lock().ok().and_then(|mut t| t.pop_front());
        let mut last = match self.last.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        match next {
            Some(turn) => {
                *last = Some(turn.clone());
                turn
            }
            None => last.clone().unwrap_or(ScriptedTurn::Events(Vec::new())),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    fn response_schema(&self) -> Option<String> {
        self.schema.clone()
    }

    fn structured_output(&self) -> bool {
        self.structured
    }

    async fn run(&self, _ctx: InvocationContext, message: &str) -> Result<AgentEventStream, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.messages.lock() {
            m.push(message.to_string());
        }
        match self.next_turn() {
            ScriptedTurn::Events(events) => {
                Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
            }
            ScriptedTurn::FailOnStart(err) => Err(err),
            ScriptedTurn::FailMidStream(events, err) => {
                let items: Vec<Result<AgentEvent, AgentError>> =
                    events.into_iter().map(Ok).chain(std::iter::once(Err(err))).collect();
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}

/// 常用事件构造
pub fn sql_call(author: &str, query: &str) -> AgentEvent {
    AgentEvent::new(author).with_part(Part::FunctionCall {
        name: "execute_sql".to_string(),
        args: json!({ "query": query }),
    })
}

pub fn sql_response(author: &str, status: &str, rows: Value) -> AgentEvent {
    AgentEvent::new(author).with_part(Part::FunctionResponse {
        name: "execute_sql".to_string(),
        response: json!({ "status": status, "rows": rows }),
    })
}

pub fn code_result(author: &str, outcome: &str, output: Option<ExecutionOutput>) -> AgentEvent {
    AgentEvent::new(author).with_part(Part::CodeExecutionResult {
        outcome: outcome.to_string(),
        output,
    })
}

pub fn usage(author: &str, prompt: u64, candidates: u64) -> AgentEvent {
    AgentEvent::new(author).with_usage(UsageMetadata {
        prompt_token_count: Some(prompt),
        candidates_token_count: Some(candidates),
        total_token_count: Some(prompt + candidates),
        ..UsageMetadata::default()
    })
}
