//! 生成式 Agent 抽象
//!
//! 所有 Agent（Starter / Writer / Critic / Refiner）实现 Agent：
//! 给定会话上下文与用户消息，返回事件流；流本身是外部协作方（模型客户端、工具执行），
//! 编排核心只消费它。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::session::SessionKey;

use super::events::AgentEvent;

/// Agent 事件流
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// 单次调用上下文：会话标识 + 供提示词使用的状态视图（已截断、已摘要）
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub session: SessionKey,
    pub state: Map<String, Value>,
}

impl InvocationContext {
    pub fn new(session: SessionKey, state: Map<String, Value>) -> Self {
        Self { session, state }
    }

    pub fn state_text(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(Value::as_str)
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// 本轮结束后将最终文本（或结构化负载）写入的状态键
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// 期望的结构化输出形状（用于解析失败后的重试提示）
    fn response_schema(&self) -> Option<String> {
        None
    }

    /// 输出键是否保存结构化负载（而非纯文本）
    fn structured_output(&self) -> bool {
        false
    }

    async fn run(&self, ctx: InvocationContext, message: &str) -> Result<AgentEventStream, AgentError>;
}
