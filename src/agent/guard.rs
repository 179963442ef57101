//! 跳过守卫：评审已通过时不再调用 Refiner
//!
//! 包装任意 Agent；若会话中对应的评审结论已等于通过短语，直接回显一条
//! 「Agent xxx skipped since ...」文本，不调用内部 Agent。
//! 收敛循环自己也会在调用 Critic 之前判断接受条件，这里只是节省一次模型调用。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;

use crate::core::AgentError;
use crate::session::StateKey;

use super::events::AgentEvent;
use super::traits::{Agent, AgentEventStream, InvocationContext};

pub struct SkipWhenAccepted {
    inner: Arc<dyn Agent>,
    verdict_key: StateKey,
    accepted_phrase: String,
}

impl SkipWhenAccepted {
    pub fn new(inner: Arc<dyn Agent>, verdict_key: StateKey, accepted_phrase: impl Into<String>) -> Self {
        Self {
            inner,
            verdict_key,
            accepted_phrase: accepted_phrase.into(),
        }
    }

    fn is_accepted(&self, ctx: &InvocationContext) -> bool {
        ctx.state_text(self.verdict_key.as_str()) == Some(self.accepted_phrase.as_str())
    }
}

#[async_trait]
impl Agent for SkipWhenAccepted {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn output_key(&self) -> Option<&str> {
        self.inner.output_key()
    }

    fn response_schema(&self) -> Option<String> {
        self.inner.response_schema()
    }

    fn structured_output(&self) -> bool {
        self.inner.structured_output()
    }

    async fn run(&self, ctx: InvocationContext, message: &str) -> Result<AgentEventStream, AgentError> {
        if self.is_accepted(&ctx) {
            tracing::debug!(agent = self.name(), "skipped, verdict already accepted");
            let text = format!("Agent {} skipped since {}", self.name(), self.accepted_phrase);
            let event = AgentEvent::text(self.name(), text);
            return Ok(Box::pin(stream::iter(vec![Ok(event)])));
        }
        self.inner.run(ctx, message).await
    }
}
