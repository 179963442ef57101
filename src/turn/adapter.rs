//! Agent 调用适配：驱动一轮 Agent 调用
//!
//! 发送消息 -> 逐条消费事件流 -> 每条事件立即归一化并写入会话（不在结尾批量写入，
//! 后续事件的计数器读取依赖前面已可见的增量）-> 流结束后提取结构化输出，
//! 必要时做一次解析重试 -> 把最终文本写回 Agent 的 output_key。
//!
//! 事件流出错时不向上抛原始异常：返回 `TurnError::Agent`，其中带有保守兜底增量，
//! 调用方通过 `recover` 显式写入。

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use crate::agent::{Agent, InvocationContext};
use crate::config::{AppConfig, StateSection};
use crate::core::{AgentError, RecoveryEngine, SessionError, TurnError};
use crate::session::{Event, Session, SessionKey, SessionStore, StateDelta};

use super::extractor;
use super::normalizer::EventNormalizer;
use super::result::{ParsedSource, TurnResult};
use super::summarizer::prompt_view;

/// 驱动事件流时的两类失败：Agent 本身 / 会话存储
enum DriveError {
    Agent(AgentError),
    Session(SessionError),
}

impl From<SessionError> for DriveError {
    fn from(e: SessionError) -> Self {
        DriveError::Session(e)
    }
}

pub struct AgentInvoker {
    store: Arc<dyn SessionStore>,
    normalizer: EventNormalizer,
    recovery: RecoveryEngine,
    settings: StateSection,
    retry_unparsed_output: bool,
}

impl AgentInvoker {
    pub fn new(store: Arc<dyn SessionStore>, config: &AppConfig) -> Self {
        Self {
            store,
            normalizer: EventNormalizer::new(config.state.clone()),
            recovery: RecoveryEngine::new(),
            settings: config.state.clone(),
            retry_unparsed_output: config.pipeline.retry_unparsed_output,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// 执行一轮调用
    pub async fn invoke(
        &self,
        agent: &dyn Agent,
        key: &SessionKey,
        message: &str,
    ) -> Result<TurnResult, TurnError> {
        let session = self.store.get(key).await?;
        let mut turn = TurnResult::new(agent.name(), message);

        let session = match self.drive(agent, session, message, &mut turn).await {
            Ok(s) => s,
            Err(DriveError::Session(e)) => return Err(TurnError::Session(e)),
            Err(DriveError::Agent(e)) => {
                turn.error = Some(e.to_string());
                let fallback = self.recovery.fallback_delta(&e);
                return Err(TurnError::Agent {
                    agent: agent.name().to_string(),
                    source: e,
                    partial: Box::new(turn),
                    fallback,
                });
            }
        };

        if let Some((value, source)) = extractor::extract(&turn) {
            turn.set_parsed(value, source);
        }

        let session = if !turn.is_parsed() && self.retry_unparsed_output && !turn.retried {
            self.retry_structured(agent, session, &mut turn).await?
        } else {
            session
        };

        self.write_output_key(agent, &session, &turn).await?;

        tracing::info!(
            agent = agent.name(),
            tokens = turn.total_token_count,
            source = ?turn.parsed_json_source,
            retried = turn.retried,
            "turn completed"
        );
        Ok(turn)
    }

    /// 把传输失败的兜底增量写入会话，并返回带错误信息的结果
    pub async fn recover(&self, key: &SessionKey, err: TurnError) -> Result<TurnResult, SessionError> {
        match err {
            TurnError::Agent {
                agent,
                source,
                partial,
                fallback,
            } => {
                tracing::warn!(agent = %agent, error = %source, "agent failed, applying fallback state");
                let session = self.store.get(key).await?;
                self.store.append_event(&session, Event::system(fallback)).await?;
                let mut turn = *partial;
                turn.error = Some(source.to_string());
                turn.set_parsed(self.recovery.fallback_payload(), ParsedSource::ExceptionFallback);
                Ok(turn)
            }
            TurnError::Session(e) => Err(e),
        }
    }

    /// 消费事件流；每条事件先原样记录，再归一化为系统事件
    async fn drive(
        &self,
        agent: &dyn Agent,
        mut session: Session,
        message: &str,
        turn: &mut TurnResult,
    ) -> Result<Session, DriveError> {
        let ctx = InvocationContext::new(
            session.key.clone(),
            prompt_view(&session.state, &self.settings),
        );
        let mut stream = agent.run(ctx, message).await.map_err(DriveError::Agent)?;

        while let Some(item) = stream.next().await {
            let event = item.map_err(DriveError::Agent)?;
            tracing::debug!(agent = agent.name(), parts = event.parts.len(), "agent event");
            if !event.is_empty() {
                session = self
                    .store
                    .append_event(&session, Event::from_agent(event.clone()))
                    .await?;
            }
            session = self
                .normalizer
                .process(self.store.as_ref(), &session, &event, turn)
                .await?;
        }
        Ok(session)
    }

    /// 一次性重试：要求 Agent 只输出 JSON；无论结果如何都标记 retried
    async fn retry_structured(
        &self,
        agent: &dyn Agent,
        session: Session,
        turn: &mut TurnResult,
    ) -> Result<Session, TurnError> {
        let schema = agent.response_schema();
        let prompt = self.recovery.reprompt(&turn.text, schema.as_deref());
        let mut retry_turn = TurnResult::new(agent.name(), prompt.clone());
        turn.retried = true;

        tracing::info!(agent = agent.name(), "no structured output, retrying once");
        let session = match self.drive(agent, session.clone(), &prompt, &mut retry_turn).await {
            Ok(s) => s,
            Err(DriveError::Session(e)) => return Err(TurnError::Session(e)),
            Err(DriveError::Agent(e)) => {
                tracing::warn!(agent = agent.name(), error = %e, "structured retry failed");
                turn.retry_error = Some(e.to_string());
                // 重试过程中已写入的事件仍然有效
                self.store.get(&session.key).await?
            }
        };

        turn.total_token_count = turn
            .total_token_count
            .saturating_add(retry_turn.total_token_count);
        if let Some(value) = extractor::extract_retry(&retry_turn.text) {
            turn.set_parsed(value, ParsedSource::Retry);
        }
        Ok(session)
    }

    async fn write_output_key(
        &self,
        agent: &dyn Agent,
        session: &Session,
        turn: &TurnResult,
    ) -> Result<(), TurnError> {
        let Some(key) = agent.output_key() else {
            return Ok(());
        };
        let value = if agent.structured_output() {
            turn.parsed_json.clone().unwrap_or(Value::Null)
        } else {
            Value::String(turn.text.trim().to_string())
        };
        let mut delta = StateDelta::new();
        delta.insert_raw(key, value)?;
        self.store.append_event(session, Event::system(delta)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::{sql_call, sql_response, usage};
    use crate::agent::ScriptedAgent;
    use crate::core::AGENT_FAILED_INTENT;
    use crate::session::{InMemorySessionStore, StateKey};
    use serde_json::json;

    async fn setup() -> (Arc<InMemorySessionStore>, AgentInvoker, SessionKey) {
        let store = Arc::new(InMemorySessionStore::new());
        let key = SessionKey::new("MetricMind", "u1", "s1");
        store.create(key.clone(), StateDelta::new()).await;
        let invoker = AgentInvoker::new(store.clone(), &AppConfig::default());
        (store, invoker, key)
    }

    #[tokio::test]
    async fn test_invoke_folds_every_event() {
        let (store, invoker, key) = setup().await;
        let agent = ScriptedAgent::new("sql_writer_agent").reply(vec![
            sql_call("sql_writer_agent", "SELECT count(*) FROM orders"),
            sql_response("sql_writer_agent", "SUCCESS", json!([{"n": 42}])),
            usage("sql_writer_agent", 30, 12),
        ]);

        let turn = invoker.invoke(&agent, &key, "how many orders?").await.unwrap();
        assert_eq!(turn.parsed_json_source, Some(ParsedSource::ToolResponse));
        assert_eq!(turn.total_token_count, 42);
        assert!(!turn.retried);

        let session = store.get(&key).await.unwrap();
        assert_eq!(
            session.state.text(StateKey::LatestSqlOutput),
            Some("SELECT count(*) FROM orders")
        );
        assert_eq!(session.state.text(StateKey::LatestBqExecutionStatus), Some("SUCCESS"));
        assert_eq!(session.state.counter(StateKey::TotalTokenCount), 42);
        assert_eq!(session.replay_state(), session.state);
    }

    #[tokio::test]
    async fn test_output_key_receives_trimmed_text() {
        let (store, invoker, key) = setup().await;
        let agent = ScriptedAgent::new("sql_critic_agent")
            .with_output_key("latest_sql_criticism")
            .reply_text("OUTCOME OK\n");

        let turn = invoker.invoke(&agent, &key, "q").await.unwrap();
        assert_eq!(turn.parsed_json, Some(json!({"outcome": "OK"})));

        let session = store.get(&key).await.unwrap();
        assert_eq!(session.state.text(StateKey::LatestSqlCriticism), Some("OUTCOME OK"));
    }

    #[tokio::test]
    async fn test_unparsable_output_retries_exactly_once() {
        let (_store, invoker, key) = setup().await;
        let agent = ScriptedAgent::new("starter_agent")
            .reply_text("Sure, I can help with that.")
            .reply_text(r#"{"greeting": "Hi", "sql_required": true, "python_required": false}"#);

        let turn = invoker.invoke(&agent, &key, "sales by month").await.unwrap();
        assert!(turn.retried);
        assert_eq!(turn.parsed_json_source, Some(ParsedSource::Retry));
        assert_eq!(turn.parsed_json.unwrap()["sql_required"], json!(true));
        assert_eq!(agent.calls(), 2);
        assert!(agent.messages()[1].contains("ONLY a JSON object"));
    }

    #[tokio::test]
    async fn test_failed_retry_leaves_payload_absent() {
        let (_store, invoker, key) = setup().await;
        let agent = ScriptedAgent::new("starter_agent").reply_text("no idea");

        let turn = invoker.invoke(&agent, &key, "q").await.unwrap();
        assert!(turn.retried);
        assert!(turn.parsed_json.is_none());
        assert_eq!(agent.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_disabled_by_config() {
        let store = Arc::new(InMemorySessionStore::new());
        let key = SessionKey::new("MetricMind", "u1", "s1");
        store.create(key.clone(), StateDelta::new()).await;
        let mut cfg = AppConfig::default();
        cfg.pipeline.retry_unparsed_output = false;
        let invoker = AgentInvoker::new(store, &cfg);

        let agent = ScriptedAgent::new("starter_agent").reply_text("no idea");
        let turn = invoker.invoke(&agent, &key, "q").await.unwrap();
        assert!(!turn.retried);
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_returns_fallback_for_recovery() {
        let (store, invoker, key) = setup().await;
        let agent = ScriptedAgent::new("starter_agent").fail_mid_stream(
            vec![usage("starter_agent", 10, 5)],
            AgentError::Transport("deadline exceeded".into()),
        );

        let err = invoker.invoke(&agent, &key, "q").await.unwrap_err();
        assert!(matches!(err, TurnError::Agent { .. }));

        // 出错前的用量已写入
        let session = store.get(&key).await.unwrap();
        assert_eq!(session.state.counter(StateKey::TotalTokenCount), 15);

        let turn = invoker.recover(&key, err).await.unwrap();
        assert_eq!(turn.parsed_json_source, Some(ParsedSource::ExceptionFallback));
        assert!(turn.error.unwrap().contains("deadline exceeded"));

        let session = store.get(&key).await.unwrap();
        assert!(!session.state.flag(StateKey::SqlRequired));
        assert!(!session.state.flag(StateKey::PythonRequired));
        assert_eq!(session.state.text(StateKey::UserIntentText), Some(AGENT_FAILED_INTENT));
    }

    #[tokio::test]
    async fn test_missing_session_is_session_error() {
        let store = Arc::new(InMemorySessionStore::new());
        let invoker = AgentInvoker::new(store, &AppConfig::default());
        let agent = ScriptedAgent::new("starter_agent").reply_text("{}");
        let err = invoker
            .invoke(&agent, &SessionKey::new("a", "b", "c"), "q")
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Session(SessionError::NotFound { .. })));
    }
}
