//! 会话存储抽象层
//!
//! 会话以 (app, user, session_id) 三元组标识；状态只能通过追加携带增量的事件来改变。
//! 同一会话同一时刻最多只有一条流水线在运行（单写者），因此追加采用后写覆盖语义，
//! 不需要事务或 CAS；不同会话之间没有共享可变状态。

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::event::Event;
use super::state::{SessionState, StateDelta};
use crate::core::SessionError;

/// 会话三元组
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    fn not_found(&self) -> SessionError {
        SessionError::NotFound {
            app: self.app_name.clone(),
            user: self.user_id.clone(),
            session: self.session_id.clone(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// 单个会话：状态 + 追加式事件日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    pub events: Vec<Event>,
    /// 每次追加事件递增
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            state: SessionState::new(),
            events: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn push(&mut self, event: Event) {
        self.state.apply(&event.state_delta);
        self.updated_at = event.timestamp;
        self.events.push(event);
        self.version += 1;
    }

    /// 按序回放所有事件的增量，得到的状态必须与 `state` 完全一致
    pub fn replay_state(&self) -> SessionState {
        let mut state = SessionState::new();
        for event in &self.events {
            state.apply(&event.state_delta);
        }
        state
    }
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 创建会话；初始状态作为第一条系统事件写入日志，保证回放一致
    async fn create(&self, key: SessionKey, initial_state: StateDelta) -> Session;

    /// 获取会话快照
    async fn get(&self, key: &SessionKey) -> Result<Session, SessionError>;

    /// 合并 event.state_delta 并追加事件，返回更新后的快照
    async fn append_event(&self, session: &Session, event: Event) -> Result<Session, SessionError>;
}

/// 内存会话存储
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前会话数
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, key: SessionKey, initial_state: StateDelta) -> Session {
        let mut session = Session::new(key.clone());
        if !initial_state.is_empty() {
            session.push(Event::system(initial_state));
        }
        self.sessions.write().await.insert(key, session.clone());
        tracing::debug!(session = %session.key, "session created");
        session
    }

    async fn get(&self, key: &SessionKey) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| key.not_found())
    }

    async fn append_event(&self, session: &Session, event: Event) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.key)
            .ok_or_else(|| session.key.not_found())?;
        stored.push(event);
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StateKey;
    use serde_json::json;

    fn key() -> SessionKey {
        SessionKey::new("MetricMind", "u1", "s1")
    }

    #[tokio::test]
    async fn test_get_missing_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.get(&key()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_append_merges_delta_and_bumps_version() {
        let store = InMemorySessionStore::new();
        let session = store.create(key(), StateDelta::new()).await;
        assert_eq!(session.version, 0);

        let mut delta = StateDelta::new();
        delta.set_flag(StateKey::SqlRequired, true);
        let session = store.append_event(&session, Event::system(delta)).await.unwrap();
        assert_eq!(session.version, 1);
        assert!(session.state.flag(StateKey::SqlRequired));

        let session = store
            .append_event(&session, Event::system(StateDelta::new()))
            .await
            .unwrap();
        assert_eq!(session.version, 2);
        assert!(session.state.flag(StateKey::SqlRequired));
    }

    #[tokio::test]
    async fn test_replay_reproduces_state() {
        let store = InMemorySessionStore::new();
        let mut init = StateDelta::new();
        init.insert_raw("tables", json!(["orders", "customers"])).unwrap();
        let mut session = store.create(key(), init).await;

        for i in 0..5u64 {
            let mut delta = StateDelta::new();
            delta.set_counter(StateKey::TotalTokenCount, i * 10);
            if i % 2 == 0 {
                delta.set_text(StateKey::Greeting, format!("hello {i}"));
            }
            session = store.append_event(&session, Event::system(delta)).await.unwrap();
        }

        let stored = store.get(&key()).await.unwrap();
        assert_eq!(stored.replay_state(), stored.state);
        assert_eq!(stored.state.counter(StateKey::TotalTokenCount), 40);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        let a = store.create(key(), StateDelta::new()).await;
        let other = SessionKey::new("MetricMind", "u2", "s1");
        store.create(other.clone(), StateDelta::new()).await;

        let mut delta = StateDelta::new();
        delta.set_text(StateKey::Greeting, "only a");
        store.append_event(&a, Event::system(delta)).await.unwrap();

        let b = store.get(&other).await.unwrap();
        assert_eq!(b.state.text(StateKey::Greeting), None);
        assert_eq!(store.len().await, 2);
    }
}
