//! 会话层：版本化的键值状态 + 追加式事件日志

pub mod event;
pub mod keys;
pub mod state;
pub mod store;

pub use event::{Event, SYSTEM_AUTHOR};
pub use keys::{SequenceOutcome, StateKey, ValueShape};
pub use state::{SessionState, StateDelta};
pub use store::{InMemorySessionStore, Session, SessionKey, SessionStore};
