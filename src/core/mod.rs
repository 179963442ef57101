//! 核心层：错误类型与本地恢复策略

pub mod error;
pub mod recovery;

pub use error::{AgentError, PipelineError, SessionError, TurnError};
pub use recovery::{RecoveryEngine, AGENT_FAILED_INTENT};
