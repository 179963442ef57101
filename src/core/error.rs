//! 错误类型
//!
//! 分层：会话存储（SessionError）、Agent 传输（AgentError）、单轮调用（TurnError）、
//! 流水线顶层（PipelineError）。Agent 传输失败由调用方显式恢复为兜底增量，
//! 只有流水线级的意外错误才会抛给宿主。

use thiserror::Error;

use crate::session::StateDelta;
use crate::turn::TurnResult;

/// 会话存储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {app}/{user}/{session}")]
    NotFound {
        app: String,
        user: String,
        session: String,
    },

    /// 已知键写入了不符合 schema 的值
    #[error("Invalid value for state key '{key}': expected {expected}")]
    InvalidStateValue { key: String, expected: &'static str },
}

/// Agent 事件流可能抛出的错误（网络、协议、Agent 内部错误）
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Agent error: {0}")]
    Other(String),
}

/// 单轮调用错误
///
/// `Agent` 分支携带已累积的部分结果与保守兜底增量，由调用方显式交给
/// `AgentInvoker::recover` 写入会话，而不是靠捕获后继续。
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Agent '{agent}' failed: {source}")]
    Agent {
        agent: String,
        #[source]
        source: AgentError,
        partial: Box<TurnResult>,
        fallback: StateDelta,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// 流水线顶层错误（记录日志后抛给宿主）
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data schema: {0}")]
    Schema(#[from] serde_json::Error),
}
