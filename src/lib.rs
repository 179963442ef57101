//! MetricMind - 多 Agent 对话式数据分析流水线的编排与会话状态引擎
//!
//! 模块划分：
//! - **agent**: Agent 抽象、原始事件类型、跳过守卫与脚本化实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与本地恢复策略
//! - **observability**: tracing 初始化
//! - **pipeline**: Starter、Critic/Refiner 收敛循环、顶层控制器
//! - **session**: 版本化会话状态与追加式事件日志
//! - **turn**: 单轮调用（事件归一化、结构化输出提取、调用适配）
//! - **usage**: 跨调用的单调用量计数

pub mod agent;
pub mod config;
pub mod core;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod turn;
pub mod usage;

pub use pipeline::{Pipeline, PipelineAgents, PipelineEvent};
pub use session::{InMemorySessionStore, Session, SessionKey, SessionStore};
