//! Agent 层：Agent 抽象、原始事件类型、跳过守卫与脚本化实现

pub mod events;
pub mod guard;
pub mod mock;
pub mod traits;

pub use events::{AgentEvent, ExecutionOutput, Part, UsageMetadata};
pub use guard::SkipWhenAccepted;
pub use mock::{ScriptedAgent, ScriptedTurn};
pub use traits::{Agent, AgentEventStream, InvocationContext};
