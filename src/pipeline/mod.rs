//! 流水线层：Starter、收敛循环与顶层控制器

pub mod controller;
pub mod convergence;
pub mod events;
pub mod starter;

pub use controller::{load_initial_state, Pipeline, PipelineAgents};
pub use convergence::{ConvergenceLoop, ConvergenceReport, LoopState, StageAgents, SubPipeline};
pub use events::PipelineEvent;
pub use starter::StarterResponse;
