//! 流水线过程事件：供宿主（CLI / Web）观察每个阶段、每轮调用与收敛进度

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::session::SequenceOutcome;
use crate::turn::ParsedSource;

/// 可序列化为 JSON 推送给前端
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 进入某阶段（starter / query / visualization）
    StageStarted { stage: String },
    /// 一轮 Agent 调用完成
    TurnCompleted {
        agent: String,
        tokens: u64,
        source: Option<ParsedSource>,
        retried: bool,
    },
    /// Agent 调用失败，已写入兜底状态
    TurnRecovered { agent: String, error: String },
    /// 收敛循环第几轮 Critic/Refiner
    ConvergenceAttempt {
        stage: String,
        attempt: usize,
        max_retries: usize,
    },
    /// Critic 判定通过
    Converged { stage: String, attempts: usize },
    /// 重试次数耗尽仍未通过
    Exhausted { stage: String, attempts: usize },
    /// 阶段被门控跳过
    StageSkipped { stage: String, reason: String },
    /// 本次运行结束
    PipelineFinished {
        query_outcome: Option<SequenceOutcome>,
        visualization_outcome: Option<SequenceOutcome>,
    },
    /// 错误
    Error { text: String },
}

pub(crate) fn send_event(tx: &Option<UnboundedSender<PipelineEvent>>, ev: PipelineEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
