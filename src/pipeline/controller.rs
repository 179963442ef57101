//! 流水线控制器：Starter -> 条件 Query 子流水线 -> 条件 Visualization 子流水线
//!
//! 只有控制器了解需求标志与门控规则。Agent 传输失败在单轮内恢复，
//! 其余错误记录完整上下文后原样抛给宿主。

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::Agent;
use crate::config::AppConfig;
use crate::core::{PipelineError, TurnError};
use crate::session::{Event, SequenceOutcome, Session, SessionKey, SessionStore, StateDelta, StateKey};
use crate::turn::{AgentInvoker, TurnResult};

use super::convergence::{ConvergenceLoop, StageAgents, SubPipeline};
use super::events::{send_event, PipelineEvent};
use super::starter::StarterResponse;

/// 每次运行开始时清空的键：上一问的评审结论与阶段结果不能影响本次门控
const PER_RUN_KEYS: [StateKey; 4] = [
    StateKey::LatestSqlCriticism,
    StateKey::LatestPythonCodeCriticism,
    StateKey::LatestSqlSequenceOutcome,
    StateKey::LatestPythonSequenceOutcome,
];

/// 流水线所需的全部 Agent
#[derive(Clone)]
pub struct PipelineAgents {
    pub starter: Arc<dyn Agent>,
    pub query: StageAgents,
    pub visualization: StageAgents,
}

pub struct Pipeline {
    agents: PipelineAgents,
    config: AppConfig,
    invoker: AgentInvoker,
    observer: Option<UnboundedSender<PipelineEvent>>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn SessionStore>, agents: PipelineAgents, config: AppConfig) -> Self {
        let invoker = AgentInvoker::new(store, &config);
        Self {
            agents,
            config,
            invoker,
            observer: None,
        }
    }

    /// 注入过程事件接收端
    pub fn with_observer(mut self, tx: UnboundedSender<PipelineEvent>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.invoker.store()
    }

    /// 执行一次完整流水线，返回最终会话快照
    pub async fn run_pipeline(
        &self,
        app: &str,
        user: &str,
        session_id: &str,
        user_query: &str,
    ) -> Result<Session, PipelineError> {
        let key = SessionKey::new(app, user, session_id);
        match self.run_stages(&key, user_query).await {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::error!(
                    app,
                    user,
                    session = session_id,
                    query = user_query,
                    error = %e,
                    "pipeline failed"
                );
                send_event(&self.observer, PipelineEvent::Error { text: e.to_string() });
                Err(e)
            }
        }
    }

    async fn run_stages(&self, key: &SessionKey, user_query: &str) -> Result<Session, PipelineError> {
        let session = self.ensure_session(key).await?;
        let mut reset = StateDelta::new();
        for k in PER_RUN_KEYS {
            reset.clear(k);
        }
        self.store().append_event(&session, Event::system(reset)).await?;

        // 1. Starter
        send_event(&self.observer, PipelineEvent::StageStarted { stage: "starter".to_string() });
        let turn = run_turn(
            &self.invoker,
            self.agents.starter.as_ref(),
            key,
            user_query,
            &self.observer,
        )
        .await?;
        let starter = StarterResponse::from_payload(turn.parsed_json.as_ref());
        let session = self.store().get(key).await?;
        self.store()
            .append_event(&session, Event::system(starter.to_delta()))
            .await?;
        tracing::info!(
            sql_required = starter.sql_needed(),
            python_required = starter.python_required,
            "starter folded"
        );

        let converge = ConvergenceLoop::new(
            &self.invoker,
            self.config.pipeline.max_retries,
            &self.config.pipeline.outcome_ok_phrase,
            &self.observer,
        );

        // 2. Query
        let query_outcome = if starter.sql_needed() {
            let report = converge
                .run(SubPipeline::Query, &self.agents.query, key, user_query)
                .await?;
            Some(report.outcome)
        } else {
            tracing::info!("query stage not required");
            None
        };

        // 3. Visualization，仅在查询成功后
        let visualization_outcome = if !starter.python_required {
            None
        } else if query_outcome == Some(SequenceOutcome::Success) {
            let report = converge
                .run(SubPipeline::Visualization, &self.agents.visualization, key, user_query)
                .await?;
            Some(report.outcome)
        } else {
            tracing::info!(stage = "visualization", "skipped, query sub-pipeline did not succeed");
            send_event(
                &self.observer,
                PipelineEvent::StageSkipped {
                    stage: SubPipeline::Visualization.to_string(),
                    reason: "query sub-pipeline did not succeed".to_string(),
                },
            );
            None
        };

        send_event(
            &self.observer,
            PipelineEvent::PipelineFinished {
                query_outcome,
                visualization_outcome,
            },
        );
        Ok(self.store().get(key).await?)
    }

    /// 首次提问时创建会话，初始状态来自数据 schema
    async fn ensure_session(&self, key: &SessionKey) -> Result<Session, PipelineError> {
        if let Ok(session) = self.store().get(key).await {
            return Ok(session);
        }
        let initial = match &self.config.pipeline.data_schema_path {
            Some(path) => load_initial_state(path)?,
            None => StateDelta::new(),
        };
        Ok(self.store().create(key.clone(), initial).await)
    }
}

/// 执行一轮；传输失败写入兜底状态后继续
pub(crate) async fn run_turn(
    invoker: &AgentInvoker,
    agent: &dyn Agent,
    key: &SessionKey,
    message: &str,
    observer: &Option<UnboundedSender<PipelineEvent>>,
) -> Result<TurnResult, PipelineError> {
    match invoker.invoke(agent, key, message).await {
        Ok(turn) => {
            send_event(
                observer,
                PipelineEvent::TurnCompleted {
                    agent: turn.agent.clone(),
                    tokens: turn.total_token_count,
                    source: turn.parsed_json_source,
                    retried: turn.retried,
                },
            );
            Ok(turn)
        }
        Err(err @ TurnError::Agent { .. }) => {
            let turn = invoker.recover(key, err).await?;
            send_event(
                observer,
                PipelineEvent::TurnRecovered {
                    agent: turn.agent.clone(),
                    error: turn.error.clone().unwrap_or_default(),
                },
            );
            Ok(turn)
        }
        Err(TurnError::Session(e)) => Err(e.into()),
    }
}

/// 读取数据 schema JSON：project_id / dataset_id / tables -> projects / datasets / tables
pub fn load_initial_state(path: &Path) -> Result<StateDelta, PipelineError> {
    let raw = std::fs::read_to_string(path)?;
    let schema: Value = serde_json::from_str(&raw)?;
    let mut delta = StateDelta::new();
    for (from, to) in [
        ("project_id", "projects"),
        ("dataset_id", "datasets"),
        ("tables", "tables"),
    ] {
        let value = schema.get(from).cloned().unwrap_or(Value::Null);
        delta.insert_raw(to, value)?;
    }
    Ok(delta)
}
