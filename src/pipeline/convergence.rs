//! 收敛循环：Writer 一次 -> 最多 max_retries 轮 (Critic -> Refiner)
//!
//! 状态机：WRITE -> {CONVERGED, CRITIQUE, EXHAUSTED}，CRITIQUE -> REFINE，
//! REFINE -> {CONVERGED, CRITIQUE, EXHAUSTED}。
//! 每轮开始前由控制器自己检查接受条件（不依赖 Refiner 的跳过守卫）；
//! 耗尽不是错误，只是 FAILURE 结果。

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::Agent;
use crate::core::PipelineError;
use crate::session::{Event, SequenceOutcome, SessionKey, SessionState, StateDelta, StateKey};
use crate::turn::AgentInvoker;

use super::controller::run_turn;
use super::events::{send_event, PipelineEvent};

/// 子流水线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubPipeline {
    Query,
    Visualization,
}

impl SubPipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubPipeline::Query => "query",
            SubPipeline::Visualization => "visualization",
        }
    }

    /// Critic 结论写入的键
    pub fn verdict_key(&self) -> StateKey {
        match self {
            SubPipeline::Query => StateKey::LatestSqlCriticism,
            SubPipeline::Visualization => StateKey::LatestPythonCodeCriticism,
        }
    }

    pub fn outcome_key(&self) -> StateKey {
        match self {
            SubPipeline::Query => StateKey::LatestSqlSequenceOutcome,
            SubPipeline::Visualization => StateKey::LatestPythonSequenceOutcome,
        }
    }

    /// 接受条件
    ///
    /// - Query：结论等于通过短语，且最近一次执行状态为 SUCCESS（不区分大小写）
    /// - Visualization：结论等于通过短语，且代码执行结果包含通过短语
    ///   （执行结果常以下划线分隔，如 `OUTCOME_OK`，比较前把 `_` 视为空格）
    pub fn accepted(&self, state: &SessionState, phrase: &str) -> bool {
        if state.text(self.verdict_key()) != Some(phrase) {
            return false;
        }
        match self {
            SubPipeline::Query => state
                .text(StateKey::LatestBqExecutionStatus)
                .map(|s| s.trim().eq_ignore_ascii_case("SUCCESS"))
                .unwrap_or(false),
            SubPipeline::Visualization => state
                .text(StateKey::LatestPythonCodeExecutionOutcome)
                .map(|o| o.replace('_', " ").contains(phrase))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for SubPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个子流水线的三个 Agent
#[derive(Clone)]
pub struct StageAgents {
    pub writer: Arc<dyn Agent>,
    pub critic: Arc<dyn Agent>,
    pub refiner: Arc<dyn Agent>,
}

impl StageAgents {
    pub fn new(writer: Arc<dyn Agent>, critic: Arc<dyn Agent>, refiner: Arc<dyn Agent>) -> Self {
        Self {
            writer,
            critic,
            refiner,
        }
    }
}

/// 终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Converged,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvergenceReport {
    pub stage: SubPipeline,
    pub state: LoopState,
    /// 实际执行的 Critic/Refiner 轮数
    pub attempts: usize,
    pub outcome: SequenceOutcome,
}

pub struct ConvergenceLoop<'a> {
    invoker: &'a AgentInvoker,
    max_retries: usize,
    accepted_phrase: &'a str,
    observer: &'a Option<UnboundedSender<PipelineEvent>>,
}

impl<'a> ConvergenceLoop<'a> {
    pub fn new(
        invoker: &'a AgentInvoker,
        max_retries: usize,
        accepted_phrase: &'a str,
        observer: &'a Option<UnboundedSender<PipelineEvent>>,
    ) -> Self {
        Self {
            invoker,
            max_retries,
            accepted_phrase,
            observer,
        }
    }

    pub async fn run(
        &self,
        stage: SubPipeline,
        agents: &StageAgents,
        key: &SessionKey,
        user_query: &str,
    ) -> Result<ConvergenceReport, PipelineError> {
        tracing::info!(stage = %stage, session = %key, "sub-pipeline started");
        send_event(self.observer, PipelineEvent::StageStarted { stage: stage.to_string() });

        run_turn(self.invoker, agents.writer.as_ref(), key, user_query, self.observer).await?;

        let mut attempts = 0;
        let state = loop {
            let session = self.invoker.store().get(key).await?;
            if stage.accepted(&session.state, self.accepted_phrase) {
                break LoopState::Converged;
            }
            if attempts >= self.max_retries {
                break LoopState::Exhausted;
            }
            attempts += 1;
            tracing::info!(stage = %stage, attempt = attempts, max = self.max_retries, "critique and refine");
            send_event(
                self.observer,
                PipelineEvent::ConvergenceAttempt {
                    stage: stage.to_string(),
                    attempt: attempts,
                    max_retries: self.max_retries,
                },
            );
            run_turn(self.invoker, agents.critic.as_ref(), key, user_query, self.observer).await?;
            run_turn(self.invoker, agents.refiner.as_ref(), key, user_query, self.observer).await?;
        };

        let outcome = match state {
            LoopState::Converged => {
                tracing::info!(stage = %stage, attempts, "sub-pipeline converged");
                send_event(
                    self.observer,
                    PipelineEvent::Converged { stage: stage.to_string(), attempts },
                );
                SequenceOutcome::Success
            }
            LoopState::Exhausted => {
                tracing::warn!(stage = %stage, attempts, "sub-pipeline exhausted retries");
                send_event(
                    self.observer,
                    PipelineEvent::Exhausted { stage: stage.to_string(), attempts },
                );
                SequenceOutcome::Failure
            }
        };

        let session = self.invoker.store().get(key).await?;
        let mut delta = StateDelta::new();
        delta.set_outcome(stage.outcome_key(), outcome);
        self.invoker
            .store()
            .append_event(&session, Event::system(delta))
            .await?;

        Ok(ConvergenceReport {
            stage,
            state,
            attempts,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::{code_result, sql_call, sql_response};
    use crate::agent::{ScriptedAgent, SkipWhenAccepted};
    use crate::config::AppConfig;
    use crate::session::{InMemorySessionStore, SessionStore};
    use serde_json::json;

    const OK: &str = "OUTCOME OK";

    fn state_with(entries: &[(StateKey, &str)]) -> SessionState {
        let mut delta = StateDelta::new();
        for (k, v) in entries {
            delta.set_text(*k, *v);
        }
        let mut state = SessionState::new();
        state.apply(&delta);
        state
    }

    #[test]
    fn test_query_predicate() {
        let state = state_with(&[
            (StateKey::LatestSqlCriticism, OK),
            (StateKey::LatestBqExecutionStatus, "success"),
        ]);
        assert!(SubPipeline::Query.accepted(&state, OK));

        let state = state_with(&[
            (StateKey::LatestSqlCriticism, OK),
            (StateKey::LatestBqExecutionStatus, "ERROR"),
        ]);
        assert!(!SubPipeline::Query.accepted(&state, OK));

        let state = state_with(&[(StateKey::LatestBqExecutionStatus, "SUCCESS")]);
        assert!(!SubPipeline::Query.accepted(&state, OK));
    }

    #[test]
    fn test_visualization_predicate() {
        let state = state_with(&[
            (StateKey::LatestPythonCodeCriticism, OK),
            (StateKey::LatestPythonCodeExecutionOutcome, "OUTCOME_OK"),
        ]);
        assert!(SubPipeline::Visualization.accepted(&state, OK));

        let state = state_with(&[
            (StateKey::LatestPythonCodeCriticism, OK),
            (StateKey::LatestPythonCodeExecutionOutcome, "OUTCOME_FAILED"),
        ]);
        assert!(!SubPipeline::Visualization.accepted(&state, OK));
    }

    async fn setup(seed: StateDelta) -> (Arc<InMemorySessionStore>, AgentInvoker, SessionKey) {
        let store = Arc::new(InMemorySessionStore::new());
        let key = SessionKey::new("MetricMind", "u1", "s1");
        store.create(key.clone(), seed).await;
        let invoker = AgentInvoker::new(store.clone(), &AppConfig::default());
        (store, invoker, key)
    }

    #[tokio::test]
    async fn test_skip_fast_path_never_calls_critic() {
        let mut seed = StateDelta::new();
        seed.set_text(StateKey::LatestSqlCriticism, OK);
        let (store, invoker, key) = setup(seed).await;

        let writer = Arc::new(ScriptedAgent::new("sql_writer_agent").reply(vec![
            sql_call("sql_writer_agent", "SELECT 1"),
            sql_response("sql_writer_agent", "SUCCESS", json!([{"x": 1}])),
        ]));
        let critic = Arc::new(ScriptedAgent::new("sql_critic_agent").reply_text("OUTCOME ERROR"));
        let refiner = Arc::new(ScriptedAgent::new("sql_refiner_agent").reply_text("{}"));
        let agents = StageAgents::new(writer.clone(), critic.clone(), refiner.clone());

        let observer = None;
        let report = ConvergenceLoop::new(&invoker, 3, OK, &observer)
            .run(SubPipeline::Query, &agents, &key, "q")
            .await
            .unwrap();

        assert_eq!(report.state, LoopState::Converged);
        assert_eq!(report.attempts, 0);
        assert_eq!(writer.calls(), 1);
        assert_eq!(critic.calls(), 0);
        assert_eq!(refiner.calls(), 0);

        let session = store.get(&key).await.unwrap();
        assert_eq!(
            session.state.outcome(StateKey::LatestSqlSequenceOutcome),
            Some(SequenceOutcome::Success)
        );
    }

    #[tokio::test]
    async fn test_never_accepting_critic_exhausts_after_max_retries() {
        let (store, invoker, key) = setup(StateDelta::new()).await;

        let writer = Arc::new(ScriptedAgent::new("sql_writer_agent").reply(vec![
            sql_call("sql_writer_agent", "SELEC 1"),
            sql_response("sql_writer_agent", "ERROR", json!([])),
        ]));
        let critic = Arc::new(
            ScriptedAgent::new("sql_critic_agent")
                .with_output_key(StateKey::LatestSqlCriticism.as_str())
                .reply_text("Syntax error near SELEC. OUTCOME: ERROR"),
        );
        let refiner = Arc::new(ScriptedAgent::new("sql_refiner_agent").reply(vec![
            sql_call("sql_refiner_agent", "SELEC 1"),
            sql_response("sql_refiner_agent", "ERROR", json!([])),
        ]));
        let agents = StageAgents::new(writer.clone(), critic.clone(), refiner.clone());

        let observer = None;
        let report = ConvergenceLoop::new(&invoker, 3, OK, &observer)
            .run(SubPipeline::Query, &agents, &key, "q")
            .await
            .unwrap();

        assert_eq!(report.state, LoopState::Exhausted);
        assert_eq!(report.outcome, SequenceOutcome::Failure);
        assert_eq!(report.attempts, 3);
        assert_eq!(critic.calls(), 3);
        assert_eq!(refiner.calls(), 3);

        let session = store.get(&key).await.unwrap();
        assert_eq!(
            session.state.outcome(StateKey::LatestSqlSequenceOutcome),
            Some(SequenceOutcome::Failure)
        );
        assert_eq!(session.state.counter(StateKey::BqApiFailureCount), 4);
    }

    #[tokio::test]
    async fn test_refiner_is_skipped_once_critic_accepts() {
        let store = Arc::new(InMemorySessionStore::new());
        let key = SessionKey::new("MetricMind", "u1", "s1");
        store.create(key.clone(), StateDelta::new()).await;
        let mut cfg = AppConfig::default();
        cfg.pipeline.retry_unparsed_output = false;
        let invoker = AgentInvoker::new(store.clone(), &cfg);

        let writer = Arc::new(ScriptedAgent::new("python_writer_agent").reply(vec![
            code_result("python_writer_agent", "OUTCOME_FAILED", None),
        ]));
        let critic = Arc::new(
            ScriptedAgent::new("python_critic_agent")
                .with_output_key(StateKey::LatestPythonCodeCriticism.as_str())
                .reply_text("Axis labels are missing. OUTCOME: ERROR")
                .reply_text(OK),
        );
        let inner_refiner = Arc::new(ScriptedAgent::new("python_refiner_agent").reply(vec![
            code_result("python_refiner_agent", "OUTCOME_OK", None),
        ]));
        let refiner: Arc<dyn Agent> = Arc::new(SkipWhenAccepted::new(
            inner_refiner.clone(),
            StateKey::LatestPythonCodeCriticism,
            OK,
        ));
        let agents = StageAgents::new(writer, critic.clone(), refiner);

        let observer = None;
        let report = ConvergenceLoop::new(&invoker, 3, OK, &observer)
            .run(SubPipeline::Visualization, &agents, &key, "q")
            .await
            .unwrap();

        assert_eq!(report.state, LoopState::Converged);
        assert_eq!(report.attempts, 2);
        assert_eq!(critic.calls(), 2);
        // 第二轮 Critic 已通过，Refiner 被守卫跳过
        assert_eq!(inner_refiner.calls(), 1);

        let session = store.get(&key).await.unwrap();
        assert_eq!(
            session.state.outcome(StateKey::LatestPythonSequenceOutcome),
            Some(SequenceOutcome::Success)
        );
    }
}
