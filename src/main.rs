//! MetricMind 演示入口
//!
//! 用脚本化 Agent 跑一遍完整流水线（无需模型 API），过程事件写入日志，
//! 最终会话状态以 JSON 打印到 stdout。用法：`metricmind [QUESTION]`

use std::sync::Arc;

use anyhow::Context;
use metricmind::agent::mock::{sql_call, sql_response, usage};
use metricmind::agent::{Agent, AgentEvent, ExecutionOutput, Part, ScriptedAgent, SkipWhenAccepted};
use metricmind::config::{load_config, AppConfig};
use metricmind::pipeline::{Pipeline, PipelineAgents, StageAgents, StarterResponse};
use metricmind::session::{InMemorySessionStore, SessionStore, StateKey};
use serde_json::json;
use tokio::sync::mpsc;

const DEFAULT_QUESTION: &str = "Show monthly revenue for 2024 as a bar chart";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    metricmind::observability::init();

    let config = match load_config(None) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            AppConfig::default()
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let question = if args.is_empty() {
        DEFAULT_QUESTION.to_string()
    } else {
        args.join(" ")
    };

    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(store, demo_agents(&config), config.clone()).with_observer(tx);

    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                tracing::info!(event = %line, "pipeline event");
            }
        }
    });

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = pipeline
        .run_pipeline(&config.app.name, &config.app.user_id, &session_id, &question)
        .await
        .context("Pipeline run failed")?;

    // 关闭事件通道，等待日志打印完
    drop(pipeline);
    let _ = printer.await;

    println!(
        "{}",
        serde_json::to_string_pretty(session.state.as_map()).context("Failed to render state")?
    );
    Ok(())
}

fn demo_agents(config: &AppConfig) -> PipelineAgents {
    let ok = config.pipeline.outcome_ok_phrase.clone();

    let mut starter = ScriptedAgent::new("starter_agent")
        .with_output_key(StateKey::StarterAgentResponse.as_str())
        .structured()
        .reply_text(
            json!({
                "greeting": "Hi! Let me pull that up for you.",
                "user_intent": "monthly revenue for 2024, visualised as a bar chart",
                "sql_required": true,
                "python_required": true
            })
            .to_string(),
        );
    if let Some(schema) = StarterResponse::schema_json() {
        starter = starter.with_schema(schema);
    }

    let rows = json!([
        {"month": "2024-01", "revenue": 120500},
        {"month": "2024-02", "revenue": 98300},
        {"month": "2024-03", "revenue": 134250}
    ]);
    let sql_writer = ScriptedAgent::new("sql_writer_agent").reply(vec![
        sql_call(
            "sql_writer_agent",
            "SELECT FORMAT_DATE('%Y-%m', order_date) AS month, SUM(amount) AS revenue \
             FROM sales.orders WHERE EXTRACT(YEAR FROM order_date) = 2024 \
             GROUP BY month ORDER BY month",
        ),
        sql_response("sql_writer_agent", "SUCCESS", rows),
        usage("sql_writer_agent", 812, 96),
    ]);
    let sql_critic = ScriptedAgent::new("sql_critic_agent")
        .with_output_key(StateKey::LatestSqlCriticism.as_str())
        .reply(vec![
            AgentEvent::text("sql_critic_agent", ok.clone()),
            usage("sql_critic_agent", 640, 4),
        ]);
    let sql_refiner = ScriptedAgent::new("sql_refiner_agent").reply_text("{}");

    let python_writer = ScriptedAgent::new("python_writer_agent").reply(vec![
        AgentEvent::new("python_writer_agent").with_part(Part::ExecutableCode {
            code: "import matplotlib.pyplot as plt\nplt.bar(df.month, df.revenue)".to_string(),
        }),
        AgentEvent::new("python_writer_agent").with_part(Part::CodeExecutionResult {
            outcome: "OUTCOME_OK".to_string(),
            output: Some(ExecutionOutput::Url("file:///tmp/monthly_revenue.png".to_string())),
        }),
        AgentEvent::text(
            "python_writer_agent",
            "```json\n{\"chart\": \"bar\", \"x\": \"month\", \"y\": \"revenue\"}\n```",
        ),
        usage("python_writer_agent", 1020, 210),
    ]);
    let python_critic = ScriptedAgent::new("python_critic_agent")
        .with_output_key(StateKey::LatestPythonCodeCriticism.as_str())
        .reply_text(ok.clone());
    let python_refiner = ScriptedAgent::new("python_refiner_agent").reply_text("{}");

    let guarded = |inner: ScriptedAgent, verdict: StateKey| -> Arc<dyn Agent> {
        Arc::new(SkipWhenAccepted::new(Arc::new(inner), verdict, ok.clone()))
    };

    PipelineAgents {
        starter: Arc::new(starter),
        query: StageAgents::new(
            Arc::new(sql_writer),
            Arc::new(sql_critic),
            guarded(sql_refiner, StateKey::LatestSqlCriticism),
        ),
        visualization: StageAgents::new(
            Arc::new(python_writer),
            Arc::new(python_critic),
            guarded(python_refiner, StateKey::LatestPythonCodeCriticism),
        ),
    }
}
