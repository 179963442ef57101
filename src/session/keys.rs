//! 会话状态键：已知键的枚举 schema
//!
//! 每个已知键声明期望的值形状（布尔 / 字符串 / 计数器 / 阶段结果 / 任意），
//! 在 StateDelta 边界处校验；未知键进入扩展命名空间，由各 Agent 自由使用。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 已知状态键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKey {
    // Starter 阶段
    Greeting,
    UserIntentText,
    SqlRequired,
    PythonRequired,
    StarterAgentResponse,
    // Query 子流水线
    LatestSqlOutput,
    LatestSqlResponse,
    LatestSqlResponseSummary,
    LatestBqExecutionStatus,
    LatestSqlCriticism,
    LatestSqlSequenceOutcome,
    // Visualization 子流水线
    LatestPythonCodeOutput,
    LatestPythonCodeExecutionOutcome,
    LatestPythonCodeCriticism,
    LatestImgBytes,
    LatestImgUrl,
    LatestPythonSequenceOutcome,
    // 传输失败兜底
    LatestAgentError,
    // app: 用量计数器
    TotalTokenCount,
    PromptTokenCount,
    CandidatesTokenCount,
    ThoughtsTokenCount,
    ToolUsePromptTokenCount,
    CachedContentTokenCount,
    BqApiFailureCount,
}

/// 已知键期望的值形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Bool,
    Text,
    /// 非负整数
    Counter,
    /// "SUCCESS" / "FAILURE"
    Outcome,
    Any,
}

impl ValueShape {
    /// null 对所有形状均合法（表示清除 / 未设置）
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            ValueShape::Bool => value.is_boolean(),
            ValueShape::Text => value.is_string(),
            ValueShape::Counter => value.as_u64().is_some(),
            ValueShape::Outcome => value
                .as_str()
                .map(|s| s.parse::<SequenceOutcome>().is_ok())
                .unwrap_or(false),
            ValueShape::Any => true,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ValueShape::Bool => "boolean",
            ValueShape::Text => "string",
            ValueShape::Counter => "non-negative integer",
            ValueShape::Outcome => "\"SUCCESS\" or \"FAILURE\"",
            ValueShape::Any => "any JSON value",
        }
    }
}

impl StateKey {
    pub const ALL: [StateKey; 25] = [
        StateKey::Greeting,
        StateKey::UserIntentText,
        StateKey::SqlRequired,
        StateKey::PythonRequired,
        StateKey::StarterAgentResponse,
        StateKey::LatestSqlOutput,
        StateKey::LatestSqlResponse,
        StateKey::LatestSqlResponseSummary,
        StateKey::LatestBqExecutionStatus,
        StateKey::LatestSqlCriticism,
        StateKey::LatestSqlSequenceOutcome,
        StateKey::LatestPythonCodeOutput,
        StateKey::LatestPythonCodeExecutionOutcome,
        StateKey::LatestPythonCodeCriticism,
        StateKey::LatestImgBytes,
        StateKey::LatestImgUrl,
        StateKey::LatestPythonSequenceOutcome,
        StateKey::LatestAgentError,
        StateKey::TotalTokenCount,
        StateKey::PromptTokenCount,
        StateKey::CandidatesTokenCount,
        StateKey::ThoughtsTokenCount,
        StateKey::ToolUsePromptTokenCount,
        StateKey::CachedContentTokenCount,
        StateKey::BqApiFailureCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Greeting => "greeting",
            StateKey::UserIntentText => "user_intent_text",
            StateKey::SqlRequired => "sql_required",
            StateKey::PythonRequired => "python_required",
            StateKey::StarterAgentResponse => "starter_agent_response",
            StateKey::LatestSqlOutput => "latest_sql_output",
            StateKey::LatestSqlResponse => "latest_sql_response",
            StateKey::LatestSqlResponseSummary => "latest_sql_response_summary",
            StateKey::LatestBqExecutionStatus => "latest_bq_execution_status",
            StateKey::LatestSqlCriticism => "latest_sql_criticism",
            StateKey::LatestSqlSequenceOutcome => "latest_sql_sequence_outcome",
            StateKey::LatestPythonCodeOutput => "latest_python_code_output",
            StateKey::LatestPythonCodeExecutionOutcome => "latest_python_code_execution_outcome",
            StateKey::LatestPythonCodeCriticism => "latest_python_code_criticism",
            StateKey::LatestImgBytes => "latest_img_bytes",
            StateKey::LatestImgUrl => "latest_img_url",
            StateKey::LatestPythonSequenceOutcome => "latest_python_sequence_outcome",
            StateKey::LatestAgentError => "latest_agent_error",
            StateKey::TotalTokenCount => "app:total_token_count",
            StateKey::PromptTokenCount => "app:prompt_token_count",
            StateKey::CandidatesTokenCount => "app:candidates_token_count",
            StateKey::ThoughtsTokenCount => "app:thoughts_token_count",
            StateKey::ToolUsePromptTokenCount => "app:tool_use_prompt_token_count",
            StateKey::CachedContentTokenCount => "app:cached_content_token_count",
            StateKey::BqApiFailureCount => "app:bq_api_failure_count",
        }
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            StateKey::SqlRequired | StateKey::PythonRequired => ValueShape::Bool,
            StateKey::Greeting
            | StateKey::UserIntentText
            | StateKey::LatestSqlOutput
            | StateKey::LatestBqExecutionStatus
            | StateKey::LatestSqlCriticism
            | StateKey::LatestPythonCodeOutput
            | StateKey::LatestPythonCodeExecutionOutcome
            | StateKey::LatestPythonCodeCriticism
            | StateKey::LatestImgBytes
            | StateKey::LatestImgUrl
            | StateKey::LatestAgentError => ValueShape::Text,
            StateKey::LatestSqlSequenceOutcome | StateKey::LatestPythonSequenceOutcome => {
                ValueShape::Outcome
            }
            StateKey::TotalTokenCount
            | StateKey::PromptTokenCount
            | StateKey::CandidatesTokenCount
            | StateKey::ThoughtsTokenCount
            | StateKey::ToolUsePromptTokenCount
            | StateKey::CachedContentTokenCount
            | StateKey::BqApiFailureCount => ValueShape::Counter,
            StateKey::StarterAgentResponse
            | StateKey::LatestSqlResponse
            | StateKey::LatestSqlResponseSummary => ValueShape::Any,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateKey::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or(())
    }
}

/// 子流水线阶段结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequenceOutcome {
    Success,
    Failure,
}

impl SequenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceOutcome::Success => "SUCCESS",
            SequenceOutcome::Failure => "FAILURE",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SequenceOutcome::Success)
    }
}

impl fmt::Display for SequenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceOutcome {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(SequenceOutcome::Success),
            "FAILURE" => Ok(SequenceOutcome::Failure),
            _ => Err(()),
        }
    }
}
