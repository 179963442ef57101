//! Agent 发出的原始事件
//!
//! 一个事件可以同时携带任意组合的片段（文本、工具调用、工具结果、可执行代码、代码执行结果）
//! 以及可选的用量统计；也可能什么都不带（系统性空事件）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 代码执行产物：内联编码数据或可下载 URL，编排核心不解码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ExecutionOutput {
    Inline(String),
    Url(String),
}

/// 事件中的单个片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// 文本片段（流式时逐段到达，需要累加）
    Text { text: String },
    /// 请求外部动作
    FunctionCall { name: String, args: Value },
    /// 外部动作结果
    FunctionResponse { name: String, response: Value },
    /// Agent 生成的代码
    ExecutableCode { code: String },
    /// 代码执行结果
    CodeExecutionResult {
        outcome: String,
        output: Option<ExecutionOutput>,
    },
}

/// 单次调用的用量统计；任一字段可能缺失
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_token_count: Option<u64>,
    pub candidates_token_count: Option<u64>,
    pub thoughts_token_count: Option<u64>,
    pub tool_use_prompt_token_count: Option<u64>,
    pub cached_content_token_count: Option<u64>,
    pub total_token_count: Option<u64>,
}

/// Agent 事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub author: String,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub usage: Option<UsageMetadata>,
}

impl AgentEvent {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            parts: Vec::new(),
            usage: None,
        }
    }

    pub fn text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author).with_part(Part::Text { text: text.into() })
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_usage(mut self, usage: UsageMetadata) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.usage.is_none()
    }
}
