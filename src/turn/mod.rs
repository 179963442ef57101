//! 单轮调用：事件归一化、结构化输出提取、调用适配

pub mod adapter;
pub mod extractor;
pub mod normalizer;
pub mod result;
pub mod summarizer;

pub use adapter::AgentInvoker;
pub use extractor::{extract, extract_retry, extract_text, ExtractionStrategy};
pub use normalizer::{EventNormalizer, EXECUTE_SQL_TOOL};
pub use result::{ParsedSource, TurnResult, TOOL_CALL_PREFIX, TOOL_RESPONSE_PREFIX};
pub use summarizer::{prompt_view, summarize_sql_response, truncate_text};
