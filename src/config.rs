//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `METRICMIND__*` 覆盖
//! （双下划线表示嵌套，如 `METRICMIND__PIPELINE__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub pipeline: PipelineSection,
    pub state: StateSection,
}

/// [app] 段：应用名与默认用户
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub user_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "MetricMind".to_string(),
            user_id: "default_user".to_string(),
        }
    }
}

/// [pipeline] 段：收敛循环与结构化输出恢复
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Critic/Refiner 最大轮数
    pub max_retries: usize,
    /// Critic 表示无条件通过的短语
    pub outcome_ok_phrase: String,
    /// 结构化输出全部解析失败时是否发起一次重试
    pub retry_unparsed_output: bool,
    /// 数据 schema（project_id / dataset_id / tables），用于初始化新会话
    pub data_schema_path: Option<PathBuf>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            outcome_ok_phrase: "OUTCOME OK".to_string(),
            retry_unparsed_output: true,
            data_schema_path: None,
        }
    }
}

/// [state] 段：提示词状态视图的截断与摘要
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// 状态中字符串值超过此长度时截断
    pub max_prompt_chars: usize,
    /// SQL 结果摘要保留的样例行数
    pub sample_rows: usize,
    /// 样例行中单元格最大字符数
    pub max_cell_chars: usize,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            max_prompt_chars: 2000,
            sample_rows: 3,
            max_cell_chars: 200,
        }
    }
}

/// 从 config 目录加载配置，环境变量 METRICMIND__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 METRICMIND__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("METRICMIND")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.name, "MetricMind");
        assert_eq!(cfg.pipeline.max_retries, 3);
        assert_eq!(cfg.pipeline.outcome_ok_phrase, "OUTCOME OK");
        assert!(cfg.pipeline.retry_unparsed_output);
        assert_eq!(cfg.state.max_prompt_chars, 2000);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pipeline]\nmax_retries = 5\n\n[state]\nsample_rows = 1"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.pipeline.max_retries, 5);
        assert_eq!(cfg.state.sample_rows, 1);
        assert_eq!(cfg.pipeline.outcome_ok_phrase, "OUTCOME OK");
    }
}
