//! 错误类型
//!
//! 缺失的节点、属性、分支不算错误（返回 `Option` / 空集合）；
//! 只有脚本定义本身有问题时才在加载阶段失败。

use thiserror::Error;

/// 脚本加载与校验错误，加载阶段一次性暴露
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Malformed expectation schema: {0}")]
    MalformedExpectation(String),

    #[error("Task '{task}' points to unknown next task '{target}'")]
    UnknownNextTask { task: String, target: String },

    #[error("Entry point '{tag}' points to unknown target '{target}'")]
    UnknownEntryTarget { tag: String, target: String },

    /// 脚本级缺少 `default` 入口，或其目标为空
    #[error("Missing default entry point in '{0}'")]
    MissingDefaultEntryPoint(String),

    #[error("Script has no task configs")]
    Empty,

    #[error("Script parse error: {0}")]
    Parse(String),
}

/// 节点 schema 不自洽
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Variant attributes of '{class}' must be required: {attributes:?}")]
    VariantNotRequired { class: String, attributes: Vec<String> },
}

/// 引擎对外入口（二进制、异步控制器）使用的错误
#[derive(Error, Debug)]
pub enum DialogueError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}
