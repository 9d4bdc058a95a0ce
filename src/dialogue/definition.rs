//! 脚本定义（可序列化的原始形式）
//!
//! 脚本以 JSON 或 TOML 书写，结构为 脚本 → 任务配置 → 任务 → 分支。
//! 这里只负责反序列化与期望声明的解析；引用校验在 `Script::load` 中完成。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::error::ScriptError;
use crate::expectation::Expectation;
use crate::graph::NodeSchema;

/// 信息映射：`{"User@gender": {"male": "anh", "default": "bạn"}}`
pub type InfoMapping = IndexMap<String, IndexMap<String, String>>;

/// 一个分支的声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchDef {
    /// 意图期望，如 `User@confirm`、`*Bot@bill_confirmed`
    pub intents: Vec<String>,
    /// 值期望，如 `*User@address=[ADDRESS]`
    pub values: Vec<String>,
    pub responses: Vec<String>,
    #[serde(alias = "next_actions")]
    pub next_tasks: Vec<String>,
    #[serde(alias = "post_actions")]
    pub post_hooks: Vec<String>,
}

impl BranchDef {
    /// 解析全部期望声明；意图列表里出现值声明（或反之）视为格式错误
    pub fn declarations(&self) -> Result<Vec<Expectation>, ScriptError> {
        let mut out = Vec::with_capacity(self.intents.len() + self.values.len());
        for schema in &self.intents {
            let expectation = Expectation::parse(schema)?;
            if !expectation.is_intent() {
                return Err(ScriptError::MalformedExpectation(schema.clone()));
            }
            out.push(expectation);
        }
        for schema in &self.values {
            let expectation = Expectation::parse(schema)?;
            if expectation.is_intent() {
                return Err(ScriptError::MalformedExpectation(schema.clone()));
            }
            out.push(expectation);
        }
        Ok(out)
    }
}

/// 入口声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPointDef {
    pub tag: String,
    #[serde(default, alias = "actions")]
    pub targets: Vec<String>,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub is_global: bool,
}

/// 任务（机器人的一个动作）声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDef {
    /// 进入任务时机器人的提问模板
    pub requests: Vec<String>,
    pub required: bool,
    pub passable: bool,
    /// 默认分支
    pub expectations: BranchDef,
    /// 备选分支，按声明顺序
    pub branches: Vec<BranchDef>,
    #[serde(alias = "pre_actions")]
    pub pre_hooks: Vec<String>,
    #[serde(alias = "post_actions")]
    pub post_hooks: Vec<String>,
}

/// 任务配置（一个 Turn 对应的子对话）声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfigDef {
    pub entry_points: Vec<EntryPointDef>,
    pub info_mapping: InfoMapping,
    /// 默认分支：`next_tasks` 的第一个是本配置完成后的下一个任务配置
    pub expectations: BranchDef,
    /// 按意图选择下一个任务配置的分支
    pub branches: Vec<BranchDef>,
    pub tasks: IndexMap<String, TaskDef>,
}

/// 脚本声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptDef {
    pub name: String,
    pub entry_points: Vec<EntryPointDef>,
    pub info_mapping: InfoMapping,
    #[serde(alias = "tasks")]
    pub task_configs: IndexMap<String, TaskConfigDef>,
    /// 随脚本分发的节点 schema，加载时写入 schema 缓存
    pub schemas: Vec<NodeSchema>,
}

impl ScriptDef {
    pub fn from_json(text: &str) -> Result<Self, ScriptError> {
        serde_json::from_str(text).map_err(|e| ScriptError::Parse(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, ScriptError> {
        toml::from_str(text).map_err(|e| ScriptError::Parse(e.to_string()))
    }
}
