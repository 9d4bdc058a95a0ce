//! 入口：一个或多个 `+` 连接的意图标签，指向可进入的任务

use serde::{Deserialize, Serialize};

use crate::intents::{DEFAULT_TAG, USER_SUBJECT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// 原始键，如 `User@ask_price+User@mention_object`
    pub key: String,
    tags: Vec<String>,
    /// 目标任务名（脚本级入口时是任务配置名），按声明顺序
    pub targets: Vec<String>,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub is_global: bool,
}

impl EntryPoint {
    pub fn new(key: impl Into<String>, targets: Vec<String>, responses: Vec<String>, is_global: bool) -> Self {
        let key = key.into();
        let tags = key
            .split('+')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            key,
            tags,
            targets,
            responses,
            is_global,
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_default(&self) -> bool {
        self.key == DEFAULT_TAG
    }

    /// 键里含有用户意图
    pub fn has_user_intent(&self) -> bool {
        self.key.contains(&format!("{USER_SUBJECT}@"))
    }

    /// 所有标签都在集合里时返回分数（标签个数），多标签入口因此优先于单标签入口
    pub fn match_score(&self, intents: &[String]) -> Option<usize> {
        (!self.tags.is_empty() && self.tags.iter().all(|t| intents.contains(t))).then_some(self.tags.len())
    }

    pub fn is_satisfied(&self, intents: &[String]) -> bool {
        self.match_score(intents).is_some()
    }

    pub fn first_target(&self) -> Option<&str> {
        self.targets.first().map(String::as_str)
    }
}
