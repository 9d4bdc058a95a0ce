//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__DIALOGUE__DELIMITER=" | "`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{ControllerSettings, ProcessorSettings};
use crate::graph::SearchSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub dialogue: DialogueSection,
    #[serde(default)]
    pub graph: GraphSection,
    #[serde(default)]
    pub schema: SchemaSection,
}

/// [app] 段：应用名、会话存储目录、脚本路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话快照目录，未设置时用 ./data/conversations
    pub data_dir: Option<PathBuf>,
    /// 对话脚本（.json / .toml）
    pub script_path: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/conversations"))
    }
}

/// [dialogue] 段：回复分隔符与推进上限
#[derive(Debug, Clone, Deserialize)]
pub struct DialogueSection {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// 一个 Turn 内任务推进的最大步数
    #[serde(default = "default_max_steps")]
    pub max_advance_steps: usize,
    /// 一条消息之后 Turn 转移的最大次数
    #[serde(default = "default_max_steps")]
    pub max_turn_transitions: usize,
}

fn default_delimiter() -> String {
    "*".to_string()
}

fn default_max_steps() -> usize {
    3
}

impl Default for DialogueSection {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            max_advance_steps: default_max_steps(),
            max_turn_transitions: default_max_steps(),
        }
    }
}

/// [graph] 段：提及窗口与名称检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSection {
    /// 多少分钟内提及的对象算作“用户提到了对象”
    #[serde(default = "default_mention_window_mins")]
    pub mention_window_mins: i64,
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    #[serde(default = "default_search_keep_ratio")]
    pub search_keep_ratio: f32,
    #[serde(default = "default_search_min_score")]
    pub search_min_score: f32,
}

fn default_mention_window_mins() -> i64 {
    5
}

fn default_search_top_k() -> usize {
    20
}

fn default_search_keep_ratio() -> f32 {
    0.8
}

fn default_search_min_score() -> f32 {
    0.2
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            mention_window_mins: default_mention_window_mins(),
            search_top_k: default_search_top_k(),
            search_keep_ratio: default_search_keep_ratio(),
            search_min_score: default_search_min_score(),
        }
    }
}

impl GraphSection {
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            top_k: self.search_top_k,
            keep_ratio: self.search_keep_ratio,
            min_score: self.search_min_score,
        }
    }

    pub fn mention_window_ms(&self) -> i64 {
        self.mention_window_mins * 60 * 1000
    }
}

/// [schema] 段：节点 schema 缓存
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// 后台刷新间隔（秒）
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// 额外的 schema 文件（JSON 数组）
    pub path: Option<PathBuf>,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_refresh_interval_secs() -> u64 {
    60
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            path: None,
        }
    }
}

impl SchemaSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            dialogue: DialogueSection::default(),
            graph: GraphSection::default(),
            schema: SchemaSection::default(),
        }
    }
}

impl AppConfig {
    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            delimiter: self.dialogue.delimiter.clone(),
            max_advance_steps: self.dialogue.max_advance_steps,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_turn_transitions: self.dialogue.max_turn_transitions,
            search: self.graph.search_settings(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（脚本或检索参数调整后由调用方决定是否重建控制器）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.dialogue.delimiter, "*");
        assert_eq!(config.dialogue.max_advance_steps, 3);
        assert_eq!(config.graph.mention_window_ms(), 5 * 60 * 1000);
        assert_eq!(config.graph.search_settings(), SearchSettings::default());
        assert_eq!(config.app.data_dir(), PathBuf::from("data/conversations"));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bee.toml");
        std::fs::write(
            &path,
            "[dialogue]\ndelimiter = \" | \"\nmax_turn_transitions = 5\n\n[graph]\nsearch_top_k = 7\n",
        )
        .unwrap();
        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.dialogue.delimiter, " | ");
        assert_eq!(config.dialogue.max_turn_transitions, 5);
        assert_eq!(config.dialogue.max_advance_steps, 3);
        assert_eq!(config.graph.search_top_k, 7);
        assert_eq!(config.controller_settings().search.top_k, 7);
    }
}
