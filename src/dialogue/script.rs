//! 脚本：任务配置集合 + 脚本级入口 + 共享分支表
//!
//! 加载时一次性校验所有引用（下一个任务、入口目标、期望声明），
//! 有问题立即失败，运行期不再出现悬空引用。

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::error::{DialogueError, SchemaError, ScriptError};
use crate::dialogue::definition::{InfoMapping, ScriptDef};
use crate::dialogue::task_config::{build_entry_points, TaskConfig};
use crate::expectation::{BranchRegistry, EntryPoint};
use crate::graph::{NodeSchema, SchemaCache};
use crate::intents::DEFAULT_TAG;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    registry: BranchRegistry,
    configs: IndexMap<String, TaskConfig>,
    entry_points: IndexMap<String, EntryPoint>,
    #[serde(default)]
    info_mapping: InfoMapping,
    #[serde(default)]
    schemas: Vec<NodeSchema>,
}

impl Script {
    pub fn load(def: ScriptDef) -> Result<Self, ScriptError> {
        if def.task_configs.is_empty() {
            return Err(ScriptError::Empty);
        }
        let mut registry = BranchRegistry::new();
        let mut configs = IndexMap::new();
        for (name, config_def) in &def.task_configs {
            let mut config = TaskConfig::from_def(name, config_def, &mut registry)?;
            config.merge_info_mapping(&def.info_mapping);
            configs.insert(name.clone(), config);
        }

        let mut script = Self {
            name: def.name.clone(),
            registry,
            configs,
            entry_points: build_entry_points(&def.entry_points),
            info_mapping: def.info_mapping,
            schemas: def.schemas,
        };
        script.hoist_global_entry_points();
        script.validate()?;
        tracing::info!(
            script = %script.name,
            configs = script.configs.len(),
            branches = script.registry.len(),
            expectations = script.registry.network().len(),
            "script loaded"
        );
        Ok(script)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ScriptError> {
        Self::load(ScriptDef::from_json(text)?)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ScriptError> {
        Self::load(ScriptDef::from_toml(text)?)
    }

    /// 按扩展名选择格式：`.toml` 为 TOML，其余按 JSON 解析
    pub fn from_path(path: &Path) -> Result<Self, DialogueError> {
        let text = std::fs::read_to_string(path)?;
        let script = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text)?,
            _ => Self::from_json_str(&text)?,
        };
        Ok(script)
    }

    /// 任务级的全局入口提升到脚本级，同标签的目标配置依次追加
    fn hoist_global_entry_points(&mut self) {
        for (config_name, config) in &self.configs {
            for entry in config.entry_points().filter(|e| e.is_global) {
                match self.entry_points.get_mut(&entry.key) {
                    Some(existing) => {
                        if !existing.targets.contains(config_name) {
                            existing.targets.push(config_name.clone());
                        }
                    }
                    None => {
                        let hoisted = EntryPoint::new(entry.key.clone(), vec![config_name.clone()], Vec::new(), true);
                        self.entry_points.insert(entry.key.clone(), hoisted);
                    }
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ScriptError> {
        let default_ok = self
            .entry_points
            .get(DEFAULT_TAG)
            .is_some_and(|e| e.first_target().is_some());
        if !default_ok {
            return Err(ScriptError::MissingDefaultEntryPoint(self.name.clone()));
        }
        for entry in self.entry_points.values() {
            for target in &entry.targets {
                if !self.configs.contains_key(target) {
                    return Err(ScriptError::UnknownEntryTarget {
                        tag: entry.key.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        for config in self.configs.values() {
            let config_outcomes = std::iter::once(config.default_outcome()).chain(config.outcomes());
            for outcome in config_outcomes {
                for target in &outcome.next_tasks {
                    if !self.configs.contains_key(target) {
                        return Err(ScriptError::UnknownNextTask {
                            task: config.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
            for entry in config.entry_points() {
                for target in &entry.targets {
                    if !config.contains_task(target) {
                        return Err(ScriptError::UnknownEntryTarget {
                            tag: format!("{}/{}", config.name, entry.key),
                            target: target.clone(),
                        });
                    }
                }
            }
            for task in config.tasks() {
                for outcome in task.outcomes() {
                    for target in &outcome.next_tasks {
                        if !config.contains_task(target) {
                            return Err(ScriptError::UnknownNextTask {
                                task: format!("{}/{}", config.name, task.name),
                                target: target.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> &BranchRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BranchRegistry {
        &mut self.registry
    }

    pub fn config(&self, name: &str) -> Option<&TaskConfig> {
        self.configs.get(name)
    }

    pub fn configs(&self) -> impl Iterator<Item = &TaskConfig> {
        self.configs.values()
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &EntryPoint> {
        self.entry_points.values()
    }

    pub fn entry_point(&self, tag: &str) -> Option<&EntryPoint> {
        self.entry_points.get(tag)
    }

    /// 会话开始时进入的任务配置
    pub fn default_config(&self) -> Option<&str> {
        self.entry_points.get(DEFAULT_TAG).and_then(EntryPoint::first_target)
    }

    pub fn info_mapping(&self) -> &InfoMapping {
        &self.info_mapping
    }

    pub fn schemas(&self) -> &[NodeSchema] {
        &self.schemas
    }

    /// 把脚本自带的 schema 写入缓存
    pub fn install_schemas(&self, cache: &SchemaCache) -> Result<usize, SchemaError> {
        for schema in &self.schemas {
            cache.insert(schema.clone())?;
        }
        Ok(self.schemas.len())
    }

    /// 复位某个配置下所有任务的期望
    pub fn refresh_config(&mut self, name: &str) {
        let Self { registry, configs, .. } = self;
        if let Some(config) = configs.get(name) {
            config.refresh(registry);
        }
    }

    /// 复位单个任务的期望
    pub fn refresh_task(&mut self, config: &str, task: &str) {
        let Self { registry, configs, .. } = self;
        if let Some(task) = configs.get(config).and_then(|c| c.task(task)) {
            task.refresh(registry);
        }
    }

    /// 复位所有任务的期望
    pub fn refresh_all(&mut self) {
        let Self { registry, configs, .. } = self;
        for config in configs.values() {
            config.refresh(registry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "name": "shop",
        "entry_points": [{"tag": "default", "targets": ["greeting"]}],
        "info_mapping": {"User@gender": {"male": "anh", "default": "bạn"}},
        "task_configs": {
            "greeting": {
                "entry_points": [
                    {"tag": "default", "targets": ["BEGIN"]},
                    {"tag": "User@ask_price", "targets": ["BEGIN"], "is_global": true}
                ],
                "expectations": {"next_tasks": ["order"]},
                "tasks": {
                    "BEGIN": {"passable": true, "expectations": {"intents": ["User@greet"], "next_tasks": ["DONE"]}},
                    "DONE": {}
                }
            },
            "order": {
                "entry_points": [{"tag": "User@ask_price", "targets": ["DONE"], "is_global": true}],
                "tasks": {
                    "DONE": {}
                }
            }
        }
    }"#;

    #[test]
    fn test_load_hoists_global_entry_points() {
        let script = Script::from_json_str(SCRIPT).unwrap();
        assert_eq!(script.default_config(), Some("greeting"));
        let hoisted = script.entry_point("User@ask_price").unwrap();
        assert_eq!(hoisted.targets, vec!["greeting", "order"]);
        assert!(hoisted.is_global);
        // 脚本级映射下发到每个任务配置
        assert!(script.config("order").unwrap().info_mapping_for("User@gender").is_some());
    }

    #[test]
    fn test_dangling_next_task_fails() {
        let broken = SCRIPT.replace(r#""next_tasks": ["DONE"]"#, r#""next_tasks": ["NOWHERE"]"#);
        assert_eq!(
            Script::from_json_str(&broken),
            Err(ScriptError::UnknownNextTask {
                task: "greeting/BEGIN".into(),
                target: "NOWHERE".into()
            })
        );
        let broken = SCRIPT.replace(r#""next_tasks": ["order"]"#, r#""next_tasks": ["checkout"]"#);
        assert!(matches!(
            Script::from_json_str(&broken),
            Err(ScriptError::UnknownNextTask { .. })
        ));
    }

    #[test]
    fn test_missing_default_and_bad_targets() {
        let no_default = SCRIPT.replace(r#"{"tag": "default", "targets": ["greeting"]}"#, "");
        assert_eq!(
            Script::from_json_str(&no_default),
            Err(ScriptError::MissingDefaultEntryPoint("shop".into()))
        );
        let bad_target = SCRIPT.replace(r#""targets": ["greeting"]"#, r#""targets": ["ghost"]"#);
        assert!(matches!(
            Script::from_json_str(&bad_target),
            Err(ScriptError::UnknownEntryTarget { .. })
        ));
        let bad_schema = SCRIPT.replace("User@greet", "greet");
        assert!(matches!(
            Script::from_json_str(&bad_schema),
            Err(ScriptError::MalformedExpectation(_))
        ));
        assert_eq!(Script::from_json_str(r#"{"name": "x"}"#), Err(ScriptError::Empty));
    }
}
