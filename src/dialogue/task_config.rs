//! 任务配置：一组任务 + 任务级入口 + 信息映射，对应一个 Turn

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::error::ScriptError;
use crate::dialogue::definition::{EntryPointDef, InfoMapping, TaskConfigDef};
use crate::dialogue::task::{Outcome, Task};
use crate::expectation::{BranchRegistry, EntryPoint, ExpectationId};
use crate::intents::{subject_of, DEFAULT_TAG};

/// 按声明顺序建立入口；同名入口后者覆盖前者，目标去重
pub(crate) fn build_entry_points(defs: &[EntryPointDef]) -> IndexMap<String, EntryPoint> {
    let mut out = IndexMap::new();
    for def in defs {
        let mut targets: Vec<String> = Vec::with_capacity(def.targets.len());
        for target in &def.targets {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        let entry = EntryPoint::new(def.tag.clone(), targets, def.responses.clone(), def.is_global);
        out.insert(def.tag.clone(), entry);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    tasks: IndexMap<String, Task>,
    entry_points: IndexMap<String, EntryPoint>,
    #[serde(default)]
    info_mapping: InfoMapping,
    default_outcome: Outcome,
    #[serde(default)]
    outcomes: Vec<Outcome>,
    /// 各任务分支里非必填的值期望
    #[serde(default)]
    expected_values: Vec<ExpectationId>,
}

impl TaskConfig {
    pub fn from_def(name: &str, def: &TaskConfigDef, registry: &mut BranchRegistry) -> Result<Self, ScriptError> {
        let mut tasks = IndexMap::new();
        for (task_name, task_def) in &def.tasks {
            tasks.insert(task_name.clone(), Task::from_def(task_name, task_def, registry)?);
        }
        let default_outcome = Outcome::declare(registry, &def.expectations)?;
        let outcomes = def
            .branches
            .iter()
            .map(|b| Outcome::declare(registry, b))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = Self {
            name: name.to_string(),
            tasks,
            entry_points: build_entry_points(&def.entry_points),
            info_mapping: def.info_mapping.clone(),
            default_outcome,
            outcomes,
            expected_values: Vec::new(),
        };
        config.link_expectations(registry);
        Ok(config)
    }

    /// 同一任务内同标签的意图相连；同一配置内逻辑相同的值期望相连
    fn link_expectations(&mut self, registry: &mut BranchRegistry) {
        let mut values = Vec::new();
        for task in self.tasks.values() {
            let mut intents = Vec::new();
            for outcome in task.outcomes() {
                if let Some(branch) = registry.get(&outcome.branch) {
                    intents.extend(branch.intent_slots().map(|(_, id)| id));
                    values.extend(branch.value_slots());
                }
            }
            registry.network_mut().link_equivalents(intents);
        }
        values.sort_unstable();
        values.dedup();
        values.retain(|id| !registry.network().is_required(*id));
        registry.network_mut().link_equivalents(values.iter().copied());
        self.expected_values = values;
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn contains_task(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn first_task(&self) -> Option<&str> {
        self.tasks.keys().next().map(String::as_str)
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &EntryPoint> {
        self.entry_points.values()
    }

    pub fn default_entry_point(&self) -> Option<&EntryPoint> {
        self.entry_points.get(DEFAULT_TAG)
    }

    /// Turn 开始时压栈的任务：默认入口的第一个目标，没有默认入口时取第一个任务
    pub fn initial_task(&self) -> Option<&str> {
        self.default_entry_point()
            .and_then(EntryPoint::first_target)
            .or_else(|| self.first_task())
    }

    pub fn default_outcome(&self) -> &Outcome {
        &self.default_outcome
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn expected_values(&self) -> &[ExpectationId] {
        &self.expected_values
    }

    /// 从任务的候选后继里取第一个未完成的；都完成了就取第一个
    pub fn next_task(&self, task: &str, registry: &BranchRegistry) -> Option<String> {
        let candidates = self.tasks.get(task)?.next_candidates(registry)?;
        candidates
            .iter()
            .find(|name| self.tasks.get(name.as_str()).is_some_and(|t| !t.done(registry)))
            .or_else(|| candidates.first())
            .cloned()
    }

    /// 本配置完成后默认去往的配置；没有声明时留在自身
    pub fn next_config(&self) -> &str {
        self.default_outcome
            .next_tasks
            .first()
            .map_or(self.name.as_str(), String::as_str)
    }

    /// 按意图在配置级分支中选出分数最高的（同分取先声明的），
    /// 返回其第一个后继配置与随机回复；没有满足的分支时返回自身
    pub fn next_config_by_best_branch(&self, registry: &BranchRegistry, intents: &[String]) -> (String, Option<String>) {
        let mut best: Option<(&Outcome, usize)> = None;
        for outcome in &self.outcomes {
            let Some(score) = registry.get(&outcome.branch).and_then(|b| b.match_score(intents)) else {
                continue;
            };
            if best.map_or(true, |(_, s)| s < score) {
                best = Some((outcome, score));
            }
        }
        match best.and_then(|(o, _)| o.next_tasks.first().map(|n| (n, o))) {
            Some((next, outcome)) => (next.clone(), outcome.response()),
            None => (self.name.clone(), None),
        }
    }

    pub fn refresh(&self, registry: &mut BranchRegistry) {
        for task in self.tasks.values() {
            task.refresh(registry);
        }
    }

    pub fn info_mapping(&self) -> &InfoMapping {
        &self.info_mapping
    }

    /// 合入脚本级映射，已有的键保持不变
    pub(crate) fn merge_info_mapping(&mut self, mapping: &InfoMapping) {
        for (key, value) in mapping {
            if !self.info_mapping.contains_key(key) {
                self.info_mapping.insert(key.clone(), value.clone());
            }
        }
    }

    /// 查找映射：先精确匹配，再找同主语的 `Subject@*`。返回映射表与命中的键
    pub fn info_mapping_for(&self, key: &str) -> Option<(&IndexMap<String, String>, &str)> {
        if let Some((k, v)) = self.info_mapping.get_key_value(key) {
            return Some((v, k.as_str()));
        }
        let subject = subject_of(key);
        self.info_mapping
            .iter()
            .find(|(k, _)| k.split_once('@').is_some_and(|(s, attr)| s == subject && attr == "*"))
            .map(|(k, v)| (v, k.as_str()))
    }
}
