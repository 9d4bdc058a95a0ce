//! 任务：机器人的一个动作（提问、确认、回答）
//!
//! 任务持有一组分支。分支本身（期望组）在脚本内按内容共享，
//! 但每个任务对同一分支可以声明不同的回复、下一个任务与后置 hook，
//! 这部分放在任务自己的 `Outcome` 里。

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::core::error::ScriptError;
use crate::dialogue::definition::{BranchDef, TaskDef};
use crate::expectation::{BranchId, BranchRegistry};
use crate::intents::{BEGIN_TASK, DONE_TASK};

/// 随机取一条模板
pub(crate) fn choose_one(items: &[String]) -> Option<String> {
    items.choose(&mut rand::thread_rng()).cloned()
}

/// 分支在某个任务里的结果：命中该分支后说什么、去哪里
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub branch: BranchId,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub next_tasks: Vec<String>,
    #[serde(default)]
    pub post_hooks: Vec<String>,
}

impl Outcome {
    pub(crate) fn declare(registry: &mut BranchRegistry, def: &BranchDef) -> Result<Self, ScriptError> {
        let branch = registry.intern(def.declarations()?);
        Ok(Self {
            branch,
            responses: def.responses.clone(),
            next_tasks: def.next_tasks.clone(),
            post_hooks: def.post_hooks.clone(),
        })
    }

    pub fn response(&self) -> Option<String> {
        choose_one(&self.responses)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub requests: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub passable: bool,
    default_branch: BranchId,
    /// 备选分支按声明顺序，默认分支在最后（若与某个备选分支相同则沿用其位置）
    outcomes: IndexMap<BranchId, Outcome>,
    #[serde(default)]
    pub pre_hooks: Vec<String>,
    #[serde(default)]
    pub post_hooks: Vec<String>,
}

impl Task {
    pub fn from_def(name: &str, def: &TaskDef, registry: &mut BranchRegistry) -> Result<Self, ScriptError> {
        let mut outcomes = IndexMap::new();
        for branch in &def.branches {
            let outcome = Outcome::declare(registry, branch)?;
            outcomes.insert(outcome.branch.clone(), outcome);
        }
        let default = Outcome::declare(registry, &def.expectations)?;
        let default_branch = default.branch.clone();
        outcomes.insert(default_branch.clone(), default);

        Ok(Self {
            name: name.to_string(),
            requests: def.requests.clone(),
            required: def.required,
            passable: def.passable,
            default_branch,
            outcomes,
            pre_hooks: def.pre_hooks.clone(),
            post_hooks: def.post_hooks.clone(),
        })
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.values()
    }

    pub fn default_outcome(&self) -> Option<&Outcome> {
        self.outcomes.get(&self.default_branch)
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn is_done_task(&self) -> bool {
        self.name == DONE_TASK
    }

    pub fn is_begin_task(&self) -> bool {
        self.name == BEGIN_TASK
    }

    /// 必填任务看默认分支；可跳过任务任一分支完成即可；其余任务不会自行完成
    pub fn done(&self, registry: &BranchRegistry) -> bool {
        if self.required {
            registry.branch_done(&self.default_branch)
        } else if self.passable {
            self.outcomes.keys().any(|id| registry.branch_done(id))
        } else {
            false
        }
    }

    /// 已完成且分数最高的分支；同分时后声明的胜出
    pub fn current_outcome(&self, registry: &BranchRegistry) -> Option<&Outcome> {
        let mut best = None;
        let mut best_score = 0;
        for outcome in self.outcomes.values() {
            if !registry.branch_done(&outcome.branch) {
                continue;
            }
            let score = registry.branch_score(&outcome.branch);
            if score >= best_score {
                best = Some(outcome);
                best_score = score;
            }
        }
        best
    }

    /// 下一个任务的候选：默认分支完成时取其声明，否则取当前分支的
    pub fn next_candidates(&self, registry: &BranchRegistry) -> Option<&[String]> {
        if registry.branch_done(&self.default_branch) {
            return self.default_outcome().map(|o| o.next_tasks.as_slice());
        }
        self.current_outcome(registry).map(|o| o.next_tasks.as_slice())
    }

    pub fn has_next_task(&self) -> bool {
        self.outcomes.values().any(|o| !o.next_tasks.is_empty())
    }

    /// 默认分支只等待“用户发了消息”
    pub fn only_has_message_expectation(&self, registry: &BranchRegistry) -> bool {
        registry
            .get(&self.default_branch)
            .is_some_and(|b| b.only_has_message())
    }

    /// 除纯消息分支外，是否已有分支完成
    pub fn has_substantive_progress(&self, registry: &BranchRegistry) -> bool {
        self.outcomes.keys().any(|id| {
            registry.branch_done(id) && !registry.get(id).is_some_and(|b| b.only_has_message())
        })
    }

    pub fn refresh(&self, registry: &mut BranchRegistry) {
        for id in self.outcomes.keys() {
            registry.refresh_branch(id);
        }
    }

    pub fn request(&self) -> Option<String> {
        choose_one(&self.requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(intents: &[&str], next: &[&str], responses: &[&str]) -> BranchDef {
        BranchDef {
            intents: intents.iter().map(|s| s.to_string()).collect(),
            next_tasks: next.iter().map(|s| s.to_string()).collect(),
            responses: responses.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn mark(registry: &mut BranchRegistry, task: &Task, tags: &[&str]) {
        let ids: Vec<_> = task
            .outcomes()
            .filter_map(|o| registry.get(&o.branch))
            .flat_map(|b| {
                b.intent_slots()
                    .filter(|(tag, _)| tags.contains(tag))
                    .map(|(_, id)| id)
                    .collect::<Vec<_>>()
            })
            .collect();
        for id in ids {
            registry.network_mut().set_done(id, true);
        }
    }

    #[test]
    fn test_last_declared_branch_wins_tie() {
        let mut registry = BranchRegistry::new();
        let def = TaskDef {
            passable: true,
            branches: vec![
                branch(&["User@yes"], &["first"], &["A"]),
                branch(&["User@ok"], &["second"], &["B"]),
            ],
            expectations: branch(&["User@provide_data", "User@confirm"], &["third"], &[]),
            ..Default::default()
        };
        let task = Task::from_def("ask", &def, &mut registry).unwrap();
        mark(&mut registry, &task, &["User@yes", "User@ok"]);
        assert!(task.done(&registry));
        let current = task.current_outcome(&registry).unwrap();
        assert_eq!(current.next_tasks, vec!["second"]);
        assert_eq!(task.next_candidates(&registry), Some(&["second".to_string()][..]));
    }

    #[test]
    fn test_required_task_waits_for_default_branch() {
        let mut registry = BranchRegistry::new();
        let def = TaskDef {
            required: true,
            branches: vec![branch(&["User@skip"], &["other"], &[])],
            expectations: branch(&["User@confirm"], &["next"], &[]),
            ..Default::default()
        };
        let task = Task::from_def("confirm", &def, &mut registry).unwrap();
        mark(&mut registry, &task, &["User@skip"]);
        assert!(!task.done(&registry));
        mark(&mut registry, &task, &["User@confirm"]);
        assert!(task.done(&registry));
        assert_eq!(task.next_candidates(&registry), Some(&["next".to_string()][..]));

        task.refresh(&mut registry);
        assert!(!task.done(&registry));
    }

    #[test]
    fn test_duplicate_default_keeps_position_but_takes_outcome() {
        let mut registry = BranchRegistry::new();
        let def = TaskDef {
            branches: vec![
                branch(&["User@has_message"], &["old"], &[]),
                branch(&["User@ask"], &["answer"], &[]),
            ],
            expectations: branch(&["User@has_message"], &["new"], &[]),
            ..Default::default()
        };
        let task = Task::from_def("BEGIN", &def, &mut registry).unwrap();
        let order: Vec<_> = task.outcomes().map(|o| o.next_tasks[0].as_str()).collect();
        assert_eq!(order, vec!["new", "answer"]);
        assert!(task.only_has_message_expectation(&registry));
        assert!(task.is_begin_task());
        // 非必填、不可跳过的任务不会自行完成
        mark(&mut registry, &task, &["User@has_message"]);
        assert!(!task.done(&registry));
        assert!(!task.has_substantive_progress(&registry));
    }
}
