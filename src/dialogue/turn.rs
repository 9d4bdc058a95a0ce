//! Turn：一个任务配置的一次执行，持有任务栈与触发它的消息

use serde::{Deserialize, Serialize};

use crate::dialogue::script::Script;
use crate::dialogue::task::Task;
use crate::dialogue::task_config::TaskConfig;
use crate::graph::{now_millis, NodeId};
use crate::intents::{is_user_tag, DONE_TASK, USER_HAS_MESSAGE};
use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    /// 任务配置名
    pub config: String,
    pub message: Message,
    #[serde(default)]
    pub response: Option<String>,
    /// 任务栈，栈顶为当前任务
    task_stack: Vec<String>,
    /// 多个候选对象时记下来，等待用户选择
    #[serde(default)]
    pub multiple_choices: Vec<NodeId>,
    #[serde(default)]
    pub created_at: i64,
}

/// 意图排序：用户意图在前，`User@has_message` 最后
fn ordered_intents(mut intents: Vec<String>) -> Vec<String> {
    intents.sort_by_key(|tag| (tag == USER_HAS_MESSAGE, !is_user_tag(tag)));
    intents
}

impl Turn {
    pub fn new(config: &TaskConfig, message: Message) -> Self {
        let mut turn = Self {
            id: uuid::Uuid::new_v4().to_string(),
            config: config.name.clone(),
            message,
            response: None,
            task_stack: Vec::new(),
            multiple_choices: Vec::new(),
            created_at: now_millis(),
        };
        turn.load_default_tasks(config);
        turn
    }

    fn load_default_tasks(&mut self, config: &TaskConfig) {
        if let Some(task) = config.initial_task() {
            self.task_stack.push(task.to_string());
        }
    }

    pub fn task_stack(&self) -> &[String] {
        &self.task_stack
    }

    pub fn current_task_name(&self) -> Option<&str> {
        self.task_stack.last().map(String::as_str)
    }

    pub fn task_config<'s>(&self, script: &'s Script) -> Option<&'s TaskConfig> {
        script.config(&self.config)
    }

    pub fn current_task<'s>(&self, script: &'s Script) -> Option<&'s Task> {
        let name = self.current_task_name()?;
        self.task_config(script)?.task(name)
    }

    /// 当前任务是 `DONE` 时整个 Turn 完成
    pub fn done(&self) -> bool {
        self.current_task_name() == Some(DONE_TASK)
    }

    /// 压栈；与栈顶同名时忽略
    pub fn add_task(&mut self, name: &str) -> bool {
        if self.current_task_name() == Some(name) {
            return false;
        }
        self.task_stack.push(name.to_string());
        true
    }

    /// 出栈；栈里只剩一个任务或栈顶已是 `DONE` 时保留
    pub fn drop_task(&mut self) -> bool {
        if self.task_stack.len() > 1 && !self.done() {
            self.task_stack.pop();
            return true;
        }
        false
    }

    /// 复位本配置所有任务的期望
    pub fn refresh(&self, script: &mut Script) {
        script.refresh_config(&self.config);
    }

    /// 当前任务完成后应进入的任务
    pub fn next_task(&self, script: &Script) -> Option<String> {
        let config = self.task_config(script)?;
        config.next_task(self.current_task_name()?, script.registry())
    }

    /// 入口重评估：当前任务还没有实质进展时，按消息意图选择本配置里得分最高的入口，
    /// 目标任务与当前不同则切换。返回是否切换了任务
    pub fn select_task_by_entry_point(&mut self, script: &mut Script) -> bool {
        let Some(config) = script.config(&self.config) else {
            return false;
        };
        let registry = script.registry();
        let current = self.current_task_name().and_then(|name| config.task(name));
        if let Some(task) = current {
            if !task.is_done_task() && !task.is_begin_task() && task.has_substantive_progress(registry) {
                return false;
            }
        }

        let intents = ordered_intents(self.message.intent_tags());
        // 同分时取标签在排序后意图列表里出现得更早的入口
        let rank = |tags: &[String]| {
            tags.iter()
                .filter_map(|t| intents.iter().position(|i| i == t))
                .min()
                .unwrap_or(usize::MAX)
        };
        let mut best: Option<(&str, usize, usize)> = None;
        for entry in config.entry_points() {
            let Some(score) = entry.match_score(&intents) else {
                continue;
            };
            let Some(target) = entry.first_target() else {
                continue;
            };
            let entry_rank = rank(entry.tags());
            let better = match best {
                None => true,
                Some((_, best_score, best_rank)) => {
                    score > best_score || (score == best_score && entry_rank < best_rank)
                }
            };
            if better {
                best = Some((target, score, entry_rank));
            }
        }
        let Some((target, _, _)) = best else {
            return false;
        };
        let target = target.to_string();
        let drop_current = current.is_some_and(|t| t.only_has_message_expectation(registry));

        if drop_current {
            self.drop_task();
        }
        if self.current_task_name() == Some(target.as_str()) {
            return false;
        }
        tracing::debug!(turn = %self.id, config = %self.config, task = %target, "entry point switches task");
        self.refresh(script);
        self.task_stack.push(target);
        true
    }
}
