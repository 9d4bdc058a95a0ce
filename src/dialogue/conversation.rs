//! 会话：一个 (用户, 店铺) 的全部对话状态
//!
//! 持有脚本副本（含期望网络的状态）、会话子图、Turn 列表与待处理队列。
//! 当前 Turn 是列表的最后一个。

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ids::content_hash;
use crate::dialogue::script::Script;
use crate::dialogue::task::Task;
use crate::dialogue::turn::Turn;
use crate::graph::{now_millis, SchemaCache, SubGraph};
use crate::message::Message;

/// 新会话里店铺节点的默认名字
pub const DEFAULT_SHOP_NAME: &str = "shop";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub shop_id: String,
    script: Script,
    graph: SubGraph,
    turns: Vec<Turn>,
    #[serde(default)]
    pending_messages: VecDeque<Message>,
    #[serde(default)]
    pending_responses: Vec<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(user_id: &str, shop_id: &str, script: Script, schemas: Arc<SchemaCache>) -> Self {
        let id = content_hash([user_id, shop_id]);
        let now = now_millis();
        Self {
            graph: SubGraph::new(&id, DEFAULT_SHOP_NAME, schemas),
            id,
            user_id: user_id.to_string(),
            shop_id: shop_id.to_string(),
            script,
            turns: Vec::new(),
            pending_messages: VecDeque::new(),
            pending_responses: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 反序列化后重新挂上 schema 缓存
    pub fn attach_schemas(&mut self, schemas: Arc<SchemaCache>) {
        self.graph.attach_schemas(schemas);
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn script_mut(&mut self) -> &mut Script {
        &mut self.script
    }

    pub fn graph(&self) -> &SubGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SubGraph {
        &mut self.graph
    }

    /// 同时借出脚本、子图与当前 Turn
    pub fn split_mut(&mut self) -> (&mut Script, &mut SubGraph, Option<&mut Turn>) {
        (&mut self.script, &mut self.graph, self.turns.last_mut())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn current_turn_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_turn()?.current_task(&self.script)
    }

    pub fn current_task_name(&self) -> Option<&str> {
        self.current_turn()?.current_task_name()
    }

    /// 当前 Turn 的任务是否完成
    pub fn current_task_done(&self) -> bool {
        self.current_task()
            .is_some_and(|task| task.done(self.script.registry()))
    }

    /// 入队；与队尾内容相同的消息忽略
    pub fn add_pending_message(&mut self, message: Message) -> bool {
        if self
            .pending_messages
            .back()
            .is_some_and(|last| last.same_content(&message))
        {
            return false;
        }
        self.pending_messages.push_back(message);
        true
    }

    pub fn pending_message(&self) -> Option<&Message> {
        self.pending_messages.front()
    }

    pub fn pending_message_mut(&mut self) -> Option<&mut Message> {
        self.pending_messages.front_mut()
    }

    pub fn drop_pending_message(&mut self) -> Option<Message> {
        self.pending_messages.pop_front()
    }

    pub fn has_pending_messages(&self) -> bool {
        !self.pending_messages.is_empty()
    }

    /// 排队一条回复，在下一次生成回复时放在最前面；多条时按排队顺序
    pub fn queue_response(&mut self, response: impl Into<String>) {
        let response = response.into();
        if !response.trim().is_empty() {
            self.pending_responses.push(response);
        }
    }

    pub fn take_pending_responses(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_responses)
    }

    /// 进入某个任务配置。已有同配置的 Turn 时复用它（移到末尾并换上新消息），
    /// 否则新建。配置不存在时返回 false
    pub fn new_turn_with_message(&mut self, config: &str, message: Message) -> bool {
        if let Some(idx) = self.turns.iter().position(|t| t.config == config) {
            let mut turn = self.turns.remove(idx);
            turn.message = message;
            self.turns.push(turn);
            return true;
        }
        let Some(task_config) = self.script.config(config) else {
            tracing::warn!(conversation = %self.id, config, "unknown task config");
            return false;
        };
        let turn = Turn::new(task_config, message);
        tracing::debug!(conversation = %self.id, config, turn = %turn.id, "new turn");
        self.turns.push(turn);
        true
    }

    /// 把 Turn 移到最旧的位置
    fn move_turn_backward(&mut self, idx: usize) {
        if idx < self.turns.len() {
            let turn = self.turns.remove(idx);
            self.turns.insert(0, turn);
        }
    }

    /// 在当前 Turn 内推进一步：弹出当前任务，压入它的后继。返回后继任务名
    pub fn next_action(&mut self) -> Option<String> {
        let (script, _, turn) = self.split_mut();
        let turn = turn?;
        let current = turn.current_task_name()?.to_string();
        let next = script.config(&turn.config)?.next_task(&current, script.registry());
        turn.drop_task();
        let next = next?;
        turn.add_task(&next);
        Some(next)
    }

    /// 复位当前任务的期望
    pub fn refresh_current_task(&mut self) {
        let Some(turn) = self.turns.last() else {
            return;
        };
        if let Some(task) = turn.current_task_name() {
            self.script.refresh_task(&turn.config, task);
        }
    }

    /// 按脚本级入口选择 Turn。还没有 Turn 时进入默认配置；
    /// 否则取满足的入口里分数最高的（同分时含用户意图的入口胜出），
    /// 目标中优先当前配置，再按该配置的分支决定去向。返回是否换了 Turn
    pub fn get_state_by_entry_point(&mut self) -> bool {
        let message = self.pending_message().cloned().unwrap_or_default();
        let Some(current_config) = self.current_turn().map(|t| t.config.clone()) else {
            let Some(default) = self.script.default_config().map(str::to_string) else {
                return false;
            };
            return self.new_turn_with_message(&default, message);
        };

        let intents = message.intent_tags();
        let mut best = None;
        let mut best_score = 0;
        for entry in self.script.entry_points() {
            let Some(score) = entry.match_score(&intents) else {
                continue;
            };
            if score > best_score || (score == best_score && entry.has_user_intent()) {
                best_score = score;
                best = Some(entry);
            }
        }
        let Some(entry) = best else {
            return false;
        };
        let target = if entry.targets.contains(&current_config) {
            current_config.clone()
        } else {
            match entry.first_target() {
                Some(t) => t.to_string(),
                None => return false,
            }
        };
        let Some(target_config) = self.script.config(&target) else {
            return false;
        };
        let (next, response) = target_config.next_config_by_best_branch(self.script.registry(), &intents);
        if next == current_config {
            return false;
        }
        tracing::info!(conversation = %self.id, from = %current_config, to = %next, tag = %entry.key, "entry point switches turn");
        if !self.new_turn_with_message(&next, message) {
            return false;
        }
        if let Some(response) = response {
            self.queue_response(response);
        }
        true
    }

    /// Turn → Turn：只在当前 Turn 完成时进行。目标与当前相同则拒绝，
    /// 并把当前 Turn 移到最旧的位置。进入新 Turn 时排队目标分支的回复。
    /// 返回是否进入了新的 Turn
    pub fn next_state(&mut self) -> bool {
        let Some(current) = self.current_turn() else {
            return false;
        };
        if !current.done() {
            return false;
        }
        let current_id = current.id.clone();
        let intents = self
            .pending_message()
            .map(Message::intent_tags)
            .unwrap_or_default();
        let Some(config) = self.script.config(&current.config) else {
            return false;
        };
        let next_name = config.next_config().to_string();
        let (next, response) = match self.script.config(&next_name) {
            Some(next_config) => next_config.next_config_by_best_branch(self.script.registry(), &intents),
            None => (next_name, None),
        };
        self.new_turn_with_message(&next, Message::default());

        if self.current_turn().is_some_and(|t| t.id != current_id) {
            if let Some(response) = response {
                self.queue_response(response);
            }
            return true;
        }
        let last = self.turns.len().saturating_sub(1);
        tracing::debug!(conversation = %self.id, config = %next, "turn transition rejected");
        self.move_turn_backward(last);
        false
    }

    /// 一个目标完成：清理子图（保留用户、店铺与历史账单），清空 Turn 与待处理队列，复位期望
    pub fn reset(&mut self) {
        self.graph.start_new_goal();
        self.turns.clear();
        self.pending_messages.clear();
        self.pending_responses.clear();
        self.script.refresh_all();
        tracing::info!(conversation = %self.id, "conversation reset");
    }

    /// 在 `reset` 之外再清掉用户的所有属性
    pub fn hard_reset(&mut self) {
        if let Some(user) = self.graph.user_mut() {
            user.drop_all_attributes();
        }
        self.reset();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}
