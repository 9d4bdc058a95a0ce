//! 从子图状态推导 `Bot@` 意图
//!
//! 全局意图在消息进入队列后、选 Turn 之前加到待处理消息上；
//! 状态相关意图在当前 Turn 的前置动作里加到 Turn 的消息上。

use std::collections::BTreeSet;

use crate::dialogue::Conversation;
use crate::graph::{BillStatus, PreviousNodeQuery, SubGraph};
use crate::intents::*;
use crate::message::Message;

/// 用户 schema 中每个属性的状态：有值 → `has_attribute` + `multi_value` / `has_one`，无值 → `missing_info`
pub fn user_attribute_status(graph: &SubGraph) -> Vec<String> {
    let Some(user) = graph.user() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for attr in user.schema().all_attributes() {
        match user.get_attr(&attr).len() {
            0 => out.push(with_attr(BOT_USER_MISSING_INFO, &attr)),
            1 => {
                out.push(with_attr(BOT_USER_HAS_ATTRIBUTE, &attr));
                out.push(with_attr(BOT_USER_HAS_ONE, &attr));
            }
            _ => {
                out.push(with_attr(BOT_USER_HAS_ATTRIBUTE, &attr));
                out.push(with_attr(BOT_USER_MULTI_VALUE, &attr));
            }
        }
    }
    out
}

/// `Bot@` 意图提取器
#[derive(Debug, Clone)]
pub struct BotIntents {
    /// 多久以内提及过的对象算作“用户提到了对象”
    pub mention_window_ms: i64,
}

impl Default for BotIntents {
    fn default() -> Self {
        Self {
            mention_window_ms: 5 * 60 * 1000,
        }
    }
}

impl BotIntents {
    pub fn new(mention_window_ms: i64) -> Self {
        Self { mention_window_ms }
    }

    /// 与当前任务无关的意图
    pub fn global(&self, graph: &SubGraph, message: Option<&Message>, now: i64) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.extend(object_intents(graph));
        out.extend(user_attribute_status(graph));
        out.extend(user_missing_info(graph));
        out.extend(bill_missing_info(graph));
        out.extend(self.mentioned_objects(graph, now));
        out.extend(billing_intents(graph));
        out.extend(confirmed_bills(graph));
        out.extend(old_bills(graph));
        if let Some(message) = message {
            out.extend(mentioned_entities(message));
        }
        out
    }

    /// 依赖当前任务配置的意图
    pub fn state_based(&self, conversation: &Conversation) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.extend(multi_value_expectations(conversation));
        if let Some(turn) = conversation.current_turn() {
            out.extend(wrong_phone(&turn.message));
        }
        out
    }

    /// 全局意图写入待处理消息
    pub fn extract_global(&self, conversation: &mut Conversation) {
        let intents = self.global(
            conversation.graph(),
            conversation.pending_message(),
            crate::graph::now_millis(),
        );
        if let Some(message) = conversation.pending_message_mut() {
            message.update_intents(intents);
        }
    }

    /// 状态相关意图写入当前 Turn 的消息
    pub fn extract_state_based(&self, conversation: &mut Conversation) {
        let intents = self.state_based(conversation);
        if let Some(turn) = conversation.current_turn_mut() {
            turn.message.update_intents(intents);
        }
    }

    fn mentioned_objects(&self, graph: &SubGraph, now: i64) -> Vec<String> {
        let query = PreviousNodeQuery::latest()
            .of_class("Product")
            .since(now - self.mention_window_ms);
        if graph.graph().get_previous_node(&query).is_empty() {
            Vec::new()
        } else {
            vec![USER_MENTION_OBJECT.to_string()]
        }
    }
}

/// 最近提及的对象是一个、多个还是没有
fn object_intents(graph: &SubGraph) -> Vec<String> {
    let latest = graph
        .graph()
        .get_previous_node(&PreviousNodeQuery::latest().of_class("Product"));
    let tag = match latest.len() {
        0 => BOT_OBJECT_NOT_FOUND,
        1 => BOT_SINGLE_OBJECT,
        _ => BOT_MULTI_OBJECTS,
    };
    vec![tag.to_string()]
}

fn user_missing_info(graph: &SubGraph) -> Vec<String> {
    graph
        .user()
        .map(|u| u.missing_required_attributes())
        .unwrap_or_default()
        .iter()
        .map(|attr| with_attr(BOT_USER_MISSING_INFO, attr))
        .collect()
}

fn bill_missing_info(graph: &SubGraph) -> Vec<String> {
    graph
        .bill()
        .map(|b| b.missing_required_attributes())
        .unwrap_or_default()
        .iter()
        .map(|attr| with_attr(BOT_BILL_MISSING_INFO, attr))
        .collect()
}

fn billing_intents(graph: &SubGraph) -> Vec<String> {
    match graph.bill().and_then(|b| b.bill_status()) {
        Some(BillStatus::Confirmed) => vec![BOT_BILL_CONFIRMED.to_string()],
        Some(BillStatus::Processing) => vec![BOT_BILL_PROCESSING.to_string()],
        _ => Vec::new(),
    }
}

fn confirmed_bills(graph: &SubGraph) -> Vec<String> {
    let tag = match graph.confirmed_bills().len() {
        0 => BOT_NONE_CONFIRMED_BILL,
        1 => BOT_SINGLE_CONFIRMED_BILL,
        _ => BOT_MULTIPLE_CONFIRMED_BILLS,
    };
    vec![tag.to_string()]
}

fn old_bills(graph: &SubGraph) -> Vec<String> {
    let tag = if graph.old_bills().is_empty() {
        BOT_NONE_OLD_BILL
    } else {
        BOT_MULTIPLE_OLD_BILLS
    };
    vec![tag.to_string()]
}

/// 消息里带解析值的时间 / 金额实体
fn mentioned_entities(message: &Message) -> Vec<String> {
    let mut out = Vec::new();
    for entity in message.entities.iter().filter(|e| e.value.is_some()) {
        let labels = entity.label_set();
        if labels.iter().any(|l| matches!(*l, "DATE" | "TIME" | "Time")) {
            out.push(BOT_USER_MENTIONED_TIME.to_string());
        } else if labels.contains(&"MONEY") {
            out.push(BOT_USER_MENTIONED_MONEY.to_string());
        }
    }
    out
}

/// 当前任务配置期望的值里，用户已经给出多个值的属性
fn multi_value_expectations(conversation: &Conversation) -> Vec<String> {
    let (Some(turn), Some(user)) = (conversation.current_turn(), conversation.graph().user()) else {
        return Vec::new();
    };
    let Some(config) = turn.task_config(conversation.script()) else {
        return Vec::new();
    };
    let network = conversation.script().registry().network();
    config
        .expected_values()
        .iter()
        .filter_map(|id| network.get(*id)?.attribute())
        .filter(|attr| user.get_attr(attr).len() > 1)
        .map(|attr| with_attr(BOT_USER_MULTI_VALUE, attr))
        .collect()
}

fn wrong_phone(message: &Message) -> Vec<String> {
    if message.entities.iter().any(|e| e.label == "wrong_phone") {
        vec![BOT_USER_WRONG_PHONE.to_string()]
    } else {
        Vec::new()
    }
}
