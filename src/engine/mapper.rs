//! 信息映射：把消息里的意图和实体对到当前任务的期望上
//!
//! - `map_user_info`：逐个分支校验，意图命中的期望直接完成；实体命中的值期望写入子图并向等价实例传播
//! - `map_expectation`：任务配置期望的值用户已经有了，直接完成
//! - `map_bot_expectation`：消息里出现的 `Bot@` 意图完成对应期望

use crate::dialogue::Conversation;
use crate::expectation::ExpectationId;
use crate::graph::now_millis;
use crate::intents::{is_bot_tag, with_attr, BOT_USER_MISSING_INFO, USER_HAS_MESSAGE};

/// 一次属性写入
struct AttributeWrite {
    slot: ExpectationId,
    subject: String,
    attribute: String,
    value: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InfoMapper;

impl InfoMapper {
    pub fn new() -> Self {
        Self
    }

    /// 消息有文本时映射意图与实体，然后映射配置级值期望
    pub fn map_info(&self, conversation: &mut Conversation, is_new_task: bool) {
        let has_text = conversation
            .current_turn()
            .is_some_and(|t| t.message.has_text());
        if has_text {
            self.map_user_info(conversation, is_new_task);
        }
        self.map_expectation(conversation);
    }

    /// 返回写入子图的属性个数
    pub fn map_user_info(&self, conversation: &mut Conversation, is_new_task: bool) -> usize {
        let (script, graph, Some(turn)) = conversation.split_mut() else {
            return 0;
        };
        let Some(task) = turn.current_task(script) else {
            return 0;
        };
        let branch_ids: Vec<String> = task.outcomes().map(|o| o.branch.clone()).collect();

        let mut written = 0;
        for branch_id in branch_ids {
            let registry = script.registry();
            let Some(branch) = registry.get(&branch_id) else {
                continue;
            };
            let validation = branch.validate(registry.network(), &turn.message.intent_tags(), &turn.message.entities);
            let intent_slots: Vec<ExpectationId> = branch
                .intent_slots()
                .filter(|(tag, _)| !(is_new_task && *tag == USER_HAS_MESSAGE))
                .filter(|(tag, _)| validation.matched_intents.iter().any(|m| m.as_str() == *tag))
                .map(|(_, id)| id)
                .collect();
            let writes: Vec<AttributeWrite> = validation
                .matches
                .iter()
                .filter_map(|&(slot, entity_idx)| {
                    let expectation = registry.network().get(slot)?;
                    let entity = turn.message.entities.get(entity_idx)?;
                    Some(AttributeWrite {
                        slot,
                        subject: expectation.subject().to_string(),
                        attribute: expectation.attribute()?.to_string(),
                        value: entity.parsed_value().to_string(),
                    })
                })
                .collect();

            turn.message.update_intents(validation.intents);
            let network = script.registry_mut().network_mut();
            for id in intent_slots {
                network.set_done(id, true);
            }
            for write in writes {
                let node_id = graph
                    .node_for_subject(&write.subject)
                    .unwrap_or_else(|| graph.user_id().to_string());
                let g = graph.graph_mut();
                g.mention(&node_id, now_millis());
                g.set_attr(&node_id, &write.attribute, Some(&write.value), true);
                network.mark_done(write.slot);
                let missing = with_attr(BOT_USER_MISSING_INFO, &write.attribute);
                turn.message.drop_intents(&[missing.as_str()]);
                tracing::debug!(subject = %write.subject, attribute = %write.attribute, "attribute mapped from entity");
                written += 1;
            }
        }
        written
    }

    /// 任务配置期望的值里，用户已有非空值的直接完成
    pub fn map_expectation(&self, conversation: &mut Conversation) {
        let (script, graph, Some(turn)) = conversation.split_mut() else {
            return;
        };
        let Some(user) = graph.user() else {
            return;
        };
        let Some(config) = script.config(&turn.config) else {
            return;
        };
        let network = script.registry().network();
        let satisfied: Vec<ExpectationId> = config
            .expected_values()
            .iter()
            .copied()
            .filter(|id| !network.is_done(*id))
            .filter(|id| {
                network
                    .get(*id)
                    .and_then(|e| e.attribute())
                    .is_some_and(|attr| !user.get_attr(attr).is_empty())
            })
            .collect();
        let network = script.registry_mut().network_mut();
        for id in satisfied {
            network.set_done(id, true);
        }
    }

    /// 当前 Turn 消息里的 `Bot@` 意图完成当前任务各分支里对应的期望
    pub fn map_bot_expectation(&self, conversation: &mut Conversation) {
        let (script, _, Some(turn)) = conversation.split_mut() else {
            return;
        };
        let Some(task) = turn.current_task(script) else {
            return;
        };
        let registry = script.registry();
        let slots: Vec<ExpectationId> = task
            .outcomes()
            .filter_map(|o| registry.get(&o.branch))
            .flat_map(|b| b.intent_slots())
            .filter(|(tag, _)| is_bot_tag(tag) && turn.message.has_intent(tag))
            .map(|(_, id)| id)
            .collect();
        let network = script.registry_mut().network_mut();
        for id in slots {
            network.set_done(id, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dialogue::Script;
    use crate::graph::{NodeSchema, SchemaCache};
    use crate::message::{Entity, Message};

    const SCRIPT: &str = r#"{
        "name": "shop",
        "entry_points": [{"tag": "default", "targets": ["order"]}],
        "task_configs": {
            "order": {
                "tasks": {
                    "ask_address": {
                        "passable": true,
                        "expectations": {"values": ["User@address=[ADDRESS]"], "next_tasks": ["ask_phone"]},
                        "branches": [{"intents": ["Bot@user_has_attribute_address"], "next_tasks": ["ask_phone"]}]
                    },
                    "ask_phone": {
                        "passable": true,
                        "expectations": {"intents": ["User@has_message"], "values": ["User@address=[ADDRESS]", "User@phone_number=[PHONE]"], "next_tasks": ["DONE"]}
                    },
                    "DONE": {}
                }
            }
        }
    }"#;

    fn conversation(message: Message) -> Conversation {
        let cache = SchemaCache::default();
        cache
            .insert(NodeSchema {
                class: "User".into(),
                required_attributes: vec!["address".into()],
                attributes: vec!["phone_number".into()],
                ..Default::default()
            })
            .unwrap();
        let script = Script::from_json_str(SCRIPT).unwrap();
        let mut conv = Conversation::new("u", "s", script, Arc::new(cache));
        conv.add_pending_message(message);
        conv.get_state_by_entry_point();
        conv
    }

    fn address_message() -> Message {
        Message::new("giao tới Hà Nội")
            .with_intent("Bot@user_missing_info_address")
            .with_entity(Entity::new("Hà Nội", "ADDRESS"))
    }

    #[test]
    fn test_entity_value_written_and_propagated() {
        let mut conv = conversation(address_message());
        let mapper = InfoMapper::new();
        assert_eq!(mapper.map_user_info(&mut conv, false), 1);

        let user = conv.graph().user().unwrap();
        assert_eq!(user.last_attr_value("address").as_deref(), Some("Hà Nội"));
        let turn = conv.current_turn().unwrap();
        assert!(turn.message.has_intent("User@provide_data"));
        assert!(!turn.message.has_intent("Bot@user_missing_info_address"));
        assert!(conv.current_task_done());

        // ask_phone 里的地址期望经由等价连接一起完成
        let script = conv.script();
        let task = script.config("order").unwrap().task("ask_phone").unwrap();
        assert_eq!(script.registry().branch_score(task.default_branch()), 1);
    }

    #[test]
    fn test_bot_expectation_and_config_values() {
        let mut conv = conversation(Message::new("ok").with_intent("Bot@user_has_attribute_address"));
        let user_id = conv.graph().user_id().to_string();
        conv.graph_mut()
            .graph_mut()
            .set_attr(&user_id, "phone_number", Some("0901"), true);
        let mapper = InfoMapper::new();

        mapper.map_bot_expectation(&mut conv);
        assert!(conv.current_task_done());

        mapper.map_expectation(&mut conv);
        let script = conv.script();
        let network = script.registry().network();
        let done: Vec<_> = script
            .config("order")
            .unwrap()
            .expected_values()
            .iter()
            .filter(|id| network.is_done(**id))
            .filter_map(|id| network.get(*id)?.attribute())
            .collect();
        assert_eq!(done, vec!["phone_number"]);
    }

    #[test]
    fn test_has_message_skipped_on_new_task() {
        let mut conv = conversation(Message::new("alo").with_intent("User@has_message"));
        conv.current_turn_mut().unwrap().add_task("ask_phone");
        let mapper = InfoMapper::new();
        let branch = conv
            .script()
            .config("order")
            .unwrap()
            .task("ask_phone")
            .unwrap()
            .default_branch()
            .to_string();
        mapper.map_user_info(&mut conv, true);
        assert_eq!(conv.script().registry().branch_score(&branch), 0);

        mapper.map_user_info(&mut conv, false);
        assert_eq!(conv.script().registry().branch_score(&branch), 1);
    }
}
