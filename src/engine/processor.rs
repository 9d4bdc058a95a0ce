//! Turn 处理器：在当前 Turn 内完成一次“理解 → 推进 → 回复”
//!
//! 1. 前置动作：信息映射、状态相关 `Bot@` 意图、任务前置 hook
//! 2. 按任务级入口重选任务
//! 3. 取当前分支的回复，然后在当前任务完成时逐步推进（有上限）
//! 4. 拼接回复、渲染模板、整理标点

use crate::dialogue::Conversation;

use super::bot_intents::BotIntents;
use super::hooks::{HookContext, HookRegistry};
use super::mapper::InfoMapper;
use super::render::TemplateRenderer;

/// 拼接各段回复时使用的内部分隔符
const JOIN_MARK: &str = "*";

/// 整理回复：去掉 `None`、压缩空白和空段、句首大写
pub fn post_process(message: &str, delimiter: &str) -> String {
    let delimiter = if delimiter.is_empty() { JOIN_MARK } else { delimiter };
    let mut text = message.replace("None", " ");
    while text.contains("  ") || text.contains("* *") {
        text = text.replace("  ", " ").replace("* *", "*");
    }
    let text = text.trim();
    let text = text.strip_prefix('*').unwrap_or(text);
    let text = text.strip_suffix('*').unwrap_or(text);
    let text = text.replace('*', delimiter);
    text.split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(capitalise)
        .collect::<Vec<_>>()
        .join(delimiter)
}

/// 含 `image` 的句子（图片链接）原样保留
fn capitalise(sentence: &str) -> String {
    if sentence.contains("image") {
        return sentence.to_string();
    }
    let mut chars = sentence.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>().replace('_', " "),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// 输出回复的句子分隔符
    pub delimiter: String,
    /// 一次处理里任务推进的最大步数
    pub max_advance_steps: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            delimiter: JOIN_MARK.to_string(),
            max_advance_steps: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurnProcessor {
    pub hooks: HookRegistry,
    pub bot_intents: BotIntents,
    pub mapper: InfoMapper,
    pub renderer: TemplateRenderer,
    pub settings: ProcessorSettings,
}

enum TaskHooks {
    Pre,
    Post,
}

impl TurnProcessor {
    pub fn new(hooks: HookRegistry, renderer: TemplateRenderer, settings: ProcessorSettings) -> Self {
        Self {
            hooks,
            bot_intents: BotIntents::default(),
            mapper: InfoMapper::new(),
            renderer,
            settings,
        }
    }

    pub fn with_bot_intents(mut self, bot_intents: BotIntents) -> Self {
        self.bot_intents = bot_intents;
        self
    }

    fn run_hooks(&self, conversation: &mut Conversation, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let (_, graph, Some(turn)) = conversation.split_mut() else {
            return;
        };
        let task = turn.current_task_name().unwrap_or_default().to_string();
        let mut ctx = HookContext {
            graph,
            message: &mut turn.message,
            config: &turn.config,
            task: &task,
        };
        self.hooks.run(tags, &mut ctx);
    }

    fn run_task_hooks(&self, conversation: &mut Conversation, which: TaskHooks) {
        let tags = conversation
            .current_task()
            .map(|task| match which {
                TaskHooks::Pre => task.pre_hooks.clone(),
                TaskHooks::Post => task.post_hooks.clone(),
            })
            .unwrap_or_default();
        self.run_hooks(conversation, &tags);
    }

    /// 当前任务命中分支上声明的后置 hook
    fn run_branch_hooks(&self, conversation: &mut Conversation) {
        let tags = conversation
            .current_task()
            .and_then(|task| task.current_outcome(conversation.script().registry()))
            .map(|outcome| outcome.post_hooks.clone())
            .unwrap_or_default();
        self.run_hooks(conversation, &tags);
    }

    fn default_pre_actions(&self, conversation: &mut Conversation, is_new_task: bool, mapping_only: bool) {
        if mapping_only {
            self.mapper.map_info(conversation, false);
        } else {
            self.mapper.map_info(conversation, is_new_task);
            self.bot_intents.extract_state_based(conversation);
        }
    }

    fn pre_actions(&self, conversation: &mut Conversation, is_new_task: bool, mapping_only: bool) {
        self.default_pre_actions(conversation, is_new_task, mapping_only);
        self.run_task_hooks(conversation, TaskHooks::Pre);
    }

    fn current_response(&self, conversation: &Conversation) -> Option<String> {
        let task = conversation.current_task()?;
        task.current_outcome(conversation.script().registry())?.response()
    }

    fn current_request(&self, conversation: &Conversation) -> Option<String> {
        conversation.current_task()?.request()
    }

    /// 当前任务完成且 Turn 未完成时推进，最多 `max_advance_steps` 步。
    /// 返回途中进入的任务各自的分支回复
    fn advance(&self, conversation: &mut Conversation) -> Vec<String> {
        let initial = conversation.current_task_name().map(str::to_string);
        let mut entered: Vec<String> = Vec::new();
        for _ in 0..self.settings.max_advance_steps {
            let turn_done = conversation.current_turn().map_or(true, |t| t.done());
            if turn_done || !conversation.current_task_done() {
                break;
            }
            self.run_branch_hooks(conversation);
            let next = conversation.next_action();

            let current = conversation.current_task_name().map(str::to_string);
            if current != initial {
                entered.extend(current);
            }
            if next.is_none() {
                break;
            }
            tracing::debug!(task = ?conversation.current_task_name(), "advanced to next task");
            conversation.refresh_current_task();
            if let Some(turn) = conversation.current_turn_mut() {
                turn.message.drop_user_intents();
            }
            self.pre_actions(conversation, false, true);
            self.mapper.map_bot_expectation(conversation);
            self.run_task_hooks(conversation, TaskHooks::Post);
        }

        let (Some(turn), script) = (conversation.current_turn(), conversation.script()) else {
            return Vec::new();
        };
        let Some(config) = turn.task_config(script) else {
            return Vec::new();
        };
        entered
            .iter()
            .filter_map(|name| config.task(name)?.current_outcome(script.registry())?.response())
            .collect()
    }

    fn finish(&self, conversation: &mut Conversation, parts: Vec<String>) -> String {
        let joined = parts.join(&format!(" {JOIN_MARK} "));
        let rendered = {
            let config = conversation
                .current_turn()
                .and_then(|t| t.task_config(conversation.script()));
            self.renderer.render(&joined, conversation.graph(), config)
        };
        let response = post_process(&rendered, &self.settings.delimiter);
        if let Some(turn) = conversation.current_turn_mut() {
            turn.response = Some(response.clone());
        }
        response
    }

    /// 处理当前 Turn 的消息并生成回复
    pub fn process(&self, conversation: &mut Conversation) -> String {
        self.pre_actions(conversation, false, false);
        self.mapper.map_bot_expectation(conversation);

        let switched = match conversation.split_mut() {
            (script, _, Some(turn)) => turn.select_task_by_entry_point(script),
            _ => false,
        };
        if switched {
            self.pre_actions(conversation, true, false);
            self.mapper.map_bot_expectation(conversation);
        }

        let mut parts = conversation.take_pending_responses();
        parts.extend(self.current_response(conversation));
        parts.extend(self.advance(conversation));
        parts.extend(self.current_request(conversation));
        let response = self.finish(conversation, parts);

        self.run_task_hooks(conversation, TaskHooks::Post);
        response
    }

    /// Turn 刚被切换进来、没有新消息时：只做信息映射，再推进并生成回复。
    /// 转移时排队的分支回复放在最前面
    pub fn pass_response(&self, conversation: &mut Conversation) -> String {
        self.default_pre_actions(conversation, false, true);

        let mut parts = conversation.take_pending_responses();
        parts.extend(self.current_response(conversation));
        parts.extend(self.advance(conversation));
        parts.extend(self.current_request(conversation));
        self.finish(conversation, parts)
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
                "entry_points": [
                    {"tag": "default", "targets": ["BEGIN"]},
                    {"tag": "User@order", "targets": ["ask_address"]}
                ],
                "tasks": {
                    "BEGIN": {
                        "requests": ["Shop có thể giúp gì ạ?"],
                        "expectations": {"intents": ["User@has_message"], "next_tasks": ["ask_address"]}
                    },
                    "ask_address": {
                        "passable": true,
                        "requests": ["Cho shop xin địa chỉ ạ"],
                        "expectations": {
                            "values": ["User@address=[ADDRESS]"],
                            "next_tasks": ["ask_phone"],
                            "responses": ["Shop giao tới {User@address} nhé"],
                            "post_hooks": ["Bot@update_bill_address"]
                        }
                    },
                    "ask_phone": {
                        "passable": true,
                        "requests": ["Cho shop xin số điện thoại ạ"],
                        "expectations": {"values": ["User@phone_number=[PHONE]"], "next_tasks": ["DONE"], "responses": ["cảm ơn ạ"]}
                    },
                    "DONE": {"requests": ["Đơn của {User@name} đã xong"]}
                }
            }
        }
    }"#;

    fn conversation(message: Message) -> Conversation {
        let cache = SchemaCache::default();
        cache
            .insert(NodeSchema {
                class: "User".into(),
                attributes: vec!["address".into(), "phone_number".into()],
                ..Default::default()
            })
            .unwrap();
        let script = Script::from_json_str(SCRIPT).unwrap();
        let mut conv = Conversation::new("u", "s", script, Arc::new(cache));
        conv.add_pending_message(message);
        conv.get_state_by_entry_point();
        conv.drop_pending_message();
        conv
    }

    #[test]
    fn test_post_process() {
        assert_eq!(post_process(" * hello  world * None * * thank_you *", "*"), "Hello world*Thank you");
        assert_eq!(post_process("see image_1.png * ok", " | "), "see image_1.png | Ok");
        assert_eq!(post_process("* * *", "*"), "");
    }

    #[test]
    fn test_entry_point_then_request() {
        let processor = TurnProcessor::default();
        let mut conv = conversation(Message::new("muốn đặt hàng").with_intent("User@order"));
        let response = processor.process(&mut conv);
        assert_eq!(conv.current_task_name(), Some("ask_address"));
        assert_eq!(response, "Cho shop xin địa chỉ ạ");
        assert_eq!(conv.current_turn().unwrap().response.as_deref(), Some(response.as_str()));
    }

    #[test]
    fn test_queued_responses_lead_in_queue_order() {
        let processor = TurnProcessor::default();
        let mut conv = conversation(Message::new("muốn đặt hàng").with_intent("User@order"));
        conv.queue_response("một");
        conv.queue_response("hai");
        let response = processor.process(&mut conv);
        assert_eq!(response, "Một*Hai*Cho shop xin địa chỉ ạ");
        assert!(conv.take_pending_responses().is_empty());
    }

    #[test]
    fn test_pass_response_prepends_queued_response() {
        let processor = TurnProcessor::default();
        let mut conv = conversation(Message::new("muốn đặt hàng").with_intent("User@order"));
        processor.process(&mut conv);

        conv.queue_response("shop ship toàn quốc ạ");
        let response = processor.pass_response(&mut conv);
        assert_eq!(response, "Shop ship toàn quốc ạ*Cho shop xin địa chỉ ạ");
        assert!(conv.take_pending_responses().is_empty());
    }

    #[test]
    fn test_address_advances_with_response_and_hooks() {
        let processor = TurnProcessor::new(
            HookRegistry::with_defaults(),
            TemplateRenderer::new(),
            ProcessorSettings::default(),
        );
        let mut conv = conversation(Message::new("muốn đặt hàng").with_intent("User@order"));
        processor.process(&mut conv);

        let message = Message::new("giao tới Hà Nội").with_entity(Entity::new("Hà Nội", "ADDRESS"));
        conv.current_turn_mut().unwrap().message = message;
        let response = processor.process(&mut conv);
        assert_eq!(response, "Shop giao tới Hà Nội nhé*Cho shop xin số điện thoại ạ");
        assert_eq!(conv.current_task_name(), Some("ask_phone"));
        // 分支的后置 hook 把地址抄到了账单上
        let bill = conv.graph().bill().unwrap();
        assert_eq!(bill.last_attr_value("address").as_deref(), Some("Hà Nội"));
    }

    #[test]
    fn test_advance_is_bounded_and_reaches_done() {
        let processor = TurnProcessor::default();
        let mut conv = conversation(Message::new("muốn đặt hàng").with_intent("User@order"));
        let user = conv.graph().user_id().to_string();
        conv.graph_mut()
            .graph_mut()
            .set_attr(&user, "phone_number", Some("0901"), true);
        conv.graph_mut().graph_mut().set_attr(&user, "name", Some("lan"), true);
        processor.process(&mut conv);

        let message = Message::new("Hà Nội").with_entity(Entity::new("Hà Nội", "ADDRESS"));
        conv.current_turn_mut().unwrap().message = message;
        let response = processor.process(&mut conv);
        // 电话已知：ask_phone 一进入就完成，直接推进到 DONE
        assert!(conv.current_turn().unwrap().done());
        assert_eq!(
            response,
            "Shop giao tới Hà Nội nhé*Cảm ơn ạ*Đơn của lan đã xong"
        );
    }
}
