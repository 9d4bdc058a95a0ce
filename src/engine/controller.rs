//! 对话控制器：一条用户消息从进入队列到生成最终回复
//!
//! 同步的 `process_message` 只操作内存中的 Conversation；
//! 异步的 `handle` 负责加锁、读取、处理与保存。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::error::DialogueError;
use crate::core::locks::ConversationLocks;
use crate::dialogue::{Conversation, Script};
use crate::graph::{SchemaCache, SearchSettings};
use crate::intents::DONE_TASK;
use crate::message::Message;
use crate::storage::ConversationStore;

use super::processor::{post_process, TurnProcessor};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// 一条消息之后最多连续转移几个 Turn
    pub max_turn_transitions: usize,
    pub search: SearchSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_turn_transitions: 3,
            search: SearchSettings::default(),
        }
    }
}

pub struct DialogueController {
    processor: TurnProcessor,
    script: Arc<Script>,
    schemas: Arc<SchemaCache>,
    store: Arc<dyn ConversationStore>,
    locks: ConversationLocks,
    settings: ControllerSettings,
}

impl std::fmt::Debug for DialogueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueController")
            .field("script", &self.script.name)
            .field("processor", &self.processor)
            .field("settings", &self.settings)
            .finish()
    }
}

impl DialogueController {
    /// 创建控制器；脚本自带的节点 schema 写入缓存
    pub fn new(
        script: Script,
        schemas: Arc<SchemaCache>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, DialogueError> {
        let installed = script.install_schemas(&schemas)?;
        debug!(script = %script.name, installed, "script schemas installed");
        Ok(Self {
            processor: TurnProcessor::default(),
            script: Arc::new(script),
            schemas,
            store,
            locks: ConversationLocks::new(),
            settings: ControllerSettings::default(),
        })
    }

    pub fn with_processor(mut self, processor: TurnProcessor) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn processor(&self) -> &TurnProcessor {
        &self.processor
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn schemas(&self) -> &Arc<SchemaCache> {
        &self.schemas
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    /// 用脚本副本新建一段会话
    pub fn new_conversation(&self, user_id: &str, shop_id: &str) -> Conversation {
        let mut conversation = Conversation::new(user_id, shop_id, (*self.script).clone(), self.schemas.clone());
        conversation
            .graph_mut()
            .graph_mut()
            .set_search_settings(self.settings.search);
        conversation
    }

    /// 从存储读出的会话需要重新挂上 schema 缓存与检索参数
    fn revive(&self, mut conversation: Conversation) -> Conversation {
        conversation.attach_schemas(self.schemas.clone());
        conversation
            .graph_mut()
            .graph_mut()
            .set_search_settings(self.settings.search);
        conversation
    }

    /// 处理队首的一条待处理消息
    fn process_pending(&self, conversation: &mut Conversation) -> String {
        self.processor.bot_intents.extract_global(conversation);
        conversation.get_state_by_entry_point();
        let message = conversation.drop_pending_message().unwrap_or_default();
        if let Some(turn) = conversation.current_turn_mut() {
            turn.message = message;
        }
        let mut parts = vec![self.processor.process(conversation)];

        let mut current = conversation.current_turn().map(|t| t.id.clone());
        for _ in 0..self.settings.max_turn_transitions {
            if !conversation.current_turn().is_some_and(|t| t.done()) {
                break;
            }
            if !conversation.next_state() {
                break;
            }
            let Some(turn) = conversation.current_turn() else {
                break;
            };
            if Some(&turn.id) == current.as_ref() {
                break;
            }
            let passive = !turn.message.has_text() && turn.response.is_none();
            current = Some(turn.id.clone());
            debug!(conversation = %conversation.id, config = %turn.config, passive, "entered next turn");
            let response = if passive {
                self.processor.pass_response(conversation)
            } else {
                self.processor.process(conversation)
            };
            parts.push(response);
        }
        parts.retain(|p| !p.is_empty());
        parts.join(&self.processor.settings.delimiter)
    }

    /// 同步处理一条消息，返回整理后的回复。文本为空时直接返回空串
    pub fn process_message(&self, conversation: &mut Conversation, message: Message) -> String {
        if !message.has_text() {
            return String::new();
        }
        conversation.add_pending_message(message);

        let mut parts = Vec::new();
        while conversation.has_pending_messages() {
            parts.push(self.process_pending(conversation));
        }
        let delimiter = &self.processor.settings.delimiter;
        let response = post_process(&parts.join(delimiter), delimiter);

        // 到达 DONE 配置即一个目标完成
        if conversation.turns().iter().any(|t| t.config == DONE_TASK) {
            info!(conversation = %conversation.id, "goal completed");
            conversation.reset();
        }
        conversation.touch();
        response
    }

    /// 在会话锁内读取、处理并保存；存储失败只记日志
    pub async fn handle(&self, user_id: &str, shop_id: &str, message: Message) -> String {
        let _guard = self.locks.acquire(user_id, shop_id).await;
        let mut conversation = match self.store.load(user_id, shop_id).await {
            Ok(Some(conversation)) => self.revive(conversation),
            Ok(None) => self.new_conversation(user_id, shop_id),
            Err(e) => {
                warn!(user_id, shop_id, "failed to load conversation: {}", e);
                self.new_conversation(user_id, shop_id)
            }
        };

        let response = self.process_message(&mut conversation, message);

        if let Err(e) = self.store.save(&conversation).await {
            warn!(conversation = %conversation.id, "failed to save conversation: {}", e);
        }
        response
    }

    /// 清空用户属性与全部对话状态
    pub async fn refresh_conversation(&self, user_id: &str, shop_id: &str) -> anyhow::Result<()> {
        let _guard = self.locks.acquire(user_id, shop_id).await;
        let Some(conversation) = self.store.load(user_id, shop_id).await? else {
            return Ok(());
        };
        let mut conversation = self.revive(conversation);
        conversation.hard_reset();
        conversation.touch();
        self.store.save(&conversation).await
    }
}
