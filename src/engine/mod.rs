//! 编排层：把状态机、子图与期望网络串成一次完整的消息处理
//!
//! - `hooks`：按意图标签注册的业务回调
//! - `bot_intents`：从子图推导 `Bot@` 意图
//! - `mapper`：意图 / 实体 → 期望与子图属性
//! - `render`：回复模板占位符替换
//! - `processor`：单个 Turn 内的理解、推进与回复
//! - `controller`：消息队列、Turn 转移、会话锁与持久化

pub mod bot_intents;
pub mod controller;
pub mod hooks;
pub mod mapper;
pub mod processor;
pub mod render;

pub use bot_intents::BotIntents;
pub use controller::{ControllerSettings, DialogueController};
pub use hooks::{FnHook, Hook, HookContext, HookRegistry};
pub use mapper::InfoMapper;
pub use processor::{post_process, ProcessorSettings, TurnProcessor};
pub use render::{Resolver, TemplateRenderer};
