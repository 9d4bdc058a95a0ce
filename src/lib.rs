//! Bee Dialog - 任务型对话编排引擎
//!
//! 输入是已经由外部 NLU 标注了意图与实体的用户消息，输出是机器人下一句话。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、内容哈希 id、会话锁
//! - **graph**: 会话知识图（节点、属性、提及时间、名称检索、Schema 缓存）
//! - **expectation**: 期望网络与分支、入口
//! - **dialogue**: 脚本、任务配置、任务、Turn 与会话状态机
//! - **engine**: hook、`Bot@` 意图、信息映射、模板渲染、Turn 处理器与控制器
//! - **storage**: 会话持久化（内存 / JSON 文件）
//! - **message** / **intents**: 消息结构与内置意图标签

pub mod config;
pub mod core;
pub mod dialogue;
pub mod engine;
pub mod expectation;
pub mod graph;
pub mod intents;
pub mod message;
pub mod observability;
pub mod storage;

pub use dialogue::{Conversation, Script};
pub use engine::DialogueController;
pub use message::{Entity, Intent, Message};
