//! 对话状态机
//!
//! 层次：Script → TaskConfig → Task → Branch（共享的期望组）。
//! 运行期：Conversation 持有若干 Turn，每个 Turn 执行一个 TaskConfig，用任务栈记录进度。
//!
//! - `definition`：脚本文档（JSON / TOML）的 serde 结构
//! - `task` / `task_config` / `script`：加载后的静态结构
//! - `turn` / `conversation`：运行期状态

pub mod conversation;
pub mod definition;
pub mod script;
pub mod task;
pub mod task_config;
pub mod turn;

pub use conversation::Conversation;
pub use definition::{BranchDef, EntryPointDef, InfoMapping, ScriptDef, TaskConfigDef, TaskDef};
pub use script::Script;
pub use task::{Outcome, Task};
pub use task_config::TaskConfig;
pub use turn::Turn;
