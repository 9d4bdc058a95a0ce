//! 核心支撑：错误类型、内容哈希 id、会话锁

pub mod error;
pub mod ids;
pub mod locks;

pub use error::{DialogueError, SchemaError, ScriptError};
pub use ids::content_hash;
pub use locks::{ConversationKey, ConversationLocks};
