//! 会话存储抽象层
//!
//! 统一的会话读写接口，按 (user_id, shop_id) 定位一段对话。
//! 提供内存实现和 JSON 文件实现。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::core::{content_hash, ConversationKey};
use crate::dialogue::Conversation;

/// 会话存储接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 读取会话；不存在时返回 None
    async fn load(&self, user_id: &str, shop_id: &str) -> anyhow::Result<Option<Conversation>>;

    /// 写入会话（覆盖）
    async fn save(&self, conversation: &Conversation) -> anyhow::Result<()>;

    /// 删除会话，返回是否存在过
    async fn delete(&self, user_id: &str, shop_id: &str) -> anyhow::Result<bool>;
}

/// 内存会话存储，进程退出即丢失
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<ConversationKey, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, user_id: &str, shop_id: &str) -> anyhow::Result<Option<Conversation>> {
        let key = (user_id.to_string(), shop_id.to_string());
        Ok(self.conversations.read().await.get(&key).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> anyhow::Result<()> {
        let key = (conversation.user_id.clone(), conversation.shop_id.clone());
        self.conversations
            .write()
            .await
            .insert(key, conversation.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str, shop_id: &str) -> anyhow::Result<bool> {
        let key = (user_id.to_string(), shop_id.to_string());
        Ok(self.conversations.write().await.remove(&key).is_some())
    }
}

/// JSON 文件存储：每段会话一个文件，文件名为会话键的哈希
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &str, shop_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", content_hash([user_id, shop_id])))
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn load(&self, user_id: &str, shop_id: &str) -> anyhow::Result<Option<Conversation>> {
        let path = self.path_for(user_id, shop_id);
        let data = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let conversation: Conversation = serde_json::from_str(&data)?;
        Ok(Some(conversation))
    }

    async fn save(&self, conversation: &Conversation) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&conversation.user_id, &conversation.shop_id);
        // 先写临时文件再改名，避免读到写了一半的内容
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(conversation)?).await?;
        fs::rename(&tmp, &path).await?;
        tracing::debug!(path = %path.display(), "conversation saved");
        Ok(())
    }

    async fn delete(&self, user_id: &str, shop_id: &str) -> anyhow::Result<bool> {
        match fs::remove_file(self.path_for(user_id, shop_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
