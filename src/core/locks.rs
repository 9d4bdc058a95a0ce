//! 会话级串行化
//!
//! 同一会话（用户 + 店铺）的消息必须串行处理；不同会话互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// 会话键：(user_id, shop_id)
pub type ConversationKey = (String, String);

/// 按会话键分发的互斥锁表
#[derive(Debug, Default)]
pub struct ConversationLocks {
    locks: RwLock<HashMap<ConversationKey, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, user_id: &str, shop_id: &str) -> Arc<Mutex<()>> {
        let key = (user_id.to_string(), shop_id.to_string());
        if let Some(lock) = self.locks.read().await.get(&key) {
            return lock.clone();
        }
        self.locks.write().await.entry(key).or_default().clone()
    }

    /// 取得会话锁，guard 释放前同一会话的其他调用方等待
    pub async fn acquire(&self, user_id: &str, shop_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(user_id, shop_id).await.lock_owned().await
    }

    /// 清理没有持有者的锁
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - locks.len()
    }

    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_is_serialised() {
        let locks = ConversationLocks::new();
        let guard = locks.acquire("u1", "s1").await;
        let lock = locks.lock_for("u1", "s1").await;
        assert!(lock.try_lock().is_err());
        // 其他会话不受影响
        let other = locks.lock_for("u2", "s1").await;
        assert!(other.try_lock().is_ok());
        drop(guard);
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_prune_releases_idle_locks() {
        let locks = ConversationLocks::new();
        let held = locks.acquire("u1", "s1").await;
        drop(locks.acquire("u2", "s1").await);
        assert_eq!(locks.len().await, 2);
        assert_eq!(locks.prune().await, 1);
        assert_eq!(locks.len().await, 1);
        drop(held);
    }
}
