//! 节点 Schema 与缓存
//!
//! Schema 描述某类节点可以持有哪些属性（必填、可选、变体）。`SchemaCache` 按
//! (class, parent_class, scope) 键缓存，带 TTL：
//! - 命中时直接返回（过期条目仍返回，等待后台刷新，允许短暂的旧读）
//! - 未命中时返回空 Schema，并登记该键，下一次刷新时按回退顺序从 `SchemaSource` 拉取
//!
//! 缓存以 `Arc<SchemaCache>` 显式注入到 Graph，而不是全局单例。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::SchemaError;

/// 缓存键：类别 + 子类别 + 作用域（通常是店铺的 storage id）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaKey {
    pub class: String,
    #[serde(default)]
    pub parent_class: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl SchemaKey {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            parent_class: None,
            scope: None,
        }
    }

    pub fn with_parent(mut self, parent_class: Option<String>) -> Self {
        self.parent_class = parent_class;
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// 由具体到宽泛的查找顺序：完整键 → 去掉 scope → 只剩 class
    fn fallbacks(&self) -> Vec<SchemaKey> {
        let mut keys = vec![self.clone()];
        if self.scope.is_some() {
            keys.push(self.clone().with_scope(None));
        }
        if self.parent_class.is_some() {
            keys.push(SchemaKey::new(self.class.clone()));
        }
        keys
    }
}

/// 一类节点的属性定义
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub class: String,
    #[serde(default)]
    pub parent_class: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// 必填属性：缺失时产生 `Bot@user_missing_info_*` 等意图
    #[serde(default)]
    pub required_attributes: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
    /// 变体属性：子节点（如某个尺码/颜色的变体）的值会汇总到父节点，必须是必填属性的子集
    #[serde(default)]
    pub variant_attributes: Vec<String>,
}

impl NodeSchema {
    pub fn key(&self) -> SchemaKey {
        SchemaKey::new(self.class.clone())
            .with_parent(self.parent_class.clone())
            .with_scope(self.scope.clone())
    }

    pub fn is_required(&self, attr: &str) -> bool {
        self.required_attributes.iter().any(|a| a == attr)
    }

    /// 所有声明过的属性名（去重，保持声明顺序）
    pub fn all_attributes(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.required_attributes
            .iter()
            .chain(self.attributes.iter())
            .chain(self.variant_attributes.iter())
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let stray: Vec<String> = self
            .variant_attributes
            .iter()
            .filter(|a| !self.is_required(a))
            .cloned()
            .collect();
        if stray.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::VariantNotRequired {
                class: self.class.clone(),
                attributes: stray,
            })
        }
    }
}

/// Schema 的来源（数据库、配置文件等），由后台刷新任务调用
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, key: &SchemaKey) -> anyhow::Result<Option<NodeSchema>>;
}

/// 静态 Schema 源：启动时从配置或脚本目录读入
#[derive(Debug, Default)]
pub struct StaticSchemaSource {
    schemas: HashMap<SchemaKey, NodeSchema>,
}

impl StaticSchemaSource {
    pub fn new(schemas: impl IntoIterator<Item = NodeSchema>) -> Self {
        Self {
            schemas: schemas.into_iter().map(|s| (s.key(), s)).collect(),
        }
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self, key: &SchemaKey) -> anyhow::Result<Option<NodeSchema>> {
        Ok(self.schemas.get(key).cloned())
    }
}

#[derive(Debug)]
struct CacheEntry {
    schema: Arc<NodeSchema>,
    loaded_at: Instant,
}

/// 带 TTL 的 Schema 缓存
#[derive(Debug)]
pub struct SchemaCache {
    entries: RwLock<HashMap<SchemaKey, CacheEntry>>,
    /// 未命中过、等待拉取的键
    wanted: RwLock<HashSet<SchemaKey>>,
    ttl: Duration,
    empty: Arc<NodeSchema>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            wanted: RwLock::new(HashSet::new()),
            ttl,
            empty: Arc::new(NodeSchema::default()),
        }
    }

    /// 预置或覆盖一条 Schema；变体属性不合法时拒绝
    pub fn insert(&self, schema: NodeSchema) -> Result<(), SchemaError> {
        schema.validate()?;
        let key = schema.key();
        self.wanted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CacheEntry {
                    schema: Arc::new(schema),
                    loaded_at: Instant::now(),
                },
            );
        Ok(())
    }

    /// 查找 Schema，永不阻塞；未命中返回空 Schema
    pub fn get(&self, key: &SchemaKey) -> Arc<NodeSchema> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            for candidate in key.fallbacks() {
                if let Some(entry) = entries.get(&candidate) {
                    return entry.schema.clone();
                }
            }
        }
        tracing::debug!(class = %key.class, "schema cache miss");
        self.wanted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        self.empty.clone()
    }

    pub fn is_stale(&self, key: &SchemaKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|e| e.loaded_at.elapsed() >= self.ttl)
            .unwrap_or(true)
    }

    /// 需要刷新的键：过期条目 + 未命中登记
    pub fn pending_keys(&self) -> Vec<SchemaKey> {
        let mut keys: Vec<SchemaKey> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, e)| e.loaded_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            self.wanted
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned(),
        );
        keys
    }

    /// 已有未过期的条目能回答这个键（含回退键）
    fn resolves(&self, key: &SchemaKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        key.fallbacks()
            .iter()
            .any(|k| entries.get(k).is_some_and(|e| e.loaded_at.elapsed() < self.ttl))
    }

    /// 源里按回退顺序都找不到：带 scope 的登记收窄为不带 scope 的键，
    /// 登记集合因此只随类别数量增长
    fn narrow_wanted(&self, key: &SchemaKey) {
        let mut wanted = self.wanted.write().unwrap_or_else(PoisonError::into_inner);
        if wanted.remove(key) && key.scope.is_some() {
            wanted.insert(key.clone().with_scope(None));
        }
    }

    fn forget(&self, key: &SchemaKey) {
        self.wanted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// 从 source 拉取所有待刷新的键（按回退顺序），返回成功更新的条数；拉取失败只记日志
    pub async fn refresh(&self, source: &dyn SchemaSource) -> usize {
        let mut updated = 0;
        let mut seen = HashSet::new();
        'keys: for key in self.pending_keys() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if self.resolves(&key) {
                self.forget(&key);
                continue;
            }
            for candidate in key.fallbacks() {
                match source.fetch(&candidate).await {
                    Ok(Some(schema)) => {
                        match self.insert(schema) {
                            Ok(()) => {
                                self.forget(&key);
                                updated += 1;
                            }
                            Err(e) => tracing::warn!(class = %key.class, "rejected schema: {}", e),
                        }
                        continue 'keys;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(class = %key.class, "schema fetch failed: {}", e);
                        continue 'keys;
                    }
                }
            }
            self.narrow_wanted(&key);
        }
        updated
    }

    /// 启动后台刷新任务，按固定间隔调用 `refresh`，直到 token 被取消
    pub fn spawn_refresh(
        self: Arc<Self>,
        source: Arc<dyn SchemaSource>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("schema refresher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let n = self.refresh(source.as_ref()).await;
                        if n > 0 {
                            tracing::info!(updated = n, "schema cache refreshed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> NodeSchema {
        NodeSchema {
            class: "User".into(),
            required_attributes: vec!["address".into(), "phone_number".into()],
            attributes: vec!["gender".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_miss_returns_empty_schema() {
        let cache = SchemaCache::default();
        let schema = cache.get(&SchemaKey::new("User"));
        assert!(schema.required_attributes.is_empty());
        assert_eq!(cache.pending_keys(), vec![SchemaKey::new("User")]);
    }

    #[test]
    fn test_lookup_falls_back_to_class() {
        let cache = SchemaCache::default();
        cache.insert(user_schema()).unwrap();
        let key = SchemaKey::new("User").with_scope(Some("shop-1".into()));
        assert!(cache.get(&key).is_required("address"));
    }

    #[test]
    fn test_variant_attributes_must_be_required() {
        let schema = NodeSchema {
            class: "Product".into(),
            required_attributes: vec!["size".into()],
            variant_attributes: vec!["size".into(), "color".into()],
            ..Default::default()
        };
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::VariantNotRequired { .. })
        ));
    }

    #[test]
    fn test_entries_go_stale_after_ttl() {
        let cache = SchemaCache::new(Duration::ZERO);
        cache.insert(user_schema()).unwrap();
        assert!(cache.is_stale(&SchemaKey::new("User")));
        assert_eq!(cache.pending_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_pulls_missed_keys() {
        let cache = SchemaCache::default();
        let _ = cache.get(&SchemaKey::new("User"));
        let source = StaticSchemaSource::new([user_schema()]);
        assert_eq!(cache.refresh(&source).await, 1);
        assert!(cache.get(&SchemaKey::new("User")).is_required("phone_number"));
        assert!(cache.pending_keys().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_resolves_scoped_misses_through_fallbacks() {
        let cache = SchemaCache::default();
        for i in 0..100 {
            let key = SchemaKey::new("User").with_scope(Some(format!("conv-{i}")));
            assert!(!cache.get(&key).is_required("address"));
        }
        assert_eq!(cache.pending_keys().len(), 100);

        let source = StaticSchemaSource::new([user_schema()]);
        assert_eq!(cache.refresh(&source).await, 1);
        assert!(cache.pending_keys().is_empty());
        let key = SchemaKey::new("User").with_scope(Some("conv-7".into()));
        assert!(cache.get(&key).is_required("address"));
    }

    #[tokio::test]
    async fn test_unknown_scoped_misses_collapse_to_one_key() {
        let cache = SchemaCache::default();
        for i in 0..10 {
            let _ = cache.get(&SchemaKey::new("Product").with_scope(Some(format!("conv-{i}"))));
        }
        let source = StaticSchemaSource::new([user_schema()]);
        assert_eq!(cache.refresh(&source).await, 0);
        assert_eq!(cache.pending_keys(), vec![SchemaKey::new("Product")]);

        // 之后源里有了，收窄后的键照样能拉到
        let product = NodeSchema {
            class: "Product".into(),
            required_attributes: vec!["size".into()],
            ..Default::default()
        };
        let source = StaticSchemaSource::new([product]);
        assert_eq!(cache.refresh(&source).await, 1);
        assert!(cache.pending_keys().is_empty());
        let key = SchemaKey::new("Product").with_scope(Some("conv-3".into()));
        assert!(cache.get(&key).is_required("size"));
    }

    #[tokio::test]
    async fn test_refresher_loads_then_stops_on_cancel() {
        let cache = Arc::new(SchemaCache::default());
        let _ = cache.get(&SchemaKey::new("User").with_scope(Some("conv-1".into())));
        let source: Arc<dyn SchemaSource> = Arc::new(StaticSchemaSource::new([user_schema()]));
        let cancel = CancellationToken::new();
        let handle = cache
            .clone()
            .spawn_refresh(source, Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert!(handle.await.is_ok());
        assert!(cache.get(&SchemaKey::new("User")).is_required("address"));
    }
}
