//! 会话知识图
//!
//! 保存一次会话里的所有节点与普通关系，提供属性读写、按提及时间回溯（解析“它/那个”）
//! 和名称模糊检索。所有查找都是纯内存操作：不存在的 id 只是不出现在结果里。

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::graph::node::{Node, NodeId};
use crate::graph::relation::Relation;
use crate::graph::schema::SchemaCache;
use crate::graph::search::{NameIndex, SearchSettings};

/// 回溯的最大深度（从最新提及往回数的步数）
const FUNNEL_DEPTH: isize = 4;

/// `Graph::get_previous_node` 的查询条件
#[derive(Debug, Clone, Default)]
pub struct PreviousNodeQuery {
    /// 候选节点；为空时从全图按类别和时间范围筛选
    pub candidates: Vec<NodeId>,
    pub class_filter: Option<String>,
    /// 只考虑最近一次提及不早于该时间的节点
    pub mentioned_since: Option<i64>,
    /// 为 true 或未给出 k 时，直接返回并列最新的节点
    pub return_latest: bool,
    pub k: Option<usize>,
}

impl PreviousNodeQuery {
    pub fn latest() -> Self {
        Self {
            return_latest: true,
            ..Default::default()
        }
    }

    /// 逐步收窄，直到候选数不超过 k
    pub fn narrowed_to(k: usize) -> Self {
        Self {
            return_latest: false,
            k: Some(k),
            ..Default::default()
        }
    }

    pub fn among(mut self, candidates: Vec<NodeId>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn of_class(mut self, class: impl Into<String>) -> Self {
        self.class_filter = Some(class.into());
        self
    }

    pub fn since(mut self, time: i64) -> Self {
        self.mentioned_since = Some(time);
        self
    }
}

/// 一次会话的节点与关系
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    scope: String,
    nodes: IndexMap<NodeId, Node>,
    #[serde(default)]
    relations: IndexMap<String, Relation>,
    #[serde(skip)]
    index: OnceLock<NameIndex>,
    #[serde(skip)]
    schemas: Arc<SchemaCache>,
    #[serde(skip)]
    search: SearchSettings,
}

impl Graph {
    pub fn new(scope: impl Into<String>, schemas: Arc<SchemaCache>) -> Self {
        Self {
            scope: scope.into(),
            nodes: IndexMap::new(),
            relations: IndexMap::new(),
            index: OnceLock::new(),
            schemas,
            search: SearchSettings::default(),
        }
    }

    pub fn with_search_settings(mut self, settings: SearchSettings) -> Self {
        self.search = settings;
        self
    }

    pub fn set_search_settings(&mut self, settings: SearchSettings) {
        self.search = settings;
    }

    /// 反序列化之后重新注入 Schema 缓存并绑定每个节点的 Schema
    pub fn attach_schemas(&mut self, schemas: Arc<SchemaCache>) {
        for node in self.nodes.values_mut() {
            node.bind_schema(schemas.get(&node.schema_key()));
        }
        self.schemas = schemas;
        self.invalidate_index();
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn invalidate_index(&mut self) {
        self.index = OnceLock::new();
    }

    fn name_index(&self) -> &NameIndex {
        self.index.get_or_init(|| NameIndex::build(self.nodes.values()))
    }

    // ---- 节点 ----

    /// 幂等插入：已存在时只更新提及时间；新节点绑定 Schema 并建立占位属性
    pub fn add_node(&mut self, node: Node) -> &mut Node {
        self.add_node_at(node, crate::graph::now_millis())
    }

    pub fn add_node_at(&mut self, mut node: Node, time: i64) -> &mut Node {
        if !self.nodes.contains_key(&node.id) {
            node.bind_schema(self.schemas.get(&node.schema_key()));
            node.init_empty_attributes();
            tracing::debug!(node = %node.id, class = node.class_tag(), "node added");
            self.invalidate_index();
        }
        let entry = self.nodes.entry(node.id.clone()).or_insert(node);
        entry.set_mentioned_time(time);
        entry
    }

    /// 批量插入；同一批节点共用同一个提及时间
    pub fn add_nodes(&mut self, nodes: Vec<Node>, time: Option<i64>) -> Vec<NodeId> {
        let time = time.unwrap_or_else(crate::graph::now_millis);
        nodes
            .into_iter()
            .map(|node| self.add_node_at(node, time).id.clone())
            .collect()
    }

    /// 把已有节点标记为在 time 被提及
    pub fn mention(&mut self, id: &str, time: i64) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.set_mentioned_time(time);
                true
            }
            None => false,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        // 属性变化会影响检索权重
        self.invalidate_index();
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_of_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.class_tag() == class)
    }

    /// 删除节点并断开与它相连的所有关系
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let removed = self.nodes.shift_remove(id)?;
        self.relations.retain(|_, r| !r.touches(id));
        self.invalidate_index();
        Some(removed)
    }

    // ---- 关系 ----

    /// 建立 src → dst 的普通关系；任一端不存在时返回 None
    pub fn add_relation(&mut self, src: &str, dst: &str, name: &str) -> Option<String> {
        if !self.contains(src) || !self.contains(dst) {
            return None;
        }
        let relation = Relation::new(src, dst, name, crate::graph::now_millis());
        let id = relation.id.clone();
        self.relations.insert(id.clone(), relation);
        Some(id)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn relations_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.values().filter(move |r| r.src == id)
    }

    pub fn relations_to<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.values().filter(move |r| r.dst == id)
    }

    // ---- 属性 ----

    pub fn get_attr(&self, id: &str, attr: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|n| n.get_attr(attr))
            .unwrap_or_default()
    }

    /// 节点不存在时返回 false
    pub fn set_attr(&mut self, id: &str, attr: &str, value: Option<&str>, force: bool) -> bool {
        match self.node_mut(id) {
            Some(node) => node.set_attr(attr, value, force),
            None => false,
        }
    }

    // ---- 回溯 ----

    /// 在 step（负偏移）上提及时间并列最大的节点；全为 0 时保留全部
    fn tied_for_latest(&self, ids: &[NodeId], step: isize) -> Vec<NodeId> {
        let mut max_time = 0;
        let mut out = Vec::new();
        for id in ids {
            let Some(node) = self.nodes.get(id) else { continue };
            let t = node.get_mentioned_time(step);
            if t > max_time {
                max_time = t;
                out.clear();
            }
            if t == max_time {
                out.push(id.clone());
            }
        }
        out
    }

    /// 按提及时间回溯最近的节点
    ///
    /// - `return_latest` 或未给 k：返回最近一次提及时间并列最大的节点
    /// - 否则从 step -1 往回走到 -4，每步只保留该步提及时间并列最大的节点；
    ///   候选数 ≤ k 时停止；某一步结果为空则保留上一步的集合
    pub fn get_previous_node(&self, query: &PreviousNodeQuery) -> Vec<NodeId> {
        let candidates: Vec<NodeId> = if query.candidates.is_empty() {
            self.nodes
                .values()
                .filter(|n| {
                    query
                        .class_filter
                        .as_deref()
                        .map_or(true, |c| n.class_tag() == c)
                })
                .filter(|n| {
                    query
                        .mentioned_since
                        .map_or(true, |t| n.last_mentioned_time() >= t)
                })
                .map(|n| n.id.clone())
                .collect()
        } else {
            query
                .candidates
                .iter()
                .filter(|id| self.nodes.contains_key(id.as_str()))
                .cloned()
                .collect()
        };

        let k = match query.k {
            Some(k) if !query.return_latest => k,
            _ => return self.tied_for_latest(&candidates, -1),
        };

        let mut current = candidates;
        for depth in 1..=FUNNEL_DEPTH {
            if current.len() <= k {
                break;
            }
            let reachable = current.iter().any(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| n.mentioned_times().len() as isize >= depth)
            });
            if !reachable {
                break;
            }
            let narrowed = self.tied_for_latest(&current, -depth);
            if !narrowed.is_empty() {
                current = narrowed;
            }
        }
        current
    }

    // ---- 检索 ----

    /// 名称模糊检索，返回节点 id
    pub fn get_node_info(&self, queries: &[&str]) -> Vec<NodeId> {
        self.get_node_info_scored(queries)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// 名称模糊检索，返回 (节点 id, 分数)
    pub fn get_node_info_scored(&self, queries: &[&str]) -> Vec<(NodeId, f32)> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        self.name_index().search(queries, &self.search)
    }
}
