//! 图节点
//!
//! 节点类别是封闭枚举 `NodeKind`，反序列化时按 `class` 标签一次性确定；
//! 类别特有的数据（账单状态、天气的地点日期）放在对应变体里。

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::ids::content_hash;
use crate::graph::relation::AttributeEdge;
use crate::graph::schema::{NodeSchema, SchemaKey};

pub type NodeId = String;

/// 最近提及时间最多保留的条数
pub const MENTION_WINDOW: usize = 5;

/// 账单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Init,
    Processing,
    Confirmed,
    Canceled,
    Done,
}

/// 节点类别
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum NodeKind {
    User,
    Shop,
    Product,
    Bill {
        status: BillStatus,
        created_at: i64,
        #[serde(default)]
        confirmed_at: Option<i64>,
        code: String,
    },
    Weather {
        created_at: i64,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        date: Option<String>,
    },
    Value,
}

impl NodeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::User => "User",
            NodeKind::Shop => "Shop",
            NodeKind::Product => "Product",
            NodeKind::Bill { .. } => "Bill",
            NodeKind::Weather { .. } => "Weather",
            NodeKind::Value => "Value",
        }
    }
}

/// 图中的实体节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub parent_class: Option<String>,
    /// 会话作用域 id
    pub scope: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    extra_aliases: Vec<String>,
    #[serde(default)]
    mentioned_times: Vec<i64>,
    /// 属性边，按边 id 索引，保持插入顺序
    #[serde(default)]
    attributes: IndexMap<String, AttributeEdge>,
    #[serde(default)]
    children: Vec<Node>,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(skip)]
    schema: Arc<NodeSchema>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            parent_class: None,
            scope: scope.into(),
            alias: None,
            extra_aliases: Vec::new(),
            mentioned_times: Vec::new(),
            attributes: IndexMap::new(),
            children: Vec::new(),
            parent_id: None,
            schema: Arc::default(),
        }
    }

    /// 会话中的用户节点，id 由作用域决定
    pub fn user(scope: &str) -> Self {
        Self::new(content_hash([scope, "User"]), NodeKind::User, "default", scope)
    }

    pub fn shop(scope: &str, name: &str) -> Self {
        Self::new(content_hash([scope, "Shop"]), NodeKind::Shop, name, scope)
    }

    pub fn product(scope: &str, name: &str, parent_class: Option<&str>) -> Self {
        let mut node = Self::new(
            content_hash([scope, "Product", name]),
            NodeKind::Product,
            name,
            scope,
        );
        node.parent_class = parent_class.map(str::to_string);
        node
    }

    pub fn bill(scope: &str, created_at: i64) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let code = id[..8].to_uppercase();
        let kind = NodeKind::Bill {
            status: BillStatus::Init,
            created_at,
            confirmed_at: None,
            code: code.clone(),
        };
        Self::new(id, kind, code, scope)
    }

    pub fn weather(scope: &str, created_at: i64) -> Self {
        let kind = NodeKind::Weather {
            created_at,
            location: None,
            date: None,
        };
        Self::new(uuid::Uuid::new_v4().simple().to_string(), kind, "weather", scope)
    }

    pub fn class_tag(&self) -> &'static str {
        self.kind.tag()
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn add_aliases(&mut self, aliases: impl IntoIterator<Item = String>) {
        for alias in aliases {
            if !self.extra_aliases.contains(&alias) {
                self.extra_aliases.push(alias);
            }
        }
    }

    /// 检索用名称集合：额外别名、名称、子类别、短别名；账单额外带上单号
    pub fn aliases(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .extra_aliases
            .iter()
            .cloned()
            .chain(std::iter::once(self.name.clone()))
            .chain(self.parent_class.clone())
            .chain(self.alias.clone());
        for alias in candidates {
            if !alias.is_empty() && !out.contains(&alias) {
                out.push(alias);
            }
        }
        if let NodeKind::Bill { code, .. } = &self.kind {
            if !out.contains(code) {
                out.push(code.clone());
            }
        }
        out
    }

    pub fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    pub fn schema_key(&self) -> SchemaKey {
        SchemaKey::new(self.class_tag())
            .with_parent(self.parent_class.clone())
            .with_scope(Some(self.scope.clone()))
    }

    pub(crate) fn bind_schema(&mut self, schema: Arc<NodeSchema>) {
        self.schema = schema;
    }

    // ---- 提及时间 ----

    pub fn mentioned_times(&self) -> &[i64] {
        &self.mentioned_times
    }

    /// 记录一次提及；保持升序，只保留最近 MENTION_WINDOW 条
    pub fn set_mentioned_time(&mut self, time: i64) {
        let pos = self.mentioned_times.partition_point(|t| *t <= time);
        self.mentioned_times.insert(pos, time);
        if self.mentioned_times.len() > MENTION_WINDOW {
            let overflow = self.mentioned_times.len() - MENTION_WINDOW;
            self.mentioned_times.drain(..overflow);
        }
    }

    /// step 为从最新往回数的负偏移（-1 为最新）；不足时返回 0
    pub fn get_mentioned_time(&self, step: isize) -> i64 {
        if step >= 0 {
            return 0;
        }
        let idx = self.mentioned_times.len() as isize + step;
        if idx < 0 {
            return 0;
        }
        self.mentioned_times[idx as usize]
    }

    pub fn last_mentioned_time(&self) -> i64 {
        self.get_mentioned_time(-1)
    }

    // ---- 属性 ----

    fn edges_of<'a>(&'a self, attr: &'a str) -> impl Iterator<Item = &'a AttributeEdge> + 'a {
        self.attributes.values().filter(move |e| e.name == attr)
    }

    pub fn attribute_edges(&self) -> impl Iterator<Item = &AttributeEdge> {
        self.attributes.values()
    }

    /// 该属性是否有任何边（包括占位边）
    pub fn has_attr(&self, attr: &str) -> bool {
        self.edges_of(attr).next().is_some()
    }

    /// 属性的所有非空值，按提及时间升序
    pub fn get_attr(&self, attr: &str) -> Vec<String> {
        let mut edges: Vec<&AttributeEdge> = self.edges_of(attr).collect();
        edges.sort_by_key(|e| e.mentioned_time);
        edges
            .into_iter()
            .filter_map(|e| e.value.value.clone())
            .collect()
    }

    pub fn last_attr_value(&self, attr: &str) -> Option<String> {
        self.get_attr(attr).pop()
    }

    pub fn set_attr(&mut self, attr: &str, value: Option<&str>, force: bool) -> bool {
        self.set_attr_at(attr, value, force, crate::graph::now_millis())
    }

    /// 不带 force 时仅在属性完全不存在时写入；带 force 时总是写入新边，
    /// 并在同名边多于一条时清掉值为空的占位边。返回是否写入
    pub fn set_attr_at(&mut self, attr: &str, value: Option<&str>, force: bool, time: i64) -> bool {
        if !force && self.has_attr(attr) {
            return false;
        }
        let edge = AttributeEdge::new(&self.id, attr, value, self.schema.is_required(attr), time);
        let fresh = !self.attributes.contains_key(&edge.id);
        self.attributes.insert(edge.id.clone(), edge);
        if fresh && self.edges_of(attr).count() > 1 {
            self.attributes
                .retain(|_, e| e.name != attr || !e.is_placeholder());
        }
        true
    }

    pub fn drop_attr(&mut self, attr: &str) {
        self.attributes.retain(|_, e| e.name != attr);
    }

    /// 删除该属性最近一次写入的值
    pub fn drop_last_attr(&mut self, attr: &str) {
        let last = self
            .edges_of(attr)
            .filter(|e| !e.is_placeholder())
            .max_by_key(|e| e.mentioned_time)
            .map(|e| e.id.clone());
        if let Some(id) = last {
            self.attributes.shift_remove(&id);
        }
    }

    pub fn drop_all_attributes(&mut self) {
        self.attributes.clear();
    }

    /// Schema 中的必填属性里还没有非空值的那些
    pub fn missing_required_attributes(&self) -> Vec<String> {
        self.schema
            .required_attributes
            .iter()
            .filter(|a| self.get_attr(a).is_empty())
            .cloned()
            .collect()
    }

    /// 为 Schema 的每个属性建立占位边
    pub fn init_empty_attributes(&mut self) {
        for attr in self.schema.all_attributes() {
            self.set_attr_at(&attr, None, false, 0);
        }
    }

    /// 属性名构成的词集合，用于检索降权
    pub fn attribute_words(&self) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for edge in self.attributes.values() {
            for word in edge.words() {
                if !words.contains(&word) {
                    words.push(word);
                }
            }
        }
        words
    }

    // ---- 变体 ----

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn add_child(&mut self, mut child: Node) {
        child.parent_id = Some(self.id.clone());
        if !self.children.iter().any(|c| c.id == child.id) {
            self.children.push(child);
        }
    }

    /// 把子节点的变体属性值汇总到父节点
    pub fn update_children_attributes(&mut self) {
        let variant_attrs = self.schema.variant_attributes.clone();
        for attr in variant_attrs {
            let values: Vec<String> = self
                .children
                .iter()
                .filter_map(|child| child.get_attr(&attr).into_iter().next())
                .collect();
            for value in values {
                self.set_attr(&attr, Some(&value), true);
            }
        }
    }

    // ---- 账单 / 天气 ----

    pub fn bill_status(&self) -> Option<BillStatus> {
        match &self.kind {
            NodeKind::Bill { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 修改账单状态；确认时记录确认时间。非账单节点返回 false
    pub fn set_bill_status(&mut self, new_status: BillStatus, time: i64) -> bool {
        match &mut self.kind {
            NodeKind::Bill {
                status,
                confirmed_at,
                ..
            } => {
                *status = new_status;
                if new_status == BillStatus::Confirmed {
                    *confirmed_at = Some(time);
                }
                true
            }
            _ => false,
        }
    }

    pub fn created_at(&self) -> Option<i64> {
        match &self.kind {
            NodeKind::Bill { created_at, .. } | NodeKind::Weather { created_at, .. } => {
                Some(*created_at)
            }
            _ => None,
        }
    }
}
