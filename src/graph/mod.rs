//! 会话知识图
//!
//! - `node` / `relation`：节点类别、属性边与 ValueNode
//! - `store`：Graph，属性读写、提及时间回溯、名称模糊检索
//! - `subgraph`：SubGraph，维持 user/shop/账单/天气 不变量
//! - `schema`：节点 Schema 与带 TTL 的缓存
//! - `search` / `text`：检索索引与文本归一化

pub mod node;
pub mod relation;
pub mod schema;
pub mod search;
pub mod store;
pub mod subgraph;
pub mod text;

pub use node::{BillStatus, Node, NodeId, NodeKind, MENTION_WINDOW};
pub use relation::{AttributeEdge, Relation, RelationKind, ValueNode};
pub use schema::{NodeSchema, SchemaCache, SchemaKey, SchemaSource, StaticSchemaSource};
pub use search::{NameIndex, SearchSettings};
pub use store::{Graph, PreviousNodeQuery};
pub use subgraph::SubGraph;

/// 当前 UTC 毫秒时间戳，所有提及时间都用它
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
