//! 关系与属性边
//!
//! 普通关系连接两个图节点，存放在 Graph 上；属性边的终点永远是 ValueNode，
//! 直接挂在源节点上（ValueNode 是叶子，不进入图的节点表）。

use serde::{Deserialize, Serialize};

use crate::core::ids::content_hash;
use crate::graph::node::NodeId;

/// 关系类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Plain,
    Attribute,
    /// 必填属性边：决定 Bill/User 是否缺信息
    RequiredAttribute,
}

impl RelationKind {
    pub fn is_attribute(self) -> bool {
        !matches!(self, RelationKind::Plain)
    }
}

/// `"{src}-[{name}]->{dst}"` 的内容哈希
pub fn relation_id(src: &str, name: &str, dst: &str) -> String {
    content_hash([format!("{src}-[{name}]->{dst}")])
}

/// 关系名转成检索用的词：下划线换空格
fn relation_words(name: &str) -> Vec<String> {
    vec![name.replace('_', " ")]
}

/// 节点之间的普通关系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub name: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub mentioned_time: i64,
    #[serde(default)]
    pub words: Vec<String>,
}

impl Relation {
    pub fn new(src: &str, dst: &str, name: &str, mentioned_time: i64) -> Self {
        Self {
            id: relation_id(src, name, dst),
            name: name.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
            mentioned_time,
            words: relation_words(name),
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.src == node_id || self.dst == node_id
    }
}

/// 属性值叶子节点；`value` 为 None 表示 Schema 初始化时留下的占位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueNode {
    pub id: NodeId,
    pub value: Option<String>,
}

/// 属性边：源节点 → ValueNode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEdge {
    pub id: String,
    pub name: String,
    pub kind: RelationKind,
    pub value: ValueNode,
    pub mentioned_time: i64,
}

impl AttributeEdge {
    pub fn new(src: &str, name: &str, value: Option<&str>, required: bool, mentioned_time: i64) -> Self {
        let value_id = content_hash([src, name, value.unwrap_or_default()]);
        Self {
            id: relation_id(src, name, &value_id),
            name: name.to_string(),
            kind: if required {
                RelationKind::RequiredAttribute
            } else {
                RelationKind::Attribute
            },
            value: ValueNode {
                id: value_id,
                value: value.map(str::to_string),
            },
            mentioned_time,
        }
    }

    pub fn words(&self) -> Vec<String> {
        relation_words(&self.name)
    }

    pub fn is_placeholder(&self) -> bool {
        self.value.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_edge_id_depends_on_value() {
        let a = AttributeEdge::new("user", "address", Some("hanoi"), true, 1);
        let b = AttributeEdge::new("user", "address", Some("hue"), true, 1);
        let c = AttributeEdge::new("user", "address", Some("hanoi"), true, 9);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, c.id);
        assert_eq!(a.kind, RelationKind::RequiredAttribute);
    }

    #[test]
    fn test_relation_words() {
        let r = Relation::new("a", "b", "bought_by", 0);
        assert_eq!(r.words, vec!["bought by".to_string()]);
        assert!(r.touches("b"));
    }
}
