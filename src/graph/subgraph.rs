//! 会话子图：保证恰好一个 user、一个 shop，以及至少一个当前账单和一个当前天气节点

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::node::{BillStatus, Node, NodeId};
use crate::graph::schema::SchemaCache;
use crate::graph::store::Graph;

/// user → shop 的联系关系名
pub const CONTACT_RELATION: &str = "contact";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubGraph {
    graph: Graph,
    user_id: NodeId,
    shop_id: NodeId,
}

impl SubGraph {
    pub fn new(scope: &str, shop_name: &str, schemas: Arc<SchemaCache>) -> Self {
        let mut graph = Graph::new(scope, schemas);
        let user_id = graph.add_node(Node::user(scope)).id.clone();
        let shop_id = graph.add_node(Node::shop(scope, shop_name)).id.clone();
        graph.add_relation(&user_id, &shop_id, CONTACT_RELATION);
        let mut sub = Self {
            graph,
            user_id,
            shop_id,
        };
        sub.ensure_current_nodes();
        sub
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn attach_schemas(&mut self, schemas: Arc<SchemaCache>) {
        self.graph.attach_schemas(schemas);
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn shop_id(&self) -> &str {
        &self.shop_id
    }

    pub fn user(&self) -> Option<&Node> {
        self.graph.node(&self.user_id)
    }

    pub fn user_mut(&mut self) -> Option<&mut Node> {
        let id = self.user_id.clone();
        self.graph.node_mut(&id)
    }

    pub fn shop(&self) -> Option<&Node> {
        self.graph.node(&self.shop_id)
    }

    fn latest_of_class<'a>(&'a self, class: &'a str) -> Option<&'a Node> {
        self.graph
            .nodes_of_class(class)
            .max_by_key(|n| n.created_at().unwrap_or_default())
    }

    /// 当前账单：创建时间最新的那张
    pub fn bill(&self) -> Option<&Node> {
        self.latest_of_class("Bill")
    }

    pub fn bill_id(&self) -> Option<NodeId> {
        self.bill().map(|n| n.id.clone())
    }

    pub fn weather(&self) -> Option<&Node> {
        self.latest_of_class("Weather")
    }

    pub fn weather_id(&self) -> Option<NodeId> {
        self.weather().map(|n| n.id.clone())
    }

    /// 所有账单，按创建时间升序
    pub fn bills(&self) -> Vec<&Node> {
        let mut bills: Vec<&Node> = self.graph.nodes_of_class("Bill").collect();
        bills.sort_by_key(|n| n.created_at().unwrap_or_default());
        bills
    }

    pub fn confirmed_bills(&self) -> Vec<&Node> {
        self.bills()
            .into_iter()
            .filter(|b| b.bill_status() == Some(BillStatus::Confirmed))
            .collect()
    }

    /// 已完成或已取消的历史账单
    pub fn old_bills(&self) -> Vec<&Node> {
        self.bills()
            .into_iter()
            .filter(|b| matches!(b.bill_status(), Some(BillStatus::Done | BillStatus::Canceled)))
            .collect()
    }

    pub fn init_bill(&mut self) -> NodeId {
        let now = crate::graph::now_millis();
        let scope = self.graph.scope().to_string();
        self.graph.add_node_at(Node::bill(&scope, now), now).id.clone()
    }

    pub fn init_weather(&mut self) -> NodeId {
        let now = crate::graph::now_millis();
        let scope = self.graph.scope().to_string();
        self.graph.add_node_at(Node::weather(&scope, now), now).id.clone()
    }

    fn ensure_current_nodes(&mut self) {
        if self.bill().is_none() {
            self.init_bill();
        }
        if self.weather().is_none() {
            self.init_weather();
        }
    }

    /// 主语（`User` / `Shop` / `Bill` / `Weather`）对应的节点 id
    pub fn node_for_subject(&self, subject: &str) -> Option<NodeId> {
        match subject {
            "User" => Some(self.user_id.clone()),
            "Shop" => Some(self.shop_id.clone()),
            "Bill" => self.bill_id(),
            "Weather" => self.weather_id(),
            _ => None,
        }
    }

    /// 删除节点；user/shop 不可删除。删掉最后一张账单或天气时会补建
    pub fn remove_node(&mut self, id: &str) -> bool {
        if id == self.user_id || id == self.shop_id {
            tracing::warn!(node = %id, "refusing to remove user/shop node");
            return false;
        }
        let removed = self.graph.remove_node(id).is_some();
        self.ensure_current_nodes();
        removed
    }

    /// 只保留 user 和 shop
    pub fn remove_all_nodes(&mut self) {
        let doomed: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|n| n.id != self.user_id && n.id != self.shop_id)
            .map(|n| n.id.clone())
            .collect();
        for id in doomed {
            self.graph.remove_node(&id);
        }
        self.ensure_current_nodes();
    }

    /// 一个目标（如一笔订单）完成后：保留 user、shop 与历史账单，其余节点清掉，
    /// 然后新建账单和天气
    pub fn start_new_goal(&mut self) {
        let doomed: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|n| n.id != self.user_id && n.id != self.shop_id && n.class_tag() != "Bill")
            .map(|n| n.id.clone())
            .collect();
        for id in doomed {
            self.graph.remove_node(&id);
        }
        self.init_bill();
        self.init_weather();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subgraph() -> SubGraph {
        SubGraph::new("shop-1:user-1", "Demo Shop", Arc::new(SchemaCache::default()))
    }

    #[test]
    fn test_construction_invariants() {
        let sub = subgraph();
        assert!(sub.user().is_some());
        assert!(sub.shop().is_some());
        assert!(sub.bill().is_some());
        assert!(sub.weather().is_some());
        assert_eq!(sub.graph().relations_from(sub.user_id()).count(), 1);
    }

    #[test]
    fn test_user_and_shop_not_removable() {
        let mut sub = subgraph();
        let user = sub.user_id().to_string();
        assert!(!sub.remove_node(&user));
        assert!(sub.user().is_some());
    }

    #[test]
    fn test_removing_current_bill_recreates_one() {
        let mut sub = subgraph();
        let bill = sub.bill_id().unwrap();
        assert!(sub.remove_node(&bill));
        let replacement = sub.bill_id().unwrap();
        assert_ne!(bill, replacement);
    }

    #[test]
    fn test_new_goal_keeps_old_bills() {
        let mut sub = subgraph();
        let first = sub.bill_id().unwrap();
        sub.graph_mut()
            .node_mut(&first)
            .unwrap()
            .set_bill_status(BillStatus::Done, 1);
        let scope = sub.graph().scope().to_string();
        sub.graph_mut().add_node(Node::product(&scope, "shirt", None));
        sub.start_new_goal();
        assert_eq!(sub.bills().len(), 2);
        assert_eq!(sub.old_bills().len(), 1);
        assert_eq!(sub.graph().nodes_of_class("Product").count(), 0);
        assert_eq!(sub.graph().nodes_of_class("Weather").count(), 1);
    }

    #[test]
    fn test_current_bill_is_newest() {
        let mut sub = subgraph();
        let current = sub.bill_id().unwrap();
        let scope = sub.graph().scope().to_string();
        sub.graph_mut().add_node_at(Node::bill(&scope, 1), 1);
        assert_eq!(sub.bill_id().as_ref(), Some(&current));

        let later = crate::graph::now_millis() + 60_000;
        let newest = sub.graph_mut().add_node_at(Node::bill(&scope, later), later).id.clone();
        assert_eq!(sub.bill_id(), Some(newest));
        assert_eq!(sub.bills().len(), 3);
    }

    #[test]
    fn test_subject_lookup() {
        let sub = subgraph();
        assert_eq!(sub.node_for_subject("User").as_deref(), Some(sub.user_id()));
        assert!(sub.node_for_subject("Unknown").is_none());
    }
}
