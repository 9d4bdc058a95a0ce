//! 分支：一组期望构成的一个可能结果
//!
//! 分支 id 由成员声明的内容哈希得到；`BranchRegistry` 按 id 去重，
//! 不同任务声明了相同的分支时共享同一个实例（同一组期望槽位）。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::ids::content_hash;
use crate::expectation::network::{Expectation, ExpectationId, ExpectationNetwork};
use crate::intents::{USER_HAS_MESSAGE, USER_PROVIDE_DATA};
use crate::message::Entity;

pub type BranchId = String;

/// `Branch::validate` 的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    /// 分支里出现在当前意图集合中的意图标签
    pub matched_intents: Vec<String>,
    /// (值期望, 实体下标)
    pub matches: Vec<(ExpectationId, usize)>,
    /// 当前意图集合；有实体匹配时追加 `User@provide_data`
    pub intents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    /// 意图标签 → 槽位
    intents: IndexMap<String, ExpectationId>,
    /// 值期望逻辑身份 → 槽位
    values: IndexMap<String, ExpectationId>,
}

impl Branch {
    /// 由声明计算分支 id；必填标记参与哈希，`[*]User@x` 与 `User@x` 是两个分支
    pub fn content_id(declarations: &[Expectation]) -> BranchId {
        content_hash(declarations.iter().map(|e| {
            format!("{}{}", if e.required { "*" } else { "" }, e.label())
        }))
    }

    fn declare(network: &mut ExpectationNetwork, declarations: Vec<Expectation>) -> Self {
        let id = Self::content_id(&declarations);
        let mut intents = IndexMap::new();
        let mut values = IndexMap::new();
        for expectation in declarations {
            match expectation.tag().map(str::to_string) {
                Some(tag) => {
                    if !intents.contains_key(&tag) {
                        intents.insert(tag, network.insert(expectation));
                    }
                }
                None => {
                    let key = expectation.key();
                    if !values.contains_key(&key) {
                        values.insert(key, network.insert(expectation));
                    }
                }
            }
        }
        Self {
            id,
            intents,
            values,
        }
    }

    pub fn members(&self) -> impl Iterator<Item = ExpectationId> + '_ {
        self.intents.values().chain(self.values.values()).copied()
    }

    pub fn intent_slots(&self) -> impl Iterator<Item = (&str, ExpectationId)> {
        self.intents.iter().map(|(tag, id)| (tag.as_str(), *id))
    }

    pub fn value_slots(&self) -> impl Iterator<Item = ExpectationId> + '_ {
        self.values.values().copied()
    }

    pub fn intent_tags(&self) -> impl Iterator<Item = &str> {
        self.intents.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty() && self.values.is_empty()
    }

    /// 所有成员都完成
    pub fn done(&self, network: &ExpectationNetwork) -> bool {
        self.members().all(|id| network.is_done(id))
    }

    /// 已完成的成员数
    pub fn score(&self, network: &ExpectationNetwork) -> usize {
        self.members().filter(|id| network.is_done(*id)).count()
    }

    /// 分支的全部意图都在集合里时返回分数（意图个数）；集合为空时不满足
    pub fn match_score(&self, intents: &[String]) -> Option<usize> {
        if intents.is_empty() {
            return None;
        }
        self.intents
            .keys()
            .all(|tag| intents.contains(tag))
            .then_some(self.intents.len())
    }

    /// 只等待“用户发了消息”这一个意图
    pub fn only_has_message(&self) -> bool {
        self.intents.len() == 1 && self.intents.contains_key(USER_HAS_MESSAGE)
    }

    /// 为每个实体找实体类型交集最大的值期望（并列取先遇到的）；
    /// 有任何匹配时追加 `User@provide_data` 意图
    pub fn validate(
        &self,
        network: &ExpectationNetwork,
        intents: &[String],
        entities: &[Entity],
    ) -> Validation {
        let mut matches = Vec::new();
        for (entity_idx, entity) in entities.iter().enumerate() {
            let labels = entity.label_set();
            let mut best: Option<(ExpectationId, usize)> = None;
            for slot in self.value_slots() {
                let Some(expectation) = network.get(slot) else {
                    continue;
                };
                let overlap = expectation.entity_overlap(&labels);
                if overlap > best.map_or(0, |(_, s)| s) {
                    best = Some((slot, overlap));
                }
            }
            if let Some((slot, _)) = best {
                matches.push((slot, entity_idx));
            }
        }

        let mut intents = intents.to_vec();
        if !matches.is_empty() && !intents.iter().any(|t| t == USER_PROVIDE_DATA) {
            intents.push(USER_PROVIDE_DATA.to_string());
        }
        let matched_intents = self
            .intents
            .keys()
            .filter(|tag| intents.contains(tag))
            .cloned()
            .collect();
        Validation {
            matched_intents,
            matches,
            intents,
        }
    }

    /// 复位所有成员（规则见 `Expectation::refresh`）
    pub fn refresh(&self, network: &mut ExpectationNetwork) {
        for id in self.members() {
            network.refresh(id);
        }
    }
}

/// 按内容哈希去重的分支表，连同分支成员所在的期望 arena
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchRegistry {
    network: ExpectationNetwork,
    branches: IndexMap<BranchId, Branch>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得与声明相同的分支；不存在时分配槽位并登记
    pub fn intern(&mut self, declarations: Vec<Expectation>) -> BranchId {
        let id = Branch::content_id(&declarations);
        if !self.branches.contains_key(&id) {
            let branch = Branch::declare(&mut self.network, declarations);
            self.branches.insert(id.clone(), branch);
        }
        id
    }

    pub fn network(&self) -> &ExpectationNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut ExpectationNetwork {
        &mut self.network
    }

    pub fn get(&self, id: &str) -> Option<&Branch> {
        self.branches.get(id)
    }

    /// 未登记的分支视为未完成
    pub fn branch_done(&self, id: &str) -> bool {
        self.branches.get(id).is_some_and(|b| b.done(&self.network))
    }

    pub fn branch_score(&self, id: &str) -> usize {
        self.branches.get(id).map_or(0, |b| b.score(&self.network))
    }

    pub fn refresh_branch(&mut self, id: &str) {
        if let Some(branch) = self.branches.get(id) {
            branch.refresh(&mut self.network);
        }
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(schemas: &[&str]) -> Vec<Expectation> {
        schemas.iter().map(|s| Expectation::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_identical_declarations_are_shared() {
        let mut registry = BranchRegistry::new();
        let a = registry.intern(parse_all(&["User@greet", "User@phone=[PHONE]"]));
        let b = registry.intern(parse_all(&["User@greet", "User@phone=[PHONE]"]));
        let c = registry.intern(parse_all(&["*User@greet", "User@phone=[PHONE]"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.network().len(), 4);
    }

    #[test]
    fn test_done_is_all_members() {
        let mut registry = BranchRegistry::new();
        let id = registry.intern(parse_all(&["User@greet", "User@phone=[PHONE]"]));
        let members: Vec<_> = registry.get(&id).unwrap().members().collect();
        registry.network_mut().set_done(members[0], true);
        assert!(!registry.branch_done(&id));
        assert_eq!(registry.branch_score(&id), 1);
        registry.network_mut().set_done(members[1], true);
        assert!(registry.branch_done(&id));
        registry.refresh_branch(&id);
        // 意图复位，非必填值保留
        assert_eq!(registry.branch_score(&id), 1);
        assert!(!registry.branch_done("missing"));
    }

    #[test]
    fn test_validate_prefers_highest_overlap_then_first() {
        let mut registry = BranchRegistry::new();
        let id = registry.intern(parse_all(&[
            "User@provide_data",
            "User@city=[LOCATION]",
            "User@address=[ADDRESS,LOCATION]",
            "User@hometown=[ADDRESS,LOCATION]",
        ]));
        let branch = registry.get(&id).unwrap();
        let values: Vec<_> = branch.value_slots().collect();
        let entity = Entity::new("Hà Nội", "ADDRESS").with_labels(["LOCATION".to_string()]);
        let result = branch.validate(registry.network(), &["User@has_message".to_string()], &[entity]);
        assert_eq!(result.matches, vec![(values[1], 0)]);
        assert!(result.intents.contains(&USER_PROVIDE_DATA.to_string()));
        assert_eq!(result.matched_intents, vec![USER_PROVIDE_DATA.to_string()]);
    }

    #[test]
    fn test_validate_without_match_keeps_intents() {
        let mut registry = BranchRegistry::new();
        let id = registry.intern(parse_all(&["User@phone=[PHONE]"]));
        let branch = registry.get(&id).unwrap();
        let result = branch.validate(registry.network(), &[], &[Entity::new("x", "COLOR")]);
        assert!(result.matches.is_empty());
        assert!(result.intents.is_empty());
    }

    #[test]
    fn test_match_score_and_message_only() {
        let mut registry = BranchRegistry::new();
        let id = registry.intern(parse_all(&[USER_HAS_MESSAGE]));
        let branch = registry.get(&id).unwrap();
        assert!(branch.only_has_message());
        assert_eq!(branch.match_score(&[]), None);
        assert_eq!(branch.match_score(&[USER_HAS_MESSAGE.to_string()]), Some(1));
        assert_eq!(branch.match_score(&["User@greet".to_string()]), None);
    }
}
