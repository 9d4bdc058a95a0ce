//! 节点名称模糊检索
//!
//! 两段式：
//! 1. 召回：别名的 1–3 字符 gram 建反向索引，每个查询取命中 gram 数最多的前 top_k 个别名
//! 2. 重打分：词级 gram 交集加权计数，常作为属性名出现的词权重低，最终只保留
//!    不低于最高分 keep_ratio 的节点，且最高分低于 min_score 时返回空

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use crate::graph::node::{Node, NodeId};
use crate::graph::text::{char_ngrams, weighted_overlap, word_ngrams};

/// 检索参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub top_k: usize,
    pub keep_ratio: f32,
    pub min_score: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 20,
            keep_ratio: 0.8,
            min_score: 0.2,
        }
    }
}

/// 别名反向索引 + 属性词权重
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    /// (所属节点, 别名)
    aliases: Vec<(NodeId, String)>,
    postings: HashMap<String, Vec<usize>>,
    by_node: HashMap<NodeId, Vec<usize>>,
    /// 词 gram → attr / (attr + node) 出现次数比
    term_weights: HashMap<String, f32>,
}

impl NameIndex {
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut index = NameIndex::default();
        let mut counts: HashMap<String, (u32, u32)> = HashMap::new();

        for node in nodes {
            for word in node.attribute_words() {
                for gram in word_ngrams(&word, 3) {
                    counts.entry(gram).or_default().0 += 1;
                }
            }
            for alias in node.aliases() {
                for gram in word_ngrams(&alias.replace('_', " "), 3) {
                    counts.entry(gram).or_default().1 += 1;
                }
                let slot = index.aliases.len();
                for gram in char_ngrams(&alias, 3) {
                    index.postings.entry(gram).or_default().push(slot);
                }
                index.by_node.entry(node.id.clone()).or_default().push(slot);
                index.aliases.push((node.id.clone(), alias));
            }
        }

        index.term_weights = counts
            .into_iter()
            .map(|(gram, (attr, node))| (gram, attr as f32 / (attr + node).max(1) as f32))
            .collect();
        index
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn term_weight(&self, gram: &str) -> f32 {
        self.term_weights.get(gram).copied().unwrap_or(0.0)
    }

    /// 召回阶段：按命中 gram 数取前 top_k 个别名，返回去重后的节点（保持召回顺序）
    fn recall(&self, queries: &[&str], top_k: usize) -> IndexSet<NodeId> {
        let mut hits = IndexSet::new();
        for query in queries {
            let mut counts: HashMap<usize, usize> = HashMap::new();
            for gram in char_ngrams(query, 3) {
                if let Some(slots) = self.postings.get(&gram) {
                    for slot in slots {
                        *counts.entry(*slot).or_default() += 1;
                    }
                }
            }
            let mut ranked: Vec<(usize, usize)> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for (slot, _) in ranked.into_iter().take(top_k) {
                hits.insert(self.aliases[slot].0.clone());
            }
        }
        hits
    }

    /// 检索并返回 (节点 id, 分数)，按分数降序
    pub fn search(&self, queries: &[&str], settings: &SearchSettings) -> Vec<(NodeId, f32)> {
        let candidates = self.recall(queries, settings.top_k);
        if candidates.is_empty() {
            return Vec::new();
        }

        let query_grams: Vec<HashSet<String>> =
            queries.iter().map(|q| word_ngrams(q, 1)).collect();
        let scored: Vec<(NodeId, f32)> = candidates
            .into_iter()
            .map(|node_id| {
                let best = self
                    .by_node
                    .get(&node_id)
                    .into_iter()
                    .flatten()
                    .flat_map(|slot| {
                        let alias_grams = word_ngrams(&self.aliases[*slot].1, 1);
                        query_grams
                            .iter()
                            .map(|q| weighted_overlap(q, &alias_grams, &self.term_weights))
                            .collect::<Vec<_>>()
                    })
                    .fold(0.0_f32, f32::max);
                (node_id, best)
            })
            .collect();

        let max_score = scored.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max);
        if max_score < settings.min_score {
            return Vec::new();
        }
        let floor = max_score * settings.keep_ratio;
        let mut kept: Vec<(NodeId, f32)> = scored.into_iter().filter(|(_, s)| *s >= floor).collect();
        kept.sort_by(|a, b| b.1.total_cmp(&a.1));
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = NameIndex::build(std::iter::empty());
        assert!(index.is_empty());
        assert!(index.search(&["shirt"], &SearchSettings::default()).is_empty());
    }

    #[test]
    fn test_attribute_words_are_down_weighted() {
        let mut shirt = Node::product("s", "red shirt", None);
        shirt.set_attr("red", Some("yes"), true);
        let index = NameIndex::build([&shirt]);
        // "red" 既是属性名又出现在别名里：1 / (1 + 1)
        assert!((index.term_weight("red") - 0.5).abs() < f32::EPSILON);
        assert_eq!(index.term_weight("shirt"), 0.0);
    }

    #[test]
    fn test_keeps_only_near_best_candidates() {
        let shirt = Node::product("s", "cotton shirt", None);
        let dress = Node::product("s", "silk dress", None);
        let index = NameIndex::build([&shirt, &dress]);
        let hits = index.search(&["cotton shirt"], &SearchSettings::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, shirt.id);
        assert!((hits[0].1 - 2.0).abs() < f32::EPSILON);
    }
}
