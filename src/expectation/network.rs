//! 期望（前置条件）与期望网络
//!
//! 期望有两种：
//! - 意图期望：消息里出现某个意图标签即满足
//! - 值期望：抽取到的实体标签与期望的实体类型有交集，且值被写入对应属性即满足
//!
//! 所有期望实例放在 `ExpectationNetwork` 这个 arena 里，用下标引用；
//! 非必填实例之间按逻辑身份建立无向邻接，满足其中一个会沿邻接把“完成”传播出去。

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::error::ScriptError;
use crate::core::ids::content_hash;
use crate::intents::{subject_of, BOT_SUBJECT};

/// arena 下标
pub type ExpectationId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectationKind {
    Intent {
        tag: String,
    },
    Value {
        subject: String,
        attribute: String,
        entity_types: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub kind: ExpectationKind,
    pub required: bool,
    pub done: bool,
    #[serde(default)]
    neighbours: BTreeSet<ExpectationId>,
}

impl Expectation {
    pub fn intent(tag: impl Into<String>, required: bool) -> Self {
        Self {
            kind: ExpectationKind::Intent { tag: tag.into() },
            required,
            done: false,
            neighbours: BTreeSet::new(),
        }
    }

    pub fn value(
        subject: impl Into<String>,
        attribute: impl Into<String>,
        entity_types: Vec<String>,
        required: bool,
    ) -> Self {
        Self {
            kind: ExpectationKind::Value {
                subject: subject.into(),
                attribute: attribute.into(),
                entity_types,
            },
            required,
            done: false,
            neighbours: BTreeSet::new(),
        }
    }

    /// 解析声明：`[*]Subject@tag` 或 `[*]Subject@attr=[TYPE1,TYPE2]`，前缀 `*` 表示必填
    pub fn parse(schema: &str) -> Result<Self, ScriptError> {
        let malformed = || ScriptError::MalformedExpectation(schema.to_string());
        let trimmed = schema.trim();
        let (required, body) = match trimmed.strip_prefix('*') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };

        match body.split_once('=') {
            Some((lhs, rhs)) => {
                let (subject, attribute) = lhs.trim().split_once('@').ok_or_else(malformed)?;
                let types = rhs
                    .trim()
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(malformed)?;
                let entity_types: Vec<String> = types
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                if subject.is_empty() || attribute.is_empty() || entity_types.is_empty() {
                    return Err(malformed());
                }
                Ok(Self::value(subject, attribute, entity_types, required))
            }
            None => match body.split_once('@') {
                Some((subject, name)) if !subject.is_empty() && !name.is_empty() => {
                    Ok(Self::intent(body, required))
                }
                _ => Err(malformed()),
            },
        }
    }

    /// 逻辑身份：同标签的意图、或同主语+属性+类型集合的值期望视为同一个
    pub fn key(&self) -> String {
        match &self.kind {
            ExpectationKind::Intent { tag } => content_hash(["intent", tag.as_str()]),
            ExpectationKind::Value {
                subject,
                attribute,
                entity_types,
            } => {
                let mut types = entity_types.clone();
                types.sort();
                let types = types.join(",");
                content_hash(["value", subject.as_str(), attribute.as_str(), types.as_str()])
            }
        }
    }

    /// 声明形式（不含 `*`）
    pub fn label(&self) -> String {
        match &self.kind {
            ExpectationKind::Intent { tag } => tag.clone(),
            ExpectationKind::Value {
                subject,
                attribute,
                entity_types,
            } => format!("{subject}@{attribute}=[{}]", entity_types.join(",")),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            ExpectationKind::Intent { tag } => Some(tag),
            ExpectationKind::Value { .. } => None,
        }
    }

    pub fn attribute(&self) -> Option<&str> {
        match &self.kind {
            ExpectationKind::Value { attribute, .. } => Some(attribute),
            ExpectationKind::Intent { .. } => None,
        }
    }

    pub fn subject(&self) -> &str {
        match &self.kind {
            ExpectationKind::Intent { tag } => subject_of(tag),
            ExpectationKind::Value { subject, .. } => subject,
        }
    }

    pub fn is_intent(&self) -> bool {
        matches!(self.kind, ExpectationKind::Intent { .. })
    }

    pub fn is_bot_intent(&self) -> bool {
        self.is_intent() && self.subject() == BOT_SUBJECT
    }

    /// 实体标签与期望类型的交集大小；意图期望恒为 0
    pub fn entity_overlap(&self, labels: &[&str]) -> usize {
        match &self.kind {
            ExpectationKind::Value { entity_types, .. } => entity_types
                .iter()
                .filter(|t| labels.contains(&t.as_str()))
                .count(),
            ExpectationKind::Intent { .. } => 0,
        }
    }

    pub fn neighbours(&self) -> impl Iterator<Item = ExpectationId> + '_ {
        self.neighbours.iter().copied()
    }

    /// 意图期望总是复位；值期望只有必填的才复位（非必填的值一旦拿到就一直有效）
    fn refresh(&mut self) {
        if self.is_intent() || self.required {
            self.done = false;
        }
    }
}

/// 期望 arena：按下标存放所有实例，邻接关系存成下标集合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectationNetwork {
    slots: Vec<Expectation>,
}

impl ExpectationNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, expectation: Expectation) -> ExpectationId {
        self.slots.push(expectation);
        self.slots.len() - 1
    }

    pub fn get(&self, id: ExpectationId) -> Option<&Expectation> {
        self.slots.get(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExpectationId, &Expectation)> {
        self.slots.iter().enumerate()
    }

    pub fn is_done(&self, id: ExpectationId) -> bool {
        self.slots.get(id).is_some_and(|e| e.done)
    }

    pub fn is_required(&self, id: ExpectationId) -> bool {
        self.slots.get(id).is_some_and(|e| e.required)
    }

    /// 建立无向邻接；只在两个不同的非必填实例之间生效
    pub fn link(&mut self, a: ExpectationId, b: ExpectationId) -> bool {
        if a == b {
            return false;
        }
        let linkable = |slot: Option<&Expectation>| slot.is_some_and(|e| !e.required);
        if !linkable(self.slots.get(a)) || !linkable(self.slots.get(b)) {
            return false;
        }
        self.slots[a].neighbours.insert(b);
        self.slots[b].neighbours.insert(a);
        true
    }

    /// 把给定实例里逻辑身份相同的非必填实例两两相连
    pub fn link_equivalents(&mut self, ids: impl IntoIterator<Item = ExpectationId>) {
        let mut groups: HashMap<String, Vec<ExpectationId>> = HashMap::new();
        for id in ids {
            if let Some(e) = self.slots.get(id) {
                if !e.required {
                    groups.entry(e.key()).or_default().push(id);
                }
            }
        }
        for members in groups.values() {
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    self.link(*a, *b);
                }
            }
        }
    }

    /// 直接设置状态，不传播
    pub fn set_done(&mut self, id: ExpectationId, done: bool) {
        if let Some(e) = self.slots.get_mut(id) {
            e.done = done;
        }
    }

    /// 深度优先沿邻接传播状态；已访问的跳过，必填实例不接受传播
    pub fn forward_done_signal(
        &mut self,
        id: ExpectationId,
        done: bool,
        visited: &mut HashSet<ExpectationId>,
    ) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(slot) = self.slots.get_mut(current) else {
                continue;
            };
            if !slot.required {
                slot.done = done;
            }
            stack.extend(slot.neighbours.iter().rev().filter(|n| !visited.contains(*n)));
        }
    }

    /// 标记完成并传播到所有等价实例
    pub fn mark_done(&mut self, id: ExpectationId) {
        self.set_done(id, true);
        self.forward_done_signal(id, true, &mut HashSet::new());
    }

    pub fn refresh(&mut self, id: ExpectationId) {
        if let Some(e) = self.slots.get_mut(id) {
            e.refresh();
        }
    }
}
