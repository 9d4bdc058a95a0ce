//! 消息与 NLU 结果
//!
//! 意图与实体由外部 NLU 服务给出，这里只负责承载和增删；引擎本身不做任何文本理解。

use serde::{Deserialize, Serialize};

use crate::intents::is_user_tag;

/// 一个意图标签，可带置信度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub tag: String,
    #[serde(default = "default_score")]
    pub score: f32,
}

fn default_score() -> f32 {
    1.0
}

impl Intent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            score: default_score(),
        }
    }
}

/// 抽取出的实体：文本片段、主标签、候选标签、可选的归一化值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub begin: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(default)]
    pub value: Option<String>,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            end: text.chars().count(),
            text,
            label: label.into(),
            labels: Vec::new(),
            begin: 0,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// 主标签 + 候选标签（去重）
    pub fn label_set(&self) -> Vec<&str> {
        let mut out = vec![self.label.as_str()];
        for label in &self.labels {
            if !out.contains(&label.as_str()) {
                out.push(label);
            }
        }
        out
    }

    /// 写入图时使用的值：优先归一化值
    pub fn parsed_value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.text)
    }
}

/// 一条用户消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub intents: Vec<Intent>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub created_at: i64,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: new_message_id(),
            text: None,
            intents: Vec::new(),
            entities: Vec::new(),
            created_at: crate::graph::now_millis(),
        }
    }
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, tag: impl Into<String>) -> Self {
        self.add_intent(tag);
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn intent_tags(&self) -> Vec<String> {
        self.intents.iter().map(|i| i.tag.clone()).collect()
    }

    pub fn has_intent(&self, tag: &str) -> bool {
        self.intents.iter().any(|i| i.tag == tag)
    }

    pub fn add_intent(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.has_intent(&tag) {
            self.intents.push(Intent::new(tag));
        }
    }

    /// 合入新意图（已有的跳过）
    pub fn update_intents<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.add_intent(tag);
        }
    }

    pub fn drop_intents(&mut self, tags: &[&str]) {
        self.intents.retain(|i| !tags.contains(&i.tag.as_str()));
    }

    /// 去掉所有 `User@` 意图（进入新任务后，旧消息的用户意图不应再次生效）
    pub fn drop_user_intents(&mut self) {
        self.intents.retain(|i| !is_user_tag(&i.tag));
    }

    /// 内容是否相同（文本 + 意图 + 实体），用于待处理队列去重
    pub fn same_content(&self, other: &Message) -> bool {
        self.text == other.text && self.intents == other.intents && self.entities == other.entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_updates_are_deduplicated() {
        let mut m = Message::new("hi").with_intent("User@greet");
        m.update_intents(["User@greet", "Bot@user_missing_info_address"]);
        assert_eq!(m.intents.len(), 2);
        m.drop_user_intents();
        assert_eq!(m.intent_tags(), vec!["Bot@user_missing_info_address"]);
        m.drop_intents(&["Bot@user_missing_info_address"]);
        assert!(m.intents.is_empty());
    }

    #[test]
    fn test_entity_labels_and_value() {
        let e = Entity::new("Hà Nội", "ADDRESS")
            .with_labels(["LOCATION".to_string(), "ADDRESS".to_string()])
            .with_value("ha noi");
        assert_eq!(e.label_set(), vec!["ADDRESS", "LOCATION"]);
        assert_eq!(e.parsed_value(), "ha noi");
        assert_eq!(Entity::new("x", "Y").parsed_value(), "x");
    }

    #[test]
    fn test_same_content_ignores_id() {
        let a = Message::new("hello").with_intent("User@greet");
        let b = Message::new("hello").with_intent("User@greet");
        assert_ne!(a.id, b.id);
        assert!(a.same_content(&b));
    }
}
