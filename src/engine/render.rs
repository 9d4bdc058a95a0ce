//! 回复模板渲染
//!
//! 模板里的 `{Subject@attr}` 由解析器取值，再按任务配置的 info_mapping 套一层模板：
//! `{"User@gender": {"male": "anh", "default": "bạn"}}`。
//! 替换结果里可能又出现新的占位符，最多迭代 `max_passes` 轮。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use indexmap::IndexSet;
use regex::Regex;

use crate::dialogue::TaskConfig;
use crate::graph::SubGraph;
use crate::intents::subject_of;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"\{(\S+?)\}").unwrap())
}

/// 占位符取值函数：(子图, 占位键) → 值
pub type Resolver = Arc<dyn Fn(&SubGraph, &str) -> Option<String> + Send + Sync>;

/// 主语节点上该属性最近的值
fn subject_attribute(graph: &SubGraph, key: &str) -> Option<String> {
    let (subject, attr) = key.split_once('@')?;
    let id = graph.node_for_subject(subject)?;
    graph.graph().node(&id)?.last_attr_value(attr)
}

#[derive(Clone)]
pub struct TemplateRenderer {
    resolvers: HashMap<String, Resolver>,
    max_passes: usize,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        let mut renderer = Self {
            resolvers: HashMap::new(),
            max_passes: 5,
        };
        for subject in ["User", "Shop", "Bill", "Weather"] {
            renderer.register(format!("{subject}@*"), subject_attribute);
        }
        renderer
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.resolvers.keys().collect();
        keys.sort();
        f.debug_struct("TemplateRenderer")
            .field("resolvers", &keys)
            .field("max_passes", &self.max_passes)
            .finish()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// 注册解析器：键为精确的 `Subject@attr`，或 `Subject@*` 匹配同主语的所有属性
    pub fn register<F>(&mut self, key: impl Into<String>, resolver: F)
    where
        F: Fn(&SubGraph, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.resolvers.insert(key.into(), Arc::new(resolver));
    }

    fn resolver_for(&self, key: &str) -> Option<&Resolver> {
        if let Some(resolver) = self.resolvers.get(key) {
            return Some(resolver);
        }
        let wildcard = format!("{}@*", subject_of(key));
        self.resolvers.get(&wildcard)
    }

    fn resolve(&self, key: &str, graph: &SubGraph, config: Option<&TaskConfig>) -> String {
        let value = self
            .resolver_for(key)
            .and_then(|resolve| resolve(graph, key))
            .unwrap_or_default();
        let Some((mapping, mapped_key)) = config.and_then(|c| c.info_mapping_for(key)) else {
            return value;
        };
        let Some(template) = mapping.get(&value).or_else(|| mapping.get("default")) else {
            return value;
        };
        let token = format!("{{{key}}}");
        template.replace(mapped_key, key).replace(&token, &value)
    }

    /// 渲染模板；取不到值的占位符替换为空
    pub fn render(&self, template: &str, graph: &SubGraph, config: Option<&TaskConfig>) -> String {
        let mut text = template.to_string();
        for _ in 0..self.max_passes {
            let keys: IndexSet<String> = token_re()
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .collect();
            if keys.is_empty() {
                break;
            }
            for key in keys {
                let value = self.resolve(&key, graph, config);
                text = text.replace(&format!("{{{key}}}"), &value);
            }
        }
        text
    }
}
