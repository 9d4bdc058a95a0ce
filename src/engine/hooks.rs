//! Hook 注册表
//!
//! 任务的前置 / 后置动作与分支的后置动作都是意图标签，由 `HookRegistry` 按标签查找实现并执行。
//! Hook 可以修改会话子图和当前消息的意图，但不推进任务栈。

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::{now_millis, BillStatus, SubGraph};
use crate::intents::{
    with_attr, BOT_BILL_MISSING_INFO, BOT_CANCEL_BILL, BOT_CONFIRM_BILL, BOT_PROCESS_BILL,
    BOT_UPDATE_BILL_ADDRESS, BOT_UPDATE_BILL_PHONE_NUMBER, BOT_UPDATE_USER_ATTRIBUTE_STATUS,
};
use crate::message::Message;

use super::bot_intents::user_attribute_status;

/// Hook 执行时可见的状态
pub struct HookContext<'a> {
    pub graph: &'a mut SubGraph,
    /// 当前 Turn 的消息
    pub message: &'a mut Message,
    /// 任务配置名
    pub config: &'a str,
    /// 当前任务名
    pub task: &'a str,
}

/// Hook trait：标签 + 同步执行（核心流程不做 I/O）
pub trait Hook: Send + Sync {
    /// 触发该 hook 的意图标签，如 `Bot@confirm_bill`
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn call(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()>;
}

/// 闭包形式的 hook
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        (self.f)(ctx)
    }
}

/// 把用户各属性的状态写成 `Bot@` 意图加到当前消息上
pub struct UpdateUserAttributeStatus;

impl Hook for UpdateUserAttributeStatus {
    fn name(&self) -> &str {
        BOT_UPDATE_USER_ATTRIBUTE_STATUS
    }

    fn description(&self) -> &str {
        "add user attribute status intents to the current message"
    }

    fn call(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        let intents = user_attribute_status(ctx.graph);
        ctx.message.update_intents(intents);
        Ok(())
    }
}

/// 修改当前账单的状态；还没有账单时先建一张
pub struct SetBillStatus {
    tag: &'static str,
    status: BillStatus,
}

impl SetBillStatus {
    pub fn new(tag: &'static str, status: BillStatus) -> Self {
        Self { tag, status }
    }
}

impl Hook for SetBillStatus {
    fn name(&self) -> &str {
        self.tag
    }

    fn call(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        let bill_id = match ctx.graph.bill_id() {
            Some(id) => id,
            None => ctx.graph.init_bill(),
        };
        let now = now_millis();
        let graph = ctx.graph.graph_mut();
        graph.mention(&bill_id, now);
        let node = graph
            .node_mut(&bill_id)
            .ok_or_else(|| anyhow::anyhow!("bill {bill_id} disappeared"))?;
        node.set_bill_status(self.status, now);
        tracing::info!(bill = %bill_id, status = ?self.status, "bill status updated");
        Ok(())
    }
}

/// 把用户（其次店铺）最近的属性值抄到当前账单上
pub struct UpdateBillInfo {
    tag: &'static str,
    attribute: &'static str,
}

impl UpdateBillInfo {
    pub fn new(tag: &'static str, attribute: &'static str) -> Self {
        Self { tag, attribute }
    }
}

impl Hook for UpdateBillInfo {
    fn name(&self) -> &str {
        self.tag
    }

    fn call(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        let value = ctx
            .graph
            .user()
            .and_then(|u| u.last_attr_value(self.attribute))
            .or_else(|| ctx.graph.shop().and_then(|s| s.last_attr_value(self.attribute)));
        let (Some(value), Some(bill_id)) = (value, ctx.graph.bill_id()) else {
            return Ok(());
        };
        let graph = ctx.graph.graph_mut();
        graph.mention(&bill_id, now_millis());
        graph.set_attr(&bill_id, self.attribute, Some(&value), true);
        let missing = with_attr(BOT_BILL_MISSING_INFO, self.attribute);
        ctx.message.drop_intents(&[missing.as_str()]);
        Ok(())
    }
}

/// 按标签存放 hook，支持 register / get / run / hook_names
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带内置 hook 的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(UpdateUserAttributeStatus);
        registry.register(SetBillStatus::new(BOT_CONFIRM_BILL, BillStatus::Confirmed));
        registry.register(SetBillStatus::new(BOT_PROCESS_BILL, BillStatus::Processing));
        registry.register(SetBillStatus::new(BOT_CANCEL_BILL, BillStatus::Canceled));
        registry.register(UpdateBillInfo::new(BOT_UPDATE_BILL_ADDRESS, "address"));
        registry.register(UpdateBillInfo::new(BOT_UPDATE_BILL_PHONE_NUMBER, "phone_number"));
        registry
    }

    /// 注册；同名 hook 后者覆盖前者
    pub fn register(&mut self, hook: impl Hook + 'static) {
        let name = hook.name().to_string();
        if self.hooks.insert(name.clone(), Arc::new(hook)).is_some() {
            tracing::debug!(hook = %name, "hook replaced");
        }
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(FnHook::new(name, f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.keys().cloned().collect();
        names.sort();
        names
    }

    /// 依次执行标签对应的 hook。未注册的标签和执行失败只记日志。返回成功执行的个数
    pub fn run(&self, tags: &[String], ctx: &mut HookContext<'_>) -> usize {
        let mut executed = 0;
        for tag in tags {
            let Some(hook) = self.hooks.get(tag) else {
                tracing::warn!(hook = %tag, config = ctx.config, task = ctx.task, "hook not implemented");
                continue;
            };
            match hook.call(ctx) {
                Ok(()) => executed += 1,
                Err(e) => {
                    tracing::warn!(hook = %tag, config = ctx.config, task = ctx.task, error = %e, "hook failed")
                }
            }
        }
        executed
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hook_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeSchema, SchemaCache};

    fn subgraph() -> SubGraph {
        let cache = SchemaCache::default();
        cache
            .insert(NodeSchema {
                class: "User".into(),
                required_attributes: vec!["address".into()],
                attributes: vec!["phone_number".into()],
                ..Default::default()
            })
            .unwrap();
        SubGraph::new("s:u", "Demo", Arc::new(cache))
    }

    fn run(registry: &HookRegistry, graph: &mut SubGraph, message: &mut Message, tags: &[&str]) -> usize {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let mut ctx = HookContext {
            graph,
            message,
            config: "order",
            task: "confirm",
        };
        registry.run(&tags, &mut ctx)
    }

    #[test]
    fn test_unknown_and_failing_hooks_are_skipped() {
        let mut registry = HookRegistry::with_defaults();
        registry.register_fn("Bot@explode", |_| anyhow::bail!("boom"));
        registry.register_fn("Bot@tag_message", |ctx| {
            ctx.message.add_intent("Bot@tagged");
            Ok(())
        });
        let mut graph = subgraph();
        let mut message = Message::default();
        let executed = run(
            &registry,
            &mut graph,
            &mut message,
            &["Bot@missing", "Bot@explode", "Bot@tag_message"],
        );
        assert_eq!(executed, 1);
        assert!(message.has_intent("Bot@tagged"));
    }

    #[test]
    fn test_bill_hooks() {
        let registry = HookRegistry::with_defaults();
        let mut graph = subgraph();
        let user_id = graph.user_id().to_string();
        graph.graph_mut().set_attr(&user_id, "address", Some("Hà Nội"), true);
        let mut message = Message::default().with_intent("Bot@bill_missing_info_address");

        run(
            &registry,
            &mut graph,
            &mut message,
            &[BOT_UPDATE_BILL_ADDRESS, BOT_CONFIRM_BILL],
        );
        let bill = graph.bill().unwrap();
        assert_eq!(bill.last_attr_value("address").as_deref(), Some("Hà Nội"));
        assert_eq!(bill.bill_status(), Some(BillStatus::Confirmed));
        assert!(message.intents.is_empty());
    }

    #[test]
    fn test_user_attribute_status_hook() {
        let registry = HookRegistry::with_defaults();
        let mut graph = subgraph();
        let user_id = graph.user_id().to_string();
        graph.graph_mut().set_attr(&user_id, "phone_number", Some("0901"), true);
        let mut message = Message::default();
        run(&registry, &mut graph, &mut message, &[BOT_UPDATE_USER_ATTRIBUTE_STATUS]);
        assert!(message.has_intent("Bot@user_missing_info_address"));
        assert!(message.has_intent("Bot@user_has_attribute_phone_number"));
        assert!(message.has_intent("Bot@user_has_one_phone_number"));
    }
}
