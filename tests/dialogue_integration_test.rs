//! 对话引擎集成测试

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use bee_dialog::core::ScriptError;
    use bee_dialog::engine::{DialogueController, HookRegistry, ProcessorSettings, TemplateRenderer, TurnProcessor};
    use bee_dialog::graph::{BillStatus, SchemaCache};
    use bee_dialog::storage::{ConversationStore, JsonFileStore, MemoryStore};
    use bee_dialog::{Entity, Message, Script};

    fn shop_script() -> Script {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scripts/shop.json");
        Script::from_path(&path).unwrap()
    }

    fn controller(store: Arc<dyn ConversationStore>) -> DialogueController {
        let processor = TurnProcessor::new(
            HookRegistry::with_defaults(),
            TemplateRenderer::new(),
            ProcessorSettings::default(),
        );
        DialogueController::new(shop_script(), Arc::new(SchemaCache::default()), store)
            .unwrap()
            .with_processor(processor)
    }

    fn hello() -> Message {
        Message::new("alo shop").with_intent("User@has_message")
    }

    #[tokio::test]
    async fn test_full_order_flow_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let controller = controller(store.clone());

        let r1 = controller.handle("u1", "s1", hello()).await;
        assert_eq!(r1, "Chào bạn, shop có thể giúp gì ạ?*Cho shop xin địa chỉ nhận hàng ạ");

        let address = Message::new("giao về 12 Láng Hạ").with_entity(Entity::new("12 Láng Hạ", "ADDRESS"));
        let r2 = controller.handle("u1", "s1", address).await;
        assert_eq!(r2, "Shop giao tới 12 Láng Hạ nhé*Cho shop xin số điện thoại ạ");

        let phone = Message::new("0912345678").with_entity(Entity::new("0912345678", "PHONE"));
        let r3 = controller.handle("u1", "s1", phone).await;
        assert_eq!(r3, "Bạn xác nhận đơn giao tới 12 Láng Hạ, số 0912345678 nhé?");

        let saved = store.load("u1", "s1").await.unwrap().unwrap();
        assert_eq!(saved.current_task_name(), Some("confirm"));
        let bill = saved.graph().bill().unwrap();
        assert_eq!(bill.last_attr_value("phone_number").as_deref(), Some("0912345678"));

        let confirm = Message::new("ok em").with_intent("User@confirm");
        let r4 = controller.handle("u1", "s1", confirm).await;
        assert_eq!(r4, "Shop đã lên đơn ạ*Cảm ơn bạn đã ủng hộ shop ạ");

        // 目标完成：Turn 清空，已确认的账单与用户信息保留
        let saved = store.load("u1", "s1").await.unwrap().unwrap();
        assert!(saved.turns().is_empty());
        let confirmed = saved.graph().confirmed_bills();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].bill_status(), Some(BillStatus::Confirmed));
        let user = saved.graph().user().unwrap();
        assert_eq!(user.last_attr_value("address").as_deref(), Some("12 Láng Hạ"));
    }

    #[tokio::test]
    async fn test_script_entry_point_switches_turn() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store.clone());

        // 第一条消息总是进入默认配置
        let r1 = controller
            .handle("u1", "s1", Message::new("muốn đặt hàng").with_intent("User@order"))
            .await;
        assert_eq!(r1, "");
        let saved = store.load("u1", "s1").await.unwrap().unwrap();
        assert_eq!(saved.current_turn().unwrap().config, "greeting");

        let r2 = controller
            .handle("u1", "s1", Message::new("đặt hàng").with_intent("User@order"))
            .await;
        assert_eq!(r2, "Cho shop xin địa chỉ nhận hàng ạ");
        let saved = store.load("u1", "s1").await.unwrap().unwrap();
        assert_eq!(saved.current_turn().unwrap().config, "order");
        assert_eq!(saved.current_task_name(), Some("ask_address"));
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(controller(store.clone()));

        let (a, b) = tokio::join!(
            controller.handle("u1", "s1", hello()),
            controller.handle("u2", "s1", hello())
        );
        assert_eq!(a, b);
        assert_eq!(store.len().await, 2);

        let address = Message::new("Hà Nội").with_entity(Entity::new("Hà Nội", "ADDRESS"));
        controller.handle("u1", "s1", address).await;
        let u1 = store.load("u1", "s1").await.unwrap().unwrap();
        let u2 = store.load("u2", "s1").await.unwrap().unwrap();
        assert_eq!(u1.current_task_name(), Some("ask_phone"));
        assert_eq!(u2.current_task_name(), Some("ask_address"));
        assert!(u2.graph().user().unwrap().get_attr("address").is_empty());
    }

    #[test]
    fn test_last_declared_branch_wins_tie() {
        let script = Script::from_json_str(
            r#"{
                "name": "tie",
                "entry_points": [{"tag": "default", "targets": ["chat"]}],
                "task_configs": {
                    "chat": {
                        "tasks": {
                            "BEGIN": {
                                "passable": true,
                                "expectations": {"intents": ["User@confirm"], "responses": ["default"], "next_tasks": ["DONE"]},
                                "branches": [
                                    {"intents": ["User@yes"], "responses": ["first"], "next_tasks": ["DONE"]},
                                    {"intents": ["User@ok"], "responses": ["second"], "next_tasks": ["DONE"]}
                                ]
                            },
                            "DONE": {}
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let controller =
            DialogueController::new(script, Arc::new(SchemaCache::default()), Arc::new(MemoryStore::new())).unwrap();
        let mut conv = controller.new_conversation("u1", "s1");
        let message = Message::new("ok ok").with_intent("User@yes").with_intent("User@ok");
        assert_eq!(controller.process_message(&mut conv, message), "Second");
        assert!(conv.current_turn().unwrap().done());
    }

    #[test]
    fn test_malformed_scripts_fail_to_load() {
        let dangling = r#"{
            "name": "bad",
            "entry_points": [{"tag": "default", "targets": ["chat"]}],
            "task_configs": {"chat": {"tasks": {"BEGIN": {"expectations": {"next_tasks": ["nowhere"]}}}}}
        }"#;
        assert!(matches!(
            Script::from_json_str(dangling),
            Err(ScriptError::UnknownNextTask { ref target, .. }) if target == "nowhere"
        ));

        let no_default = r#"{
            "name": "bad",
            "entry_points": [{"tag": "User@hi", "targets": ["chat"]}],
            "task_configs": {"chat": {"tasks": {"BEGIN": {}}}}
        }"#;
        assert_eq!(
            Script::from_json_str(no_default).unwrap_err(),
            ScriptError::MissingDefaultEntryPoint("bad".to_string())
        );

        let bad_value = r#"{
            "name": "bad",
            "entry_points": [{"tag": "default", "targets": ["chat"]}],
            "task_configs": {"chat": {"tasks": {"BEGIN": {"expectations": {"values": ["User@address"]}}}}}
        }"#;
        assert!(matches!(
            Script::from_json_str(bad_value),
            Err(ScriptError::MalformedExpectation(_))
        ));
    }
}
