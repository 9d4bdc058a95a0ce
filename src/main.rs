//! Bee Dialog 命令行入口
//!
//! 从 stdin 逐行读取 JSON 请求 `{"user_id": "...", "shop_id": "...", "message": {...}}`，
//! 每行输出一条 JSON 回复。脚本路径取第一个命令行参数，否则取配置 `[app] script_path`。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bee_dialog::{
    config::load_config,
    engine::{BotIntents, DialogueController, HookRegistry, TemplateRenderer, TurnProcessor},
    graph::{NodeSchema, SchemaCache, StaticSchemaSource},
    observability,
    storage::JsonFileStore,
    Message, Script,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct Request {
    user_id: String,
    shop_id: String,
    message: Message,
    /// 为 true 时先清空该会话
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Serialize)]
struct Reply<'a> {
    user_id: &'a str,
    shop_id: &'a str,
    response: String,
}

fn load_schemas(path: &Path) -> anyhow::Result<Vec<NodeSchema>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let schemas = serde_json::from_str(&text).context("Invalid schema file")?;
    Ok(schemas)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let script_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| cfg.app.script_path.clone())
        .unwrap_or_else(|| PathBuf::from("scripts/shop.json"));
    let script = Script::from_path(&script_path)
        .with_context(|| format!("Failed to load script {}", script_path.display()))?;

    let schemas = Arc::new(SchemaCache::new(cfg.schema.ttl()));
    let cancel = CancellationToken::new();
    let refresher = match cfg.schema.path {
        Some(ref path) => {
            let extra = load_schemas(path)?;
            for schema in &extra {
                schemas.insert(schema.clone())?;
            }
            let source = Arc::new(StaticSchemaSource::new(extra));
            Some(schemas.clone().spawn_refresh(source, cfg.schema.refresh_interval(), cancel.clone()))
        }
        None => None,
    };

    let processor = TurnProcessor::new(
        HookRegistry::with_defaults(),
        TemplateRenderer::new(),
        cfg.processor_settings(),
    )
    .with_bot_intents(BotIntents::new(cfg.graph.mention_window_ms()));
    let store = Arc::new(JsonFileStore::new(cfg.app.data_dir()));
    let controller = DialogueController::new(script, schemas, store)?
        .with_processor(processor)
        .with_settings(cfg.controller_settings());
    tracing::info!(
        name = cfg.app.name.as_deref().unwrap_or("bee-dialog"),
        script = %controller.script().name,
        "ready, reading requests from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("invalid request: {}", e);
                continue;
            }
        };
        if request.refresh {
            if let Err(e) = controller.refresh_conversation(&request.user_id, &request.shop_id).await {
                tracing::warn!(user_id = %request.user_id, "refresh failed: {}", e);
            }
        }
        let response = controller
            .handle(&request.user_id, &request.shop_id, request.message)
            .await;
        let reply = Reply {
            user_id: &request.user_id,
            shop_id: &request.shop_id,
            response,
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    cancel.cancel();
    if let Some(handle) = refresher {
        if let Err(e) = handle.await {
            tracing::warn!("schema refresher ended abnormally: {}", e);
        }
    }
    Ok(())
}
