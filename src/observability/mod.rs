//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 info 级别，`RUST_LOG` 可追加指令（如 `RUST_LOG=bee_dialog::engine=debug`）
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
