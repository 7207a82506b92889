//! 可观测性：tracing 订阅器初始化
//!
//! RUST_LOG 优先；未设置时使用传入的默认级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_level("info");
}

/// 以 `level` 为默认级别安装 fmt 订阅器；重复调用时静默忽略
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
