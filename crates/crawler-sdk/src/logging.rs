//! 日志初始化
//!
//! 安装 `tracing-subscriber` 的 fmt 输出，过滤规则优先取 `RUST_LOG`，
//! 并把 `log` 门面的记录桥接到 `tracing`。

use tracing_subscriber::EnvFilter;

/// 以 `info` 级别初始化日志
///
/// 返回本次调用是否安装了全局 subscriber（重复调用返回 `false`）。
pub fn init_logging() -> bool {
    init_logging_with("info")
}

/// 以指定的默认过滤规则初始化日志（如 `"crawler_control=debug,info"`）
pub fn init_logging_with(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    if tracing_log::LogTracer::init().is_ok() {
        log::debug!("log records are forwarded to tracing");
    }
    true
}
