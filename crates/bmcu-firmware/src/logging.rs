//! 日志初始化

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 存在时优先于 `filter`。`log` crate 的记录通过 `tracing-log`
/// 转发。重复调用是空操作，返回 `false`。
pub fn init_logging(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    if tracing_log::LogTracer::init().is_err() {
        debug!("log bridge already installed, keeping existing logger");
    }
    true
}
