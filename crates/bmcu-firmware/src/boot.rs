//! 启动模式判定

use bmcu_hal::BootSignal;
use bmcu_protocol::BootMode;
use tracing::info;

/// 决定本次启动的工作模式
///
/// 优先级：启动引脚 > 存储的模式 > 配置的默认模式。只在上电时调用一次。
pub fn init_boot_check<B: BootSignal + ?Sized>(
    signal: &mut B,
    stored: Option<BootMode>,
    default: BootMode,
) -> BootMode {
    let (mode, source) = match (signal.sample(), stored) {
        (Some(mode), _) => (mode, "boot signal"),
        (None, Some(mode)) => (mode, "stored settings"),
        (None, None) => (default, "default"),
    };
    info!("boot mode {:?} (from {})", mode, source);
    mode
}
