//! # BMCU Firmware
//!
//! 固件驱动层：决定启动模式、组装各层组件并提供协作式主循环。
//!
//! ```text
//! ByteTransport ──> StreamDecoder / KlipperCli ──> BambuEngine ──> ControlLogic ──> LaneHardware
//!       ^                                                              │
//!       └──────────────────────── 回复帧 / JSON 行 <──────────────────────┘
//! ```
//!
//! 每次 [`Firmware::run`] 只做有界的工作（读一块、处理、写回、推进一步），
//! 由外层循环按自己的节奏调用。

use bmcu_hal::HalError;
use thiserror::Error;

pub mod boot;
pub mod config;
pub mod firmware;
pub mod logging;

pub use boot::init_boot_check;
pub use config::{ConfigError, DeviceConfig, FirmwareConfig, KlipperConfig};
pub use firmware::{Firmware, RX_CHUNK_LEN, TickReport};
pub use logging::init_logging;

/// 固件初始化错误
#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] HalError),
}
