//! # BMCU Engine
//!
//! 协议引擎：把解码后的请求路由到控制逻辑，并把结果整形为回复。
//!
//! - `identity`: 设备身份（版本号、序列号、设备类型、启动模式）
//! - `bambu`: BambuBus 请求分发（`handle(packet) -> Option<Packet>`）
//! - `klipper`: Klipper 模式的 JSON 行协议
//!
//! 引擎本身不含运动或传感器逻辑，只负责线上格式与业务逻辑之间的转换。

use bmcu_logic::LogicError;
use bmcu_protocol::ProtocolError;
use thiserror::Error;

pub mod bambu;
pub mod identity;
pub mod klipper;

pub use bambu::BambuEngine;
pub use identity::DeviceIdentity;
pub use klipper::{KlipperCli, LINE_BUFFER_LEN, STARTUP_LINE};

/// 请求处理错误（只用于日志，不会中断处理循环）
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Logic error: {0}")]
    Logic(#[from] LogicError),
}
