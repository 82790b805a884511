//! # BMCU Protocol
//!
//! BambuBus 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 帧格式与命令常量
//! - `crc`: 帧头 CRC8 与帧尾 CRC16
//! - `packet`: 包类型分类与 `Packet` 结构
//! - `codec`: 编码、切片解码与逐字节流式解码
//! - `types`: 设备类型、耗材运动/状态枚举、通道索引、状态位域
//! - `payload`: 各包类型的负载解析与构建
//!
//! ## 字节序
//!
//! 多字节字段均为小端字节序（与 Motorola 风格的 CAN 协议不同）。

pub mod codec;
pub mod constants;
pub mod crc;
pub mod packet;
pub mod payload;
pub mod types;

// 重新导出常用类型
pub use codec::*;
pub use constants::*;
pub use crc::{crc8, crc16};
pub use packet::*;
pub use payload::*;
pub use types::*;

use thiserror::Error;

/// 协议解析/构建错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid payload length: expected at least {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Payload too long: {len} bytes exceeds {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Invalid head byte 0x{head:02X} for {layout} layout")]
    InvalidHead { head: u8, layout: &'static str },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: u16 },

    #[error("Unexpected package type: {0:?}")]
    UnexpectedType(PackageType),
}

/// 小端字节序转 u16（调用方保证 `at + 2 <= bytes.len()`）
pub fn u16_le(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// 小端字节序转 f32（调用方保证 `at + 4 <= bytes.len()`）
pub fn f32_le(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// 检查负载最小长度
pub(crate) fn ensure_len(payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() < expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}
