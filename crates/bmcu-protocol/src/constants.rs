//! 协议常量定义
//!
//! 帧格式、帧头字节、短包命令字与长包类型字。

// ============================================================================
// 帧格式
// ============================================================================

/// 帧起始字节
pub const FRAME_START: u8 = 0x3D;

/// 接收缓冲区大小，也是允许的最大帧长
pub const MAX_FRAME_LEN: usize = 1000;

/// 帧头最高位置位表示短包布局
pub const SHORT_LAYOUT_FLAG: u8 = 0x80;

/// 短包帧头长度：`3D head len crc8`
pub const SHORT_HEADER_LEN: usize = 4;

/// 短包最小帧长：帧头 + 命令字 + CRC16
pub const SHORT_MIN_FRAME_LEN: usize = 7;

/// 短包长度字段只有 1 字节
pub const SHORT_MAX_FRAME_LEN: usize = u8::MAX as usize;

/// 长包帧头长度：`3D head` + 11 字节 `long_packet_data`
pub const LONG_HEADER_LEN: usize = 13;

/// 长包 CRC8 所在偏移（覆盖 `[0..6)`）
pub const LONG_CRC8_OFFSET: usize = 6;

/// 长包最小帧长：帧头 + CRC16
pub const LONG_MIN_FRAME_LEN: usize = 15;

/// 帧尾 CRC16 长度
pub const CRC16_LEN: usize = 2;

/// 负载最大长度（长包，受接收缓冲区限制）
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - LONG_MIN_FRAME_LEN;

/// 短包负载最大长度
pub const SHORT_MAX_PAYLOAD_LEN: usize = SHORT_MAX_FRAME_LEN - SHORT_MIN_FRAME_LEN;

// ============================================================================
// 帧头字节
// ============================================================================

/// 主板发出的短包
pub const HEAD_SHORT_REQUEST: u8 = 0xC5;
/// 本机回复的短包
pub const HEAD_SHORT_REPLY: u8 = 0xE0;
/// 主板发出的长包
pub const HEAD_LONG_REQUEST: u8 = 0x05;
/// 本机回复的长包
pub const HEAD_LONG_REPLY: u8 = 0x00;

// ============================================================================
// 短包命令字（偏移 4）
// ============================================================================

pub const CMD_FILAMENT_MOTION_SHORT: u8 = 0x03;
pub const CMD_FILAMENT_MOTION_LONG: u8 = 0x04;
pub const CMD_ONLINE_DETECT: u8 = 0x05;
pub const CMD_REQX6: u8 = 0x06;
pub const CMD_NFC_DETECT: u8 = 0x07;
pub const CMD_SET_FILAMENT_INFO: u8 = 0x08;
pub const CMD_HEARTBEAT: u8 = 0x20;

// ============================================================================
// 长包类型字（`long_packet_data.type`）
// ============================================================================

pub const TYPE_MC_ONLINE: u16 = 0x21A;
pub const TYPE_READ_FILAMENT_INFO: u16 = 0x211;
pub const TYPE_SET_FILAMENT_INFO_TYPE2: u16 = 0x218;
pub const TYPE_VERSION: u16 = 0x103;
pub const TYPE_SERIAL_NUMBER: u16 = 0x402;

// ============================================================================
// 负载尺寸
// ============================================================================

/// 通道数量
pub const LANE_COUNT: usize = 4;

/// `FilamentInfo` 线上长度
pub const FILAMENT_INFO_LEN: usize = 36;

/// 版本号/序列号字段长度（NUL 填充）
pub const IDENT_STRING_LEN: usize = 20;
