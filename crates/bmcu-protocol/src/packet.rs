//! 包结构与包类型分类
//!
//! 分类规则：
//! - 未知帧头 → `None`
//! - 已知帧头、未知命令字/类型字 → `Etc`
//! - 请求方向、负载短于该类型最小长度 → `Error`

use crate::constants::*;
use crate::ProtocolError;

/// 包类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// 已识别的类型，但负载与类型不匹配
    Error,
    /// 无法识别的帧头
    None,
    FilamentMotionShort,
    FilamentMotionLong,
    OnlineDetect,
    Reqx6,
    NfcDetect,
    SetFilamentInfo,
    McOnline,
    ReadFilamentInfo,
    SetFilamentInfoType2,
    Version,
    SerialNumber,
    Heartbeat,
    /// 已知帧头下没有专门处理逻辑的类型
    Etc,
}

impl PackageType {
    /// 短包命令字 → 包类型
    pub fn from_short_command(command: u8) -> Self {
        match command {
            CMD_FILAMENT_MOTION_SHORT => PackageType::FilamentMotionShort,
            CMD_FILAMENT_MOTION_LONG => PackageType::FilamentMotionLong,
            CMD_ONLINE_DETECT => PackageType::OnlineDetect,
            CMD_REQX6 => PackageType::Reqx6,
            CMD_NFC_DETECT => PackageType::NfcDetect,
            CMD_SET_FILAMENT_INFO => PackageType::SetFilamentInfo,
            CMD_HEARTBEAT => PackageType::Heartbeat,
            _ => PackageType::Etc,
        }
    }

    /// 长包类型字 → 包类型
    pub fn from_long_type(type_id: u16) -> Self {
        match type_id {
            TYPE_MC_ONLINE => PackageType::McOnline,
            TYPE_READ_FILAMENT_INFO => PackageType::ReadFilamentInfo,
            TYPE_SET_FILAMENT_INFO_TYPE2 => PackageType::SetFilamentInfoType2,
            TYPE_VERSION => PackageType::Version,
            TYPE_SERIAL_NUMBER => PackageType::SerialNumber,
            _ => PackageType::Etc,
        }
    }

    /// 对应的短包命令字（仅短包类型）
    pub fn short_command(self) -> Option<u8> {
        match self {
            PackageType::FilamentMotionShort => Some(CMD_FILAMENT_MOTION_SHORT),
            PackageType::FilamentMotionLong => Some(CMD_FILAMENT_MOTION_LONG),
            PackageType::OnlineDetect => Some(CMD_ONLINE_DETECT),
            PackageType::Reqx6 => Some(CMD_REQX6),
            PackageType::NfcDetect => Some(CMD_NFC_DETECT),
            PackageType::SetFilamentInfo => Some(CMD_SET_FILAMENT_INFO),
            PackageType::Heartbeat => Some(CMD_HEARTBEAT),
            PackageType::McOnline
            | PackageType::ReadFilamentInfo
            | PackageType::SetFilamentInfoType2
            | PackageType::Version
            | PackageType::SerialNumber
            | PackageType::Error
            | PackageType::None
            | PackageType::Etc => None,
        }
    }

    /// 对应的长包类型字（仅长包类型）
    pub fn long_type(self) -> Option<u16> {
        match self {
            PackageType::McOnline => Some(TYPE_MC_ONLINE),
            PackageType::ReadFilamentInfo => Some(TYPE_READ_FILAMENT_INFO),
            PackageType::SetFilamentInfoType2 => Some(TYPE_SET_FILAMENT_INFO_TYPE2),
            PackageType::Version => Some(TYPE_VERSION),
            PackageType::SerialNumber => Some(TYPE_SERIAL_NUMBER),
            PackageType::FilamentMotionShort
            | PackageType::FilamentMotionLong
            | PackageType::OnlineDetect
            | PackageType::Reqx6
            | PackageType::NfcDetect
            | PackageType::SetFilamentInfo
            | PackageType::Heartbeat
            | PackageType::Error
            | PackageType::None
            | PackageType::Etc => None,
        }
    }

    /// 请求方向的最小负载长度
    pub fn min_request_payload(self) -> usize {
        match self {
            PackageType::FilamentMotionShort => 3,
            PackageType::FilamentMotionLong => 5,
            PackageType::OnlineDetect | PackageType::Reqx6 | PackageType::McOnline => 1,
            PackageType::NfcDetect | PackageType::ReadFilamentInfo => 2,
            PackageType::SetFilamentInfo | PackageType::SetFilamentInfoType2 => {
                2 + FILAMENT_INFO_LEN + 4
            },
            PackageType::Heartbeat
            | PackageType::Version
            | PackageType::SerialNumber
            | PackageType::Error
            | PackageType::None
            | PackageType::Etc => 0,
        }
    }

    /// 只写类型：不产生回复
    pub fn is_write_only(self) -> bool {
        matches!(
            self,
            PackageType::Heartbeat | PackageType::SetFilamentInfo | PackageType::SetFilamentInfoType2
        )
    }
}

/// 包方向（由帧头决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 主板 → 本机
    Request,
    /// 本机 → 主板
    Reply,
    /// 未知帧头
    Unknown,
}

/// 长包扩展头 `long_packet_data`
///
/// 线上布局（小端，偏移相对帧首）：
///
/// ```text
/// [2..4)  package_number
/// [4..6)  package_length   编码时计算
/// [6]     crc8             编码时计算
/// [7..9)  target_address
/// [9..11) source_address
/// [11..13) type
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LongPacketData {
    pub package_number: u16,
    pub target_address: u16,
    pub source_address: u16,
    pub type_id: u16,
}

impl LongPacketData {
    /// 构造回复头：回显包序号和类型，交换地址
    pub fn reply_to(&self, own_address: u16) -> Self {
        Self {
            package_number: self.package_number,
            target_address: self.source_address,
            source_address: own_address,
            type_id: self.type_id,
        }
    }
}

/// 帧头（短包或长包）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Short { head: u8, command: u8 },
    Long { head: u8, data: LongPacketData },
}

impl Header {
    pub fn head(&self) -> u8 {
        match *self {
            Header::Short { head, .. } | Header::Long { head, .. } => head,
        }
    }

    pub fn is_short(&self) -> bool {
        matches!(self, Header::Short { .. })
    }

    pub fn direction(&self) -> Direction {
        // 帧头最高位决定布局，因此请求/回复帧头不会与布局冲突
        match self.head() {
            HEAD_SHORT_REQUEST | HEAD_LONG_REQUEST => Direction::Request,
            HEAD_SHORT_REPLY | HEAD_LONG_REPLY => Direction::Reply,
            _ => Direction::Unknown,
        }
    }
}

/// 负载缓冲区（固定容量）
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

/// 经过校验的总线包
///
/// 只有 CRC 校验通过的帧才会被解码成 `Packet`，因此不单独保存有效位；
/// 包类型在构造时由帧头与负载计算得出，保证 `decode(encode(p)) == p`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    package_type: PackageType,
    payload: Payload,
}

impl Packet {
    /// 构造短包
    pub fn short(head: u8, command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        if head & SHORT_LAYOUT_FLAG == 0 {
            return Err(ProtocolError::InvalidHead {
                head,
                layout: "short",
            });
        }
        if payload.len() > SHORT_MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong {
                len: payload.len(),
                max: SHORT_MAX_PAYLOAD_LEN,
            });
        }
        Self::from_parts(Header::Short { head, command }, payload)
    }

    /// 构造长包
    pub fn long(head: u8, data: LongPacketData, payload: &[u8]) -> Result<Self, ProtocolError> {
        if head & SHORT_LAYOUT_FLAG != 0 {
            return Err(ProtocolError::InvalidHead {
                head,
                layout: "long",
            });
        }
        Self::from_parts(Header::Long { head, data }, payload)
    }

    /// 主板方向的短包
    pub fn short_request(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::short(HEAD_SHORT_REQUEST, command, payload)
    }

    /// 本机方向的短包
    pub fn short_reply(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::short(HEAD_SHORT_REPLY, command, payload)
    }

    /// 主板方向的长包
    pub fn long_request(data: LongPacketData, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::long(HEAD_LONG_REQUEST, data, payload)
    }

    /// 本机方向的长包
    pub fn long_reply(data: LongPacketData, payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::long(HEAD_LONG_REPLY, data, payload)
    }

    pub(crate) fn from_parts(header: Header, payload: &[u8]) -> Result<Self, ProtocolError> {
        let payload = Payload::from_slice(payload).map_err(|_| ProtocolError::PayloadTooLong {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        })?;
        let package_type = classify(&header, &payload);
        Ok(Self {
            header,
            package_type,
            payload,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn direction(&self) -> Direction {
        self.header.direction()
    }

    /// 长包扩展头
    pub fn long_data(&self) -> Option<&LongPacketData> {
        match &self.header {
            Header::Long { data, .. } => Some(data),
            Header::Short { .. } => None,
        }
    }

    /// 是否需要业务处理（排除 `Error` 与 `None`）
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self.package_type, PackageType::Error | PackageType::None)
    }

    /// 编码后的帧长
    pub fn frame_len(&self) -> usize {
        let header_len = match self.header {
            Header::Short { .. } => SHORT_HEADER_LEN + 1,
            Header::Long { .. } => LONG_HEADER_LEN,
        };
        header_len + self.payload.len() + CRC16_LEN
    }
}

/// 按帧头与负载分类
pub fn classify(header: &Header, payload: &[u8]) -> PackageType {
    let base = match *header {
        Header::Short { command, .. } => PackageType::from_short_command(command),
        Header::Long { data, .. } => PackageType::from_long_type(data.type_id),
    };
    match header.direction() {
        Direction::Unknown => PackageType::None,
        Direction::Reply => base,
        Direction::Request => {
            if payload.len() < base.min_request_payload() {
                PackageType::Error
            } else {
                base
            }
        },
    }
}
