//! 包负载定义
//!
//! 每种负载提供 `parse(&[u8])` 解析和 `to_bytes()` 构建（定长数组，无堆分配）。
//! 请求负载额外实现 `TryFrom<&Packet>`，会同时检查包类型与方向。

use crate::constants::*;
use crate::packet::{Direction, PackageType, Packet};
use crate::types::{
    DeviceType, FilamentMotion, FilamentStatus, LaneFlags, LaneIndex, MotionCommand,
};
use crate::{ProtocolError, ensure_len, f32_le, u16_le};

// ============================================================================
// 文本字段
// ============================================================================

/// 读取 NUL 填充的 ASCII 字段，遇到第一个不可打印字符截止
pub fn text_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&c| (32..127).contains(&c))
        .map(|&c| c as char)
        .collect()
}

/// 写入 NUL 填充的 ASCII 字段
pub fn put_text(dst: &mut [u8], text: &str, field: &'static str) -> Result<(), ProtocolError> {
    let bytes = text.as_bytes();
    if bytes.len() > dst.len() {
        return Err(ProtocolError::InvalidValue {
            field,
            value: bytes.len() as u16,
        });
    }
    dst.fill(0);
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// 版本号/序列号负载（20 字节，截断超长部分）
pub fn ident_bytes(text: &str) -> [u8; IDENT_STRING_LEN] {
    let mut out = [0u8; IDENT_STRING_LEN];
    let len = text.len().min(IDENT_STRING_LEN);
    out[..len].copy_from_slice(&text.as_bytes()[..len]);
    out
}

fn lane_at(payload: &[u8], at: usize) -> Result<LaneIndex, ProtocolError> {
    LaneIndex::new(payload[at])
}

fn expect_type(
    packet: &Packet,
    direction: Direction,
    accepted: &[PackageType],
) -> Result<(), ProtocolError> {
    if packet.direction() != direction || !accepted.contains(&packet.package_type()) {
        return Err(ProtocolError::UnexpectedType(packet.package_type()));
    }
    Ok(())
}

// ============================================================================
// 耗材信息
// ============================================================================

/// RGBA 颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(0xFF, 0xFF, 0xFF, 0xFF);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// 从 `0xRRGGBB` 创建，不透明
    pub const fn from_rgb(rgb: u32) -> Self {
        Self::new((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 0xFF)
    }
}

/// 耗材元数据（协议层不解释其含义）
///
/// 线上布局（36 字节）：
///
/// ```text
/// [0..8)   id          NUL 填充 ASCII
/// [8..12)  r g b a
/// [12..14) temperature_min  u16 LE
/// [14..16) temperature_max  u16 LE
/// [16..36) name        NUL 填充 ASCII
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilamentInfo {
    pub id: [u8; 8],
    pub name: [u8; 20],
    pub color: Rgba,
    pub temperature_min: u16,
    pub temperature_max: u16,
}

impl Default for FilamentInfo {
    /// 通用 PLA，白色，200~220 °C
    fn default() -> Self {
        let mut id = [0u8; 8];
        id[..5].copy_from_slice(b"GFL99");
        let mut name = [0u8; 20];
        name[..3].copy_from_slice(b"PLA");
        Self {
            id,
            name,
            color: Rgba::WHITE,
            temperature_min: 200,
            temperature_max: 220,
        }
    }
}

impl FilamentInfo {
    /// 创建耗材信息，`id` 最长 8 字节，`name` 最长 20 字节
    pub fn new(
        id: &str,
        name: &str,
        color: Rgba,
        temperature_min: u16,
        temperature_max: u16,
    ) -> Result<Self, ProtocolError> {
        let mut info = Self {
            id: [0; 8],
            name: [0; 20],
            color,
            temperature_min,
            temperature_max,
        };
        info.set_id(id)?;
        info.set_name(name)?;
        Ok(info)
    }

    pub fn set_id(&mut self, id: &str) -> Result<(), ProtocolError> {
        put_text(&mut self.id, id, "id")
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ProtocolError> {
        put_text(&mut self.name, name, "name")
    }

    pub fn id_str(&self) -> String {
        text_field(&self.id)
    }

    pub fn name_str(&self) -> String {
        text_field(&self.name)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(bytes, FILAMENT_INFO_LEN)?;
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        let mut name = [0u8; 20];
        name.copy_from_slice(&bytes[16..36]);
        Ok(Self {
            id,
            name,
            color: Rgba::new(bytes[8], bytes[9], bytes[10], bytes[11]),
            temperature_min: u16_le(bytes, 12),
            temperature_max: u16_le(bytes, 14),
        })
    }

    pub fn to_bytes(&self) -> [u8; FILAMENT_INFO_LEN] {
        let mut out = [0u8; FILAMENT_INFO_LEN];
        out[0..8].copy_from_slice(&self.id);
        out[8..12].copy_from_slice(&[self.color.r, self.color.g, self.color.b, self.color.a]);
        out[12..14].copy_from_slice(&self.temperature_min.to_le_bytes());
        out[14..16].copy_from_slice(&self.temperature_max.to_le_bytes());
        out[16..36].copy_from_slice(&self.name);
        out
    }
}

// ============================================================================
// 请求负载
// ============================================================================

/// 只携带机组号的查询（online_detect / REQx6 / MC_online）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitQuery {
    pub ams: u8,
}

impl UnitQuery {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, 1)?;
        Ok(Self { ams: payload[0] })
    }

    pub fn to_bytes(&self) -> [u8; 1] {
        [self.ams]
    }
}

impl TryFrom<&Packet> for UnitQuery {
    type Error = ProtocolError;

    fn try_from(packet: &Packet) -> Result<Self, Self::Error> {
        expect_type(
            packet,
            Direction::Request,
            &[PackageType::OnlineDetect, PackageType::Reqx6, PackageType::McOnline],
        )?;
        Self::parse(packet.payload())
    }
}

/// 针对单个通道的查询（NFC_detect / read_filament_info）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneQuery {
    pub ams: u8,
    pub lane: LaneIndex,
}

impl LaneQuery {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, 2)?;
        Ok(Self {
            ams: payload[0],
            lane: lane_at(payload, 1)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.ams, self.lane.get()]
    }
}

impl TryFrom<&Packet> for LaneQuery {
    type Error = ProtocolError;

    fn try_from(packet: &Packet) -> Result<Self, Self::Error> {
        expect_type(
            packet,
            Direction::Request,
            &[PackageType::NfcDetect, PackageType::ReadFilamentInfo],
        )?;
        Self::parse(packet.payload())
    }
}

/// 运动请求（filament_motion_short / filament_motion_long）
///
/// 长运动包额外携带目标送料长度（mm）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionRequest {
    pub ams: u8,
    pub lane: LaneIndex,
    pub command: MotionCommand,
    pub length_mm: Option<u16>,
}

impl MotionRequest {
    pub fn parse_short(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, 3)?;
        Ok(Self {
            ams: payload[0],
            lane: lane_at(payload, 1)?,
            command: MotionCommand::from(payload[2]),
            length_mm: None,
        })
    }

    pub fn parse_long(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, 5)?;
        Ok(Self {
            length_mm: Some(u16_le(payload, 3)),
            ..Self::parse_short(payload)?
        })
    }

    /// 构建请求包（有长度时为长运动包）
    pub fn to_packet(&self) -> Result<Packet, ProtocolError> {
        let head = [self.ams, self.lane.get(), u8::from(self.command)];
        match self.length_mm {
            None => Packet::short_request(CMD_FILAMENT_MOTION_SHORT, &head),
            Some(length) => {
                let len = length.to_le_bytes();
                Packet::short_request(
                    CMD_FILAMENT_MOTION_LONG,
                    &[head[0], head[1], head[2], len[0], len[1]],
                )
            },
        }
    }
}

impl TryFrom<&Packet> for MotionRequest {
    type Error = ProtocolError;

    fn try_from(packet: &Packet) -> Result<Self, Self::Error> {
        expect_type(
            packet,
            Direction::Request,
            &[PackageType::FilamentMotionShort, PackageType::FilamentMotionLong],
        )?;
        if packet.package_type() == PackageType::FilamentMotionLong {
            Self::parse_long(packet.payload())
        } else {
            Self::parse_short(packet.payload())
        }
    }
}

/// 单通道耗材信息与余量
///
/// 用于 set_filament_info / set_filament_info_type2 请求，
/// 以及 read_filament_info 的回复。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneFilament {
    pub ams: u8,
    pub lane: LaneIndex,
    pub info: FilamentInfo,
    pub meters: f32,
}

impl LaneFilament {
    pub const LEN: usize = 2 + FILAMENT_INFO_LEN + 4;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        Ok(Self {
            ams: payload[0],
            lane: lane_at(payload, 1)?,
            info: FilamentInfo::parse(&payload[2..2 + FILAMENT_INFO_LEN])?,
            meters: f32_le(payload, 2 + FILAMENT_INFO_LEN),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.ams;
        out[1] = self.lane.get();
        out[2..2 + FILAMENT_INFO_LEN].copy_from_slice(&self.info.to_bytes());
        out[2 + FILAMENT_INFO_LEN..].copy_from_slice(&self.meters.to_le_bytes());
        out
    }
}

impl TryFrom<&Packet> for LaneFilament {
    type Error = ProtocolError;

    fn try_from(packet: &Packet) -> Result<Self, Self::Error> {
        expect_type(
            packet,
            Direction::Request,
            &[PackageType::SetFilamentInfo, PackageType::SetFilamentInfoType2],
        )?;
        Self::parse(packet.payload())
    }
}

// ============================================================================
// 回复负载
// ============================================================================

/// 运动回复（filament_motion_short）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReport {
    pub ams: u8,
    pub lane: LaneIndex,
    pub motion: FilamentMotion,
    pub status: FilamentStatus,
    pub flags: LaneFlags,
}

impl MotionReport {
    pub const LEN: usize = 5;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        Ok(Self {
            ams: payload[0],
            lane: lane_at(payload, 1)?,
            motion: FilamentMotion::try_from(payload[2]).map_err(|_| {
                ProtocolError::InvalidValue {
                    field: "motion",
                    value: payload[2] as u16,
                }
            })?,
            status: FilamentStatus::try_from(payload[3]).map_err(|_| {
                ProtocolError::InvalidValue {
                    field: "status",
                    value: payload[3] as u16,
                }
            })?,
            flags: LaneFlags::from_byte(payload[4]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [
            self.ams,
            self.lane.get(),
            self.motion.code(),
            self.status.code(),
            self.flags.to_byte(),
        ]
    }
}

/// 长运动回复（filament_motion_long）：附带余量与压力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReportLong {
    pub report: MotionReport,
    pub meters: f32,
    /// 压力传感器电压（mV）
    pub pressure_mv: u16,
}

impl MotionReportLong {
    pub const LEN: usize = MotionReport::LEN + 6;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        Ok(Self {
            report: MotionReport::parse(payload)?,
            meters: f32_le(payload, 5),
            pressure_mv: u16_le(payload, 9),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..MotionReport::LEN].copy_from_slice(&self.report.to_bytes());
        out[5..9].copy_from_slice(&self.meters.to_le_bytes());
        out[9..11].copy_from_slice(&self.pressure_mv.to_le_bytes());
        out
    }
}

/// online_detect 回复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineDetectReply {
    pub ams: u8,
    pub device_type: DeviceType,
    pub online: bool,
    pub lane_count: u8,
}

impl OnlineDetectReply {
    pub const LEN: usize = 5;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        Ok(Self {
            ams: payload[0],
            device_type: DeviceType::from(u16_le(payload, 1)),
            online: payload[3] != 0,
            lane_count: payload[4],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let addr = self.device_type.address().to_le_bytes();
        [self.ams, addr[0], addr[1], self.online as u8, self.lane_count]
    }
}

/// REQx6 回复中的单通道记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneRecord {
    pub lane: LaneIndex,
    pub status: FilamentStatus,
    pub motion: FilamentMotion,
    pub flags: LaneFlags,
    pub info: FilamentInfo,
}

impl LaneRecord {
    pub const LEN: usize = 4 + FILAMENT_INFO_LEN;

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(bytes, Self::LEN)?;
        Ok(Self {
            lane: lane_at(bytes, 0)?,
            status: FilamentStatus::try_from(bytes[1]).map_err(|_| {
                ProtocolError::InvalidValue {
                    field: "status",
                    value: bytes[1] as u16,
                }
            })?,
            motion: FilamentMotion::try_from(bytes[2]).map_err(|_| {
                ProtocolError::InvalidValue {
                    field: "motion",
                    value: bytes[2] as u16,
                }
            })?,
            flags: LaneFlags::from_byte(bytes[3]),
            info: FilamentInfo::parse(&bytes[4..Self::LEN])?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.lane.get();
        out[1] = self.status.code();
        out[2] = self.motion.code();
        out[3] = self.flags.to_byte();
        out[4..].copy_from_slice(&self.info.to_bytes());
        out
    }
}

/// REQx6 回复：全部通道的状态与元数据
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reqx6Reply {
    pub ams: u8,
    pub lanes: [LaneRecord; LANE_COUNT],
}

impl Reqx6Reply {
    pub const LEN: usize = 1 + LANE_COUNT * LaneRecord::LEN;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        let record = |i: usize| {
            let at = 1 + i * LaneRecord::LEN;
            LaneRecord::parse(&payload[at..at + LaneRecord::LEN])
        };
        Ok(Self {
            ams: payload[0],
            lanes: [record(0)?, record(1)?, record(2)?, record(3)?],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.ams;
        for (i, record) in self.lanes.iter().enumerate() {
            let at = 1 + i * LaneRecord::LEN;
            out[at..at + LaneRecord::LEN].copy_from_slice(&record.to_bytes());
        }
        out
    }
}

/// NFC_detect 回复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfcDetectReply {
    pub ams: u8,
    pub lane: LaneIndex,
    pub status: FilamentStatus,
}

impl NfcDetectReply {
    pub const LEN: usize = 3;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        Ok(Self {
            ams: payload[0],
            lane: lane_at(payload, 1)?,
            status: FilamentStatus::try_from(payload[2]).map_err(|_| {
                ProtocolError::InvalidValue {
                    field: "status",
                    value: payload[2] as u16,
                }
            })?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [self.ams, self.lane.get(), self.status.code()]
    }
}

/// MC_online 回复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McOnlineReply {
    pub ams: u8,
    pub online: bool,
    pub device_type: DeviceType,
}

impl McOnlineReply {
    pub const LEN: usize = 4;

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(payload, Self::LEN)?;
        Ok(Self {
            ams: payload[0],
            online: payload[1] != 0,
            device_type: DeviceType::from(u16_le(payload, 2)),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let addr = self.device_type.address().to_le_bytes();
        [self.ams, self.online as u8, addr[0], addr[1]]
    }
}
