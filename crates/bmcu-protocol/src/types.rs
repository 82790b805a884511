//! 协议共享类型
//!
//! 设备类型、耗材运动与状态、运动命令、通道索引、通道状态位域、启动模式。

use crate::{LANE_COUNT, ProtocolError};
use bilge::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

// ============================================================================
// 设备类型
// ============================================================================

/// 设备类型（同时也是总线地址）
///
/// 未知地址按 `None` 处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
#[repr(u16)]
pub enum DeviceType {
    #[default]
    None = 0x0000,
    Ams = 0x0700,
    AmsLite = 0x1200,
}

impl DeviceType {
    /// 总线地址
    pub fn address(self) -> u16 {
        self.into()
    }

    /// 地址是否属于可模拟的设备角色
    pub fn is_emulated_role(address: u16) -> bool {
        !matches!(DeviceType::from(address), DeviceType::None)
    }
}

// ============================================================================
// 耗材运动 / 状态
// ============================================================================

/// 通道耗材运动状态
///
/// 装载路径：`Idle → NeedSendOut → InUse`
/// 卸载路径：`InUse → NeedPullBack → BeforePullBack → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FilamentMotion {
    BeforePullBack = 0,
    NeedPullBack = 1,
    NeedSendOut = 2,
    InUse = 3,
    Idle = 4,
}

impl Default for FilamentMotion {
    fn default() -> Self {
        FilamentMotion::Idle
    }
}

impl FilamentMotion {
    /// 线上编码
    pub fn code(self) -> u8 {
        self.into()
    }

    /// 是否处于装载/卸载的中间状态
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            FilamentMotion::NeedSendOut | FilamentMotion::NeedPullBack | FilamentMotion::BeforePullBack
        )
    }

    /// 状态名（诊断输出用）
    pub fn as_str(self) -> &'static str {
        match self {
            FilamentMotion::BeforePullBack => "before_pull_back",
            FilamentMotion::NeedPullBack => "need_pull_back",
            FilamentMotion::NeedSendOut => "need_send_out",
            FilamentMotion::InUse => "in_use",
            FilamentMotion::Idle => "idle",
        }
    }
}

/// 通道耗材状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FilamentStatus {
    Offline = 0,
    Online = 1,
    NfcWaiting = 2,
}

impl Default for FilamentStatus {
    fn default() -> Self {
        FilamentStatus::Offline
    }
}

impl FilamentStatus {
    pub fn code(self) -> u8 {
        self.into()
    }
}

/// 主板下发的运动命令（运动包第 3 字节）
///
/// 未知值按 `Query` 处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MotionCommand {
    /// 仅查询，按传感器推进一步
    #[default]
    Query = 0x00,
    /// 送出耗材（装载）
    SendOut = 0x01,
    /// 回抽耗材（卸载）
    PullBack = 0x02,
}

// ============================================================================
// 通道索引
// ============================================================================

/// 经过校验的通道索引（`0..LANE_COUNT`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "u8", into = "u8")
)]
pub struct LaneIndex(u8);

impl LaneIndex {
    /// 全部通道，按序
    pub const ALL: [LaneIndex; LANE_COUNT] = [LaneIndex(0), LaneIndex(1), LaneIndex(2), LaneIndex(3)];

    /// 创建通道索引，越界返回错误
    pub fn new(index: u8) -> Result<Self, ProtocolError> {
        if (index as usize) < LANE_COUNT {
            Ok(Self(index))
        } else {
            Err(ProtocolError::InvalidValue {
                field: "lane",
                value: index as u16,
            })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for LaneIndex {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LaneIndex> for u8 {
    fn from(lane: LaneIndex) -> Self {
        lane.0
    }
}

impl std::fmt::Display for LaneIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// 通道状态位域
// ============================================================================

/// 压力等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PressureLevel {
    #[default]
    Normal = 0,
    Low = 1,
    High = 2,
}

/// 通道状态位域（运动回复与 REQx6 回复中的 flags 字节）
///
/// 位序 LSB first：
/// - Bit 0: 通道内有耗材
/// - Bit 1-2: 压力等级（0 正常，1 过低，2 过高）
/// - Bit 3: 运动故障（超时）
/// - Bit 4: 自动送料已开启
/// - Bit 5-7: 保留
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq)]
pub struct LaneFlags {
    pub present: bool,  // Bit 0
    pub pressure: u2,   // Bit 1-2
    pub fault: bool,    // Bit 3
    pub auto_feed: bool, // Bit 4
    pub reserved: u3,   // Bit 5-7
}

impl LaneFlags {
    /// 由各字段组装
    pub fn compose(present: bool, pressure: PressureLevel, fault: bool, auto_feed: bool) -> Self {
        let mut flags = LaneFlags::from(u8::new(0));
        flags.set_present(present);
        flags.set_pressure(u2::new(u8::from(pressure) & 0b11));
        flags.set_fault(fault);
        flags.set_auto_feed(auto_feed);
        flags
    }

    /// 从线上字节解析
    pub fn from_byte(byte: u8) -> Self {
        LaneFlags::from(u8::new(byte))
    }

    /// 编码为线上字节
    pub fn to_byte(self) -> u8 {
        u8::from(self).value()
    }

    pub fn pressure_level(&self) -> PressureLevel {
        PressureLevel::from(self.pressure().value())
    }
}

// ============================================================================
// 启动模式
// ============================================================================

/// 启动模式：决定运行期使用哪套协议栈
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
#[repr(u8)]
pub enum BootMode {
    /// 作为 AMS 设备接入打印机 BambuBus
    BambuBus = 0,
    /// 通过 JSON 行协议接入 Klipper 主机
    Klipper = 1,
}

impl Default for BootMode {
    // 出厂默认 Klipper
    fn default() -> Self {
        BootMode::Klipper
    }
}
