//! 单通道状态

use bmcu_hal::{AxisDirection, SensorReading};
use bmcu_protocol::{FilamentInfo, FilamentMotion, FilamentStatus};

/// 通道故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneFault {
    /// 装载/卸载在超时内未得到传感器确认
    MotionTimeout,
    /// 传感器读取失败
    Sensor,
    /// 电机命令下发失败
    Actuator,
}

/// 电机驱动模式（Klipper 状态输出用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriveMode {
    #[default]
    Idle,
    Feed,
    Retract,
    /// 跟随压力自动送料
    AutoFeed,
    /// 按距离点动
    VelCtrl,
}

impl DriveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DriveMode::Idle => "Idle",
            DriveMode::Feed => "Feed",
            DriveMode::Retract => "Retract",
            DriveMode::AutoFeed => "AutoFeed",
            DriveMode::VelCtrl => "VelCtrl",
        }
    }
}

impl From<AxisDirection> for DriveMode {
    fn from(direction: AxisDirection) -> Self {
        match direction {
            AxisDirection::Feed => DriveMode::Feed,
            AxisDirection::Retract => DriveMode::Retract,
            AxisDirection::Stop => DriveMode::Idle,
        }
    }
}

/// 进行中的装载/卸载
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transition {
    /// 开始时间，用于超时判定
    pub started_ms: u64,
    /// 开始时的编码器里程
    pub origin_mm: f32,
    /// 要求的最小移动距离
    pub length_mm: Option<f32>,
}

impl Transition {
    /// 沿 `direction` 方向是否已走够要求的距离
    pub fn distance_reached(&self, odometer_mm: f32, direction: AxisDirection) -> bool {
        match self.length_mm {
            None => true,
            Some(length) => (odometer_mm - self.origin_mm) * direction.sign() >= length,
        }
    }
}

/// 进行中的点动
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Jog {
    pub origin_mm: f32,
    pub distance_mm: f32,
    pub direction: AxisDirection,
}

impl Jog {
    pub fn is_done(&self, odometer_mm: f32) -> bool {
        (odometer_mm - self.origin_mm).abs() >= self.distance_mm
    }
}

/// 单通道状态
///
/// 只由 `ControlLogic` 修改，外部通过只读访问器观察。
#[derive(Debug, Clone, PartialEq)]
pub struct LaneState {
    pub(crate) motion: FilamentMotion,
    pub(crate) status: FilamentStatus,
    pub(crate) reading: SensorReading,
    pub(crate) info: FilamentInfo,
    pub(crate) meters: f32,
    pub(crate) auto_feed: bool,
    pub(crate) fault: Option<LaneFault>,
    pub(crate) transition: Option<Transition>,
    pub(crate) jog: Option<Jog>,
    pub(crate) nfc_deadline_ms: Option<u64>,
}

impl Default for LaneState {
    fn default() -> Self {
        Self {
            motion: FilamentMotion::Idle,
            status: FilamentStatus::Offline,
            reading: SensorReading::default(),
            info: FilamentInfo::default(),
            meters: 0.0,
            auto_feed: false,
            fault: None,
            transition: None,
            jog: None,
            nfc_deadline_ms: None,
        }
    }
}

impl LaneState {
    pub fn motion(&self) -> FilamentMotion {
        self.motion
    }

    pub fn status(&self) -> FilamentStatus {
        self.status
    }

    /// 最近一次传感器读数
    pub fn reading(&self) -> SensorReading {
        self.reading
    }

    pub fn info(&self) -> &FilamentInfo {
        &self.info
    }

    /// 剩余耗材（m）
    pub fn meters(&self) -> f32 {
        self.meters
    }

    pub fn auto_feed(&self) -> bool {
        self.auto_feed
    }

    pub fn fault(&self) -> Option<LaneFault> {
        self.fault
    }

    pub fn is_jogging(&self) -> bool {
        self.jog.is_some()
    }

    /// 压力（mV）
    pub fn pressure_mv(&self) -> u16 {
        let mv = (self.reading.pressure_volts * 1000.0).round();
        if mv.is_finite() {
            mv.clamp(0.0, u16::MAX as f32) as u16
        } else {
            0
        }
    }

    /// 切换到新的运动状态，清除进行中的过渡
    pub(crate) fn settle(&mut self, motion: FilamentMotion) {
        self.motion = motion;
        self.transition = None;
    }
}
