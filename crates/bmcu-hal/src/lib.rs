//! # BMCU HAL
//!
//! 硬件抽象层：控制逻辑只通过这里的 trait 访问执行器、传感器、存储和串口。
//!
//! - `LaneHardware`: 通道电机与传感器
//! - `SettingsStore`: 非易失设置存储
//! - `Clock`: 单调毫秒时钟
//! - `ByteTransport`: 串口字节收发
//! - `BootSignal`: 启动模式引脚
//!
//! 启用 `mock` feature 后提供 [`mock`] 模块中的测试替身。

use bmcu_protocol::{BootMode, LaneIndex};
use thiserror::Error;

pub mod clock;
pub mod settings;

#[cfg(feature = "mock")]
pub mod mock;

pub use clock::MonotonicClock;
pub use settings::{JsonFileStore, StoredLane, StoredSettings};

// ============================================================================
// 错误类型
// ============================================================================

/// 硬件访问错误
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lane {0} actuator fault")]
    Actuator(LaneIndex),
    #[error("Lane {0} sensor unavailable")]
    Sensor(LaneIndex),
    #[error("Transport closed")]
    Closed,
}

/// 设置存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

// ============================================================================
// 通道硬件
// ============================================================================

/// 电机方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AxisDirection {
    /// 送出耗材
    Feed,
    /// 回抽耗材
    Retract,
    /// 停止
    #[default]
    Stop,
}

impl AxisDirection {
    /// 方向符号：送出 +1，回抽 -1，停止 0
    pub fn sign(self) -> f32 {
        match self {
            AxisDirection::Feed => 1.0,
            AxisDirection::Retract => -1.0,
            AxisDirection::Stop => 0.0,
        }
    }
}

/// 单通道传感器读数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    /// 通道内插有耗材
    pub present: bool,
    /// 耗材已越过通道出口
    pub at_outlet: bool,
    /// 压力传感器电压（V）
    pub pressure_volts: f32,
}

/// 通道电机与传感器
///
/// 所有调用都是立即返回的命令下发，运动完成通过后续传感器轮询观察。
pub trait LaneHardware {
    /// 下发电机方向
    fn move_axis(&mut self, lane: LaneIndex, direction: AxisDirection) -> Result<(), HalError>;

    /// 设置电机速度（mm/s），不支持调速的硬件可忽略
    fn set_speed(&mut self, _lane: LaneIndex, _mm_per_s: f32) -> Result<(), HalError> {
        Ok(())
    }

    /// 读取传感器
    fn sensor_state(&mut self, lane: LaneIndex) -> Result<SensorReading, HalError>;

    /// 回读电机当前方向（诊断用）
    fn lane_motion(&self, lane: LaneIndex) -> AxisDirection;

    /// 编码器累计里程（mm，送出为正）
    fn odometer_mm(&mut self, lane: LaneIndex) -> Result<f32, HalError>;
}

// ============================================================================
// 存储 / 时钟 / 传输 / 启动信号
// ============================================================================

/// 非易失设置存储
pub trait SettingsStore {
    /// 读取设置，从未保存过时返回 `None`
    fn load(&mut self) -> Result<Option<StoredSettings>, StorageError>;

    /// 保存设置
    fn save(&mut self, settings: &StoredSettings) -> Result<(), StorageError>;
}

/// 单调毫秒时钟
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// 串口字节收发
pub trait ByteTransport {
    /// 非阻塞读取，返回读到的字节数（可能为 0）
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HalError>;

    /// 写出整段字节
    fn write(&mut self, bytes: &[u8]) -> Result<(), HalError>;
}

/// 启动模式信号（上电时采样一次）
pub trait BootSignal {
    /// 引脚未给出明确模式时返回 `None`
    fn sample(&mut self) -> Option<BootMode>;
}
