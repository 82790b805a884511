//! # BMCU Logic
//!
//! 控制逻辑：每通道的耗材运动状态机、耗材状态、主机连接状态与设置持久化。
//!
//! 所有状态都保存在显式构造的 [`ControlLogic`] 中，硬件与存储以 trait
//! 注入，时间以单调毫秒计数显式传入。核心是单线程、按 tick 驱动的，
//! 不需要任何锁。
//!
//! ## 模块
//!
//! - `config`: 时间窗口、压力阈值等参数
//! - `connectivity`: 心跳去抖与超时
//! - `lane`: 单通道状态
//! - `logic`: `ControlLogic` 本体

use bmcu_hal::{HalError, StorageError};
use bmcu_protocol::{LaneIndex, ProtocolError};
use thiserror::Error;

pub mod config;
pub mod connectivity;
pub mod lane;
pub mod logic;

pub use config::LogicConfig;
pub use connectivity::ConnectivityMonitor;
pub use lane::{DriveMode, LaneFault, LaneState};
pub use logic::{ControlLogic, MAX_METERS};

/// 控制逻辑错误类型
#[derive(Error, Debug)]
pub enum LogicError {
    /// 硬件访问失败
    #[error("Hardware error: {0}")]
    Hardware(#[from] HalError),

    /// 设置存储失败
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// 协议字段非法（如越界的通道号）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 通道正在装载/卸载，拒绝点动
    #[error("Lane {0} is busy")]
    LaneBusy(LaneIndex),

    /// 参数非法
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}
