//! 控制逻辑参数
//!
//! 所有字段都有默认值，配置文件中缺省的项按默认值填充。

use bmcu_protocol::PressureLevel;
use serde::{Deserialize, Serialize};

/// 控制逻辑参数（时间单位均为毫秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogicConfig {
    /// 心跳超时窗口
    pub heartbeat_timeout_ms: u64,
    /// 判定上线所需的连续窗口内心跳次数
    pub heartbeat_threshold: u32,
    /// 装载/卸载确认超时
    pub motion_timeout_ms: u64,
    /// NFC 读取超时
    pub nfc_timeout_ms: u64,
    /// 设置脏标记到写入存储的延迟
    pub save_debounce_ms: u64,
    /// 高于此电压视为压力过高（V）
    pub pressure_high_volts: f32,
    /// 低于此电压视为压力过低（V）
    pub pressure_low_volts: f32,
    /// 装载/卸载电机速度（mm/s）
    pub motion_speed_mm_s: f32,
    /// 自动送料电机速度（mm/s）
    pub auto_feed_speed_mm_s: f32,
    /// 点动速度上限（mm/s）
    pub max_jog_speed_mm_s: f32,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 3_000,
            heartbeat_threshold: 3,
            motion_timeout_ms: 20_000,
            nfc_timeout_ms: 5_000,
            save_debounce_ms: 5_000,
            pressure_high_volts: 1.85,
            pressure_low_volts: 1.45,
            motion_speed_mm_s: 50.0,
            auto_feed_speed_mm_s: 20.0,
            max_jog_speed_mm_s: 200.0,
        }
    }
}

impl LogicConfig {
    /// 按阈值划分压力等级
    pub fn pressure_level(&self, volts: f32) -> PressureLevel {
        if volts > self.pressure_high_volts {
            PressureLevel::High
        } else if volts < self.pressure_low_volts {
            PressureLevel::Low
        } else {
            PressureLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_level_thresholds() {
        let config = LogicConfig::default();
        assert_eq!(config.pressure_level(1.9), PressureLevel::High);
        assert_eq!(config.pressure_level(1.85), PressureLevel::Normal);
        assert_eq!(config.pressure_level(1.65), PressureLevel::Normal);
        assert_eq!(config.pressure_level(1.45), PressureLevel::Normal);
        assert_eq!(config.pressure_level(1.2), PressureLevel::Low);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LogicConfig = toml::from_str("motion_timeout_ms = 1000").unwrap();
        assert_eq!(config.motion_timeout_ms, 1000);
        assert_eq!(config.heartbeat_threshold, 3);
        assert_eq!(config.nfc_timeout_ms, 5000);
    }
}
