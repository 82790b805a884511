//! 固件配置
//!
//! TOML 格式，三个段落：
//!
//! ```toml
//! [device]
//! device_type = "ams"        # ams | ams_lite
//! unit_index = 0
//! serial_number = "00000000000000"
//! default_boot_mode = "klipper"
//!
//! [timing]
//! heartbeat_timeout_ms = 3000
//! motion_timeout_ms = 20000
//!
//! [klipper]
//! idle_ms = 500
//! ```
//!
//! 所有字段都有默认值，缺省项按默认值填充。

use bmcu_logic::LogicConfig;
use bmcu_protocol::{BootMode, DeviceType, IDENT_STRING_LEN};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 设备身份配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_type: DeviceType,
    pub unit_index: u8,
    pub serial_number: String,
    /// 启动引脚与存储都没有给出模式时使用
    pub default_boot_mode: BootMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Ams,
            unit_index: 0,
            serial_number: "00000000000000".to_string(),
            default_boot_mode: BootMode::Klipper,
        }
    }
}

/// Klipper 模式参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KlipperConfig {
    /// 主机静默超过该时长后才写入设置（ms）
    pub idle_ms: u64,
}

impl Default for KlipperConfig {
    fn default() -> Self {
        Self { idle_ms: 500 }
    }
}

/// 固件配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    pub device: DeviceConfig,
    pub timing: LogicConfig,
    pub klipper: KlipperConfig,
}

impl FirmwareConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.device_type == DeviceType::None {
            return Err(ConfigError::Invalid {
                field: "device.device_type",
                reason: "must be ams or ams_lite".to_string(),
            });
        }
        if self.device.serial_number.len() > IDENT_STRING_LEN {
            return Err(ConfigError::Invalid {
                field: "device.serial_number",
                reason: format!("longer than {} bytes", IDENT_STRING_LEN),
            });
        }
        let timing = &self.timing;
        if timing.pressure_low_volts >= timing.pressure_high_volts {
            return Err(ConfigError::Invalid {
                field: "timing.pressure_low_volts",
                reason: "must be below pressure_high_volts".to_string(),
            });
        }
        if timing.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timing.heartbeat_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
