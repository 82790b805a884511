//! 设备身份

use bmcu_protocol::{BootMode, DeviceType, IDENT_STRING_LEN, ident_bytes};
use serde::{Deserialize, Serialize};

/// 设备身份
///
/// 初始化时确定，之后只有设备类型会被目标地址为 AMS / AMS-lite 的
/// 长包重新配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub version: String,
    pub serial_number: String,
    pub device_type: DeviceType,
    /// 机组号，只响应负载中机组号与之相同的请求
    pub unit_index: u8,
    pub boot_mode: BootMode,
}

impl DeviceIdentity {
    pub const DEFAULT_VERSION: &'static str = "00.00.05.00";
    pub const DEFAULT_SERIAL: &'static str = "00000000000000";

    pub fn new(device_type: DeviceType, unit_index: u8, boot_mode: BootMode) -> Self {
        Self {
            device_type,
            unit_index,
            boot_mode,
            ..Self::default()
        }
    }

    /// 本机总线地址
    pub fn address(&self) -> u16 {
        self.device_type.address()
    }

    pub fn version_bytes(&self) -> [u8; IDENT_STRING_LEN] {
        ident_bytes(&self.version)
    }

    pub fn serial_bytes(&self) -> [u8; IDENT_STRING_LEN] {
        ident_bytes(&self.serial_number)
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            version: Self::DEFAULT_VERSION.to_string(),
            serial_number: Self::DEFAULT_SERIAL.to_string(),
            device_type: DeviceType::Ams,
            unit_index: 0,
            boot_mode: BootMode::default(),
        }
    }
}
