//! 持久化设置
//!
//! 记录格式带魔数与版本号，读到不兼容的记录时由上层回退到默认值。

use crate::{SettingsStore, StorageError};
use bmcu_protocol::{BootMode, FilamentInfo, LANE_COUNT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 单通道持久化数据
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StoredLane {
    pub info: FilamentInfo,
    /// 剩余耗材（m）
    pub meters: f32,
    pub auto_feed: bool,
}

/// 持久化设置记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSettings {
    pub magic: u32,
    pub version: u32,
    pub lanes: [StoredLane; LANE_COUNT],
    /// 当前选中的通道
    pub active_lane: u8,
    pub boot_mode: BootMode,
}

impl StoredSettings {
    pub const MAGIC: u32 = 0x4061_4061;
    pub const VERSION: u32 = 5;

    /// 魔数与版本号是否匹配
    pub fn is_compatible(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::VERSION
    }
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            lanes: [StoredLane::default(); LANE_COUNT],
            active_lane: 0,
            boot_mode: BootMode::default(),
        }
    }
}

/// 以 JSON 文件保存设置（主机仿真用）
///
/// 先写临时文件再重命名，避免写到一半断电留下残缺记录。
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<StoredSettings>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let settings = serde_json::from_str(&content)?;
        Ok(Some(settings))
    }

    fn save(&mut self, settings: &StoredSettings) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(settings)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!("settings written to {}", self.path.display());
        Ok(())
    }
}
