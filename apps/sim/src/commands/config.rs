//! 打印配置

use anyhow::Result;
use bmcu_firmware::FirmwareConfig;
use clap::Args;

/// 打印生效的配置（未指定 `--config` 时为默认配置）
#[derive(Args, Debug)]
pub struct ConfigCommand {}

impl ConfigCommand {
    pub fn execute(&self, config: &FirmwareConfig) -> Result<()> {
        print!("{}", config.to_toml_string()?);
        Ok(())
    }
}
