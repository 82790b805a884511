//! 参数解析与输出格式化

use anyhow::{Context, Result, bail};
use bmcu_firmware::FirmwareConfig;
use bmcu_protocol::{Header, LaneIndex, Packet};
use std::path::Path;

/// 加载配置文件，未指定时使用默认配置
pub fn load_config(path: Option<&Path>) -> Result<FirmwareConfig> {
    match path {
        Some(path) => FirmwareConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(FirmwareConfig::default()),
    }
}

/// 解析十六进制串，忽略空白、`:`、`-` 与 `0x` 前缀
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text
        .split(|c: char| c.is_whitespace() || c == ':' || c == '-' || c == ',')
        .map(|part| part.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if cleaned.is_empty() {
        bail!("empty hex input");
    }
    hex::decode(&cleaned).with_context(|| format!("invalid hex: {}", text))
}

/// 解析通道列表，如 `0,2,3`
pub fn parse_lanes(text: &str) -> Result<Vec<LaneIndex>> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let index: u8 = part
                .parse()
                .with_context(|| format!("invalid lane '{}'", part))?;
            LaneIndex::new(index).with_context(|| format!("lane {} out of range", index))
        })
        .collect()
}

/// 单行描述一个包
pub fn describe(packet: &Packet) -> String {
    let selector = match packet.header() {
        Header::Short { head, command } => format!("head=0x{:02X} cmd=0x{:02X}", head, command),
        Header::Long { head, data } => format!(
            "head=0x{:02X} pkg={} 0x{:04X}->0x{:04X} type=0x{:03X}",
            head, data.package_number, data.source_address, data.target_address, data.type_id
        ),
    };
    format!(
        "{:?} {:?} {} payload[{}]={}",
        packet.direction(),
        packet.package_type(),
        selector,
        packet.payload().len(),
        hex::encode_upper(packet.payload())
    )
}
