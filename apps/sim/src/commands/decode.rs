//! 解析十六进制抓包

use crate::utils::{describe, parse_hex};
use anyhow::Result;
use bmcu_protocol::{DecodeError, decode};
use clap::Args;

/// 解析抓包命令参数
#[derive(Args, Debug)]
pub struct DecodeCommand {
    /// 十六进制字节，可分多段给出
    #[arg(required = true)]
    pub hex: Vec<String>,
}

impl DecodeCommand {
    pub fn execute(&self) -> Result<()> {
        let bytes = parse_hex(&self.hex.join(" "))?;
        for line in decode_all(&bytes) {
            println!("{}", line);
        }
        Ok(())
    }
}

/// 逐帧解码，每帧或每个错误一行，行首为字节偏移
pub fn decode_all(bytes: &[u8]) -> Vec<String> {
    let mut cursor = bytes;
    let mut lines = Vec::new();
    loop {
        let offset = bytes.len() - cursor.len();
        match decode(&mut cursor) {
            Ok(packet) => lines.push(format!("@{:04} {}", offset, describe(&packet))),
            Err(DecodeError::Incomplete) => {
                if !cursor.is_empty() {
                    lines.push(format!(
                        "@{:04} incomplete frame ({} bytes)",
                        offset,
                        cursor.len()
                    ));
                }
                break;
            },
            Err(e) => lines.push(format!("@{:04} {}", offset, e)),
        }
    }
    lines
}
