//! 帧校验
//!
//! - CRC8：多项式 0x39，初值 0x66，不反射，无终值异或（帧头）
//! - CRC16：多项式 0x1021，初值 0x913D，不反射，无终值异或（整帧，帧尾小端）

pub const CRC8_POLY: u8 = 0x39;
pub const CRC8_INIT: u8 = 0x66;
pub const CRC16_POLY: u16 = 0x1021;
pub const CRC16_INIT: u16 = 0x913D;

/// 帧头 CRC8
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = CRC8_INIT;
    for &b in bytes {
        crc ^= b;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// 帧尾 CRC16
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
