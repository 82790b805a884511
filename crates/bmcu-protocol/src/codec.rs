//! 帧编码与解码
//!
//! - [`Packet::encode`]：`Packet` → 完整帧（含 CRC8/CRC16）
//! - [`decode`]：从字节切片游标解出一个包，游标随之前移
//! - [`StreamDecoder`]：逐字节接收，适合串口中断/轮询场景
//!
//! 错误处理策略：
//! - 帧起始前的杂散字节：跳到下一个 `0x3D`，报告 `Framing`
//! - 帧头 CRC8 错误或长度越界：丢弃 1 字节后重新同步，报告 `Framing`
//! - 帧尾 CRC16 错误：整帧丢弃，报告 `Checksum`
//! - 数据不足：`Incomplete`，游标不动

use crate::constants::*;
use crate::crc::{crc8, crc16};
use crate::packet::{Header, LongPacketData, Packet};
use crate::u16_le;
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// 重新同步时最多扫描的字节数
pub const RESYNC_WINDOW: usize = MAX_FRAME_LEN;

/// 解码错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// 帧起始/帧头无效，已丢弃 `skipped` 字节
    #[error("Framing error: {skipped} byte(s) discarded")]
    Framing { skipped: usize },

    /// CRC16 不匹配，整帧已丢弃
    #[error("Checksum mismatch: frame discarded")]
    Checksum,

    /// 数据不足，等待更多字节
    #[error("Incomplete frame")]
    Incomplete,
}

// ============================================================================
// 编码
// ============================================================================

/// 编码后的完整帧（固定容量，无堆分配）
#[derive(Clone)]
pub struct WireFrame {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl WireFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for WireFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for WireFrame {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for WireFrame {}

impl fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireFrame[")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, "]")
    }
}

impl Packet {
    /// 编码为完整帧
    pub fn encode(&self) -> WireFrame {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = self.frame_len();
        let payload = self.payload();

        buf[0] = FRAME_START;
        match *self.header() {
            Header::Short { head, command } => {
                buf[1] = head;
                buf[2] = len as u8;
                buf[3] = crc8(&buf[..3]);
                buf[4] = command;
                buf[5..5 + payload.len()].copy_from_slice(payload);
            },
            Header::Long { head, data } => {
                buf[1] = head;
                buf[2..4].copy_from_slice(&data.package_number.to_le_bytes());
                buf[4..6].copy_from_slice(&(len as u16).to_le_bytes());
                buf[LONG_CRC8_OFFSET] = crc8(&buf[..LONG_CRC8_OFFSET]);
                buf[7..9].copy_from_slice(&data.target_address.to_le_bytes());
                buf[9..11].copy_from_slice(&data.source_address.to_le_bytes());
                buf[11..13].copy_from_slice(&data.type_id.to_le_bytes());
                buf[LONG_HEADER_LEN..LONG_HEADER_LEN + payload.len()].copy_from_slice(payload);
            },
        }

        let crc = crc16(&buf[..len - CRC16_LEN]);
        buf[len - CRC16_LEN..len].copy_from_slice(&crc.to_le_bytes());
        WireFrame { data: buf, len }
    }
}

// ============================================================================
// 解码
// ============================================================================

/// 对以 `0x3D` 开头的缓冲区做帧检查
enum Inspect {
    NeedMore,
    BadHeader,
    BadChecksum { len: usize },
    Frame { len: usize },
}

fn inspect(buf: &[u8]) -> Inspect {
    if buf.len() < 2 {
        return Inspect::NeedMore;
    }
    let short = buf[1] & SHORT_LAYOUT_FLAG != 0;
    let crc8_at = if short { 3 } else { LONG_CRC8_OFFSET };
    if buf.len() <= crc8_at {
        return Inspect::NeedMore;
    }
    if crc8(&buf[..crc8_at]) != buf[crc8_at] {
        return Inspect::BadHeader;
    }

    let (len, min, max) = if short {
        (buf[2] as usize, SHORT_MIN_FRAME_LEN, SHORT_MAX_FRAME_LEN)
    } else {
        (u16_le(buf, 4) as usize, LONG_MIN_FRAME_LEN, MAX_FRAME_LEN)
    };
    if len < min || len > max {
        return Inspect::BadHeader;
    }
    if buf.len() < len {
        return Inspect::NeedMore;
    }
    if u16_le(buf, len - CRC16_LEN) != crc16(&buf[..len - CRC16_LEN]) {
        return Inspect::BadChecksum { len };
    }
    Inspect::Frame { len }
}

/// 从校验通过的完整帧构造 `Packet`
fn packet_from_frame(frame: &[u8]) -> Result<Packet, DecodeError> {
    let body_end = frame.len() - CRC16_LEN;
    let (header, payload) = if frame[1] & SHORT_LAYOUT_FLAG != 0 {
        (
            Header::Short {
                head: frame[1],
                command: frame[SHORT_HEADER_LEN],
            },
            &frame[SHORT_HEADER_LEN + 1..body_end],
        )
    } else {
        (
            Header::Long {
                head: frame[1],
                data: LongPacketData {
                    package_number: u16_le(frame, 2),
                    target_address: u16_le(frame, 7),
                    source_address: u16_le(frame, 9),
                    type_id: u16_le(frame, 11),
                },
            },
            &frame[LONG_HEADER_LEN..body_end],
        )
    };
    // 长度已由 inspect 限定在容量内
    Packet::from_parts(header, payload).map_err(|_| DecodeError::Framing { skipped: 1 })
}

/// 从切片游标解码一个包
///
/// 成功时游标前移一整帧；`Incomplete` 时游标不动；
/// 其余错误按模块文档描述前移以便重新同步。
///
/// ```rust
/// use bmcu_protocol::{Packet, decode, CMD_HEARTBEAT};
///
/// let frame = Packet::short_request(CMD_HEARTBEAT, &[]).unwrap().encode();
/// let mut cursor: &[u8] = &frame;
/// let packet = decode(&mut cursor).unwrap();
/// assert!(cursor.is_empty());
/// assert_eq!(packet.payload(), &[] as &[u8]);
/// ```
pub fn decode(cursor: &mut &[u8]) -> Result<Packet, DecodeError> {
    let buf = *cursor;
    if buf.is_empty() {
        return Err(DecodeError::Incomplete);
    }

    if buf[0] != FRAME_START {
        let window = buf.len().min(RESYNC_WINDOW);
        let skipped = buf[..window]
            .iter()
            .position(|&b| b == FRAME_START)
            .unwrap_or(window);
        *cursor = &buf[skipped..];
        return Err(DecodeError::Framing { skipped });
    }

    match inspect(buf) {
        Inspect::NeedMore => Err(DecodeError::Incomplete),
        Inspect::BadHeader => {
            *cursor = &buf[1..];
            Err(DecodeError::Framing { skipped: 1 })
        },
        Inspect::BadChecksum { len } => {
            *cursor = &buf[len..];
            Err(DecodeError::Checksum)
        },
        Inspect::Frame { len } => {
            let packet = packet_from_frame(&buf[..len]);
            *cursor = &buf[len..];
            packet
        },
    }
}

// ============================================================================
// 流式解码
// ============================================================================

/// 逐字节流式解码器
///
/// 空闲时丢弃 `0x3D` 之前的字节（计入 [`StreamDecoder::discarded`]，不报错），
/// 帧头损坏时在已缓存字节中寻找下一个 `0x3D` 继续。
#[derive(Debug)]
pub struct StreamDecoder {
    buf: heapless::Vec<u8, MAX_FRAME_LEN>,
    discarded: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            discarded: 0,
        }
    }

    /// 输入一个字节
    ///
    /// 返回 `Ok(Some(packet))` 表示收到完整包，`Ok(None)` 表示需要更多字节。
    pub fn push(&mut self, byte: u8) -> Result<Option<Packet>, DecodeError> {
        if self.buf.is_empty() && byte != FRAME_START {
            self.discarded = self.discarded.saturating_add(1);
            return Ok(None);
        }
        if self.buf.push(byte).is_err() {
            let skipped = self.buf.len();
            self.buf.clear();
            return Err(DecodeError::Framing { skipped });
        }

        match inspect(&self.buf) {
            Inspect::NeedMore => Ok(None),
            Inspect::BadHeader => Err(DecodeError::Framing {
                skipped: self.resync(),
            }),
            Inspect::BadChecksum { .. } => {
                self.buf.clear();
                Err(DecodeError::Checksum)
            },
            Inspect::Frame { len } => {
                let packet = packet_from_frame(&self.buf[..len]);
                self.buf.clear();
                packet.map(Some)
            },
        }
    }

    /// 丢弃到下一个帧起始字节，返回丢弃的字节数
    fn resync(&mut self) -> usize {
        let len = self.buf.len();
        let next = self.buf[1..]
            .iter()
            .position(|&b| b == FRAME_START)
            .map(|p| p + 1)
            .unwrap_or(len);
        self.buf.as_mut_slice().copy_within(next.., 0);
        self.buf.truncate(len - next);
        self.discarded = self.discarded.saturating_add(next);
        next
    }

    /// 当前缓存的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 累计丢弃的字节数
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// 清空缓存
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackageType;

    fn heartbeat_frame() -> WireFrame {
        Packet::short_request(CMD_HEARTBEAT, &[]).unwrap().encode()
    }

    #[test]
    fn test_short_frame_layout() {
        let frame = Packet::short_request(CMD_REQX6, &[0x00]).unwrap().encode();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], FRAME_START);
        assert_eq!(bytes[1], HEAD_SHORT_REQUEST);
        assert_eq!(bytes[2], 8, "长度字段是整帧长度");
        assert_eq!(bytes[3], crc8(&bytes[..3]));
        assert_eq!(bytes[4], CMD_REQX6);
        let crc = crc16(&bytes[..6]);
        assert_eq!(&bytes[6..], &crc.to_le_bytes());
    }

    #[test]
    fn test_long_frame_layout() {
        let data = LongPacketData {
            package_number: 0x0102,
            target_address: 0x0700,
            source_address: 0x0001,
            type_id: TYPE_VERSION,
        };
        let frame = Packet::long_request(data, &[0xAA, 0xBB]).unwrap().encode();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[1], HEAD_LONG_REQUEST);
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);
        assert_eq!(&bytes[4..6], &[17, 0]);
        assert_eq!(bytes[6], crc8(&bytes[..6]));
        assert_eq!(&bytes[7..9], &[0x00, 0x07]);
        assert_eq!(&bytes[9..11], &[0x01, 0x00]);
        assert_eq!(&bytes[11..13], &[0x03, 0x01]);
        assert_eq!(&bytes[13..15], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_advances_cursor() {
        let a = heartbeat_frame();
        let b = Packet::short_request(CMD_REQX6, &[0]).unwrap().encode();
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        let mut cursor: &[u8] = &stream;
        assert_eq!(decode(&mut cursor).unwrap().package_type(), PackageType::Heartbeat);
        assert_eq!(decode(&mut cursor).unwrap().package_type(), PackageType::Reqx6);
        assert!(cursor.is_empty());
        assert_eq!(decode(&mut cursor), Err(DecodeError::Incomplete));
    }

    #[test]
    fn test_decode_incomplete_leaves_cursor() {
        let frame = heartbeat_frame();
        let partial = &frame[..frame.len() - 1];
        let mut cursor: &[u8] = partial;
        assert_eq!(decode(&mut cursor), Err(DecodeError::Incomplete));
        assert_eq!(cursor.len(), partial.len());
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let frame = heartbeat_frame();
        let mut stream = vec![0x00, 0xFF, 0x12];
        stream.extend_from_slice(&frame);

        let mut cursor: &[u8] = &stream;
        assert_eq!(decode(&mut cursor), Err(DecodeError::Framing { skipped: 3 }));
        assert_eq!(decode(&mut cursor).unwrap().package_type(), PackageType::Heartbeat);
    }

    #[test]
    fn test_decode_bad_header_crc() {
        let mut bytes = heartbeat_frame().as_bytes().to_vec();
        bytes[3] ^= 0x01;
        let mut cursor: &[u8] = &bytes;
        assert_eq!(decode(&mut cursor), Err(DecodeError::Framing { skipped: 1 }));
        assert_eq!(cursor.len(), bytes.len() - 1);
    }

    #[test]
    fn test_decode_checksum_discards_frame() {
        let mut bytes = Packet::short_request(CMD_REQX6, &[0]).unwrap().encode().as_bytes().to_vec();
        bytes[5] ^= 0x10;
        let mut cursor: &[u8] = &bytes;
        assert_eq!(decode(&mut cursor), Err(DecodeError::Checksum));
        assert!(cursor.is_empty(), "整帧应被丢弃");
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        // 长包声明长度 1001
        let mut bytes = vec![FRAME_START, HEAD_LONG_REQUEST, 0, 0];
        bytes.extend_from_slice(&1001u16.to_le_bytes());
        let crc = crc8(&bytes);
        bytes.push(crc);
        let mut cursor: &[u8] = &bytes;
        assert_eq!(decode(&mut cursor), Err(DecodeError::Framing { skipped: 1 }));
    }

    #[test]
    fn test_stream_decoder_byte_at_a_time() {
        let frame = Packet::short_request(CMD_ONLINE_DETECT, &[0]).unwrap().encode();
        let mut decoder = StreamDecoder::new();
        let mut result = None;
        for &b in frame.iter() {
            if let Some(packet) = decoder.push(b).unwrap() {
                result = Some(packet);
            }
        }
        assert_eq!(result.unwrap().package_type(), PackageType::OnlineDetect);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_stream_decoder_resyncs_after_bad_header() {
        // 0x3D 后面跟着一个错误的帧头，随后是一个完整的有效帧
        let frame = heartbeat_frame();
        let mut stream = vec![FRAME_START, HEAD_SHORT_REQUEST, 0x07, 0x00];
        stream.extend_from_slice(&frame);

        let mut decoder = StreamDecoder::new();
        let mut packets = 0;
        let mut framing_errors = 0;
        for &b in &stream {
            match decoder.push(b) {
                Ok(Some(_)) => packets += 1,
                Ok(None) => {},
                Err(DecodeError::Framing { .. }) => framing_errors += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(packets, 1);
        assert!(framing_errors >= 1);
    }

    #[test]
    fn test_stream_decoder_checksum_error() {
        let mut bytes = heartbeat_frame().as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        let mut decoder = StreamDecoder::new();
        let mut last_result = Ok(None);
        for &b in &bytes {
            last_result = decoder.push(b);
        }
        assert_eq!(last_result, Err(DecodeError::Checksum));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_wire_frame_debug_hex() {
        let frame = heartbeat_frame();
        let text = format!("{:?}", frame);
        assert!(text.starts_with("WireFrame[3D C5 07"));
    }
}
