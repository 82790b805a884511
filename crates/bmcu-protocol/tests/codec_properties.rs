//! 编解码属性测试
//!
//! 使用 proptest 验证往返一致性与单比特损坏检测，使用 rand 验证噪声流中的重新同步。

use bmcu_protocol::*;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn short_packet() -> impl Strategy<Value = Packet> {
    let head = prop_oneof![
        Just(HEAD_SHORT_REQUEST),
        Just(HEAD_SHORT_REPLY),
        any::<u8>().prop_map(|h| h | SHORT_LAYOUT_FLAG),
    ];
    (
        head,
        any::<u8>(),
        prop::collection::vec(any::<u8>(), 0..=64),
    )
        .prop_map(|(head, command, payload)| Packet::short(head, command, &payload).unwrap())
}

fn long_packet() -> impl Strategy<Value = Packet> {
    let head = prop_oneof![
        Just(HEAD_LONG_REQUEST),
        Just(HEAD_LONG_REPLY),
        any::<u8>().prop_map(|h| h & !SHORT_LAYOUT_FLAG),
    ];
    let type_id = prop_oneof![
        Just(TYPE_MC_ONLINE),
        Just(TYPE_READ_FILAMENT_INFO),
        Just(TYPE_SET_FILAMENT_INFO_TYPE2),
        Just(TYPE_VERSION),
        Just(TYPE_SERIAL_NUMBER),
        any::<u16>(),
    ];
    (
        head,
        any::<u16>(),
        any::<u16>(),
        any::<u16>(),
        type_id,
        prop::collection::vec(any::<u8>(), 0..=256),
    )
        .prop_map(|(head, number, target, source, type_id, payload)| {
            let data = LongPacketData {
                package_number: number,
                target_address: target,
                source_address: source,
                type_id,
            };
            Packet::long(head, data, &payload).unwrap()
        })
}

fn any_packet() -> impl Strategy<Value = Packet> {
    prop_oneof![short_packet(), long_packet()]
}

/// CRC8 之后的区域（负载与帧尾），只受 CRC16 保护
fn checksum_region_start(packet: &Packet) -> usize {
    if packet.header().is_short() {
        SHORT_HEADER_LEN
    } else {
        LONG_CRC8_OFFSET + 1
    }
}

proptest! {
    /// 测试切片解码往返
    #[test]
    fn decode_encode_roundtrip(packet in any_packet()) {
        let frame = packet.encode();
        prop_assert_eq!(frame.len(), packet.frame_len());
        let mut cursor: &[u8] = &frame;
        let decoded = decode(&mut cursor).unwrap();
        prop_assert!(cursor.is_empty());
        prop_assert_eq!(decoded, packet);
    }

    /// 测试流式解码往返
    #[test]
    fn stream_decode_roundtrip(packet in any_packet()) {
        let frame = packet.encode();
        let mut decoder = StreamDecoder::new();
        let mut decoded = None;
        for &b in frame.iter() {
            if let Some(p) = decoder.push(b).unwrap() {
                decoded = Some(p);
            }
        }
        prop_assert_eq!(decoded, Some(packet));
    }

    /// 测试校验区单比特翻转一定被拒绝
    #[test]
    fn single_bit_flip_is_checksum_error(
        packet in any_packet(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = packet.encode().as_bytes().to_vec();
        let start = checksum_region_start(&packet);
        let index = start + position.index(bytes.len() - start);
        bytes[index] ^= 1 << bit;

        let mut cursor: &[u8] = &bytes;
        prop_assert_eq!(decode(&mut cursor), Err(DecodeError::Checksum));
        prop_assert!(cursor.is_empty());
    }

    /// 测试帧头单比特翻转被当作同步错误
    #[test]
    fn header_bit_flip_is_framing_error(packet in any_packet(), bit in 0u8..8) {
        let mut bytes = packet.encode().as_bytes().to_vec();
        let crc8_at = checksum_region_start(&packet) - 1;
        bytes[crc8_at] ^= 1 << bit;

        let mut cursor: &[u8] = &bytes;
        prop_assert_eq!(decode(&mut cursor), Err(DecodeError::Framing { skipped: 1 }));
    }
}

#[test]
fn noisy_stream_recovers_every_frame() {
    let mut rng = StdRng::seed_from_u64(0x3D3D);
    let mut stream = Vec::new();
    let mut expected = Vec::new();

    for i in 0..50u8 {
        // 噪声中不含帧起始字节
        let noise = rng.gen_range(0..12);
        for _ in 0..noise {
            let mut b: u8 = rng.r#gen();
            if b == FRAME_START {
                b = 0x00;
            }
            stream.push(b);
        }
        let packet = if i % 2 == 0 {
            Packet::short_request(CMD_HEARTBEAT, &[]).unwrap()
        } else {
            Packet::short_request(CMD_REQX6, &[i]).unwrap()
        };
        stream.extend_from_slice(&packet.encode());
        expected.push(packet);
    }

    // 切片解码
    let mut cursor: &[u8] = &stream;
    let mut decoded = Vec::new();
    while !cursor.is_empty() {
        match decode(&mut cursor) {
            Ok(packet) => decoded.push(packet),
            Err(DecodeError::Framing { .. }) => continue,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(decoded, expected);

    // 流式解码
    let mut decoder = StreamDecoder::new();
    let mut streamed = Vec::new();
    for &b in &stream {
        if let Ok(Some(packet)) = decoder.push(b) {
            streamed.push(packet);
        }
    }
    assert_eq!(streamed, expected);
    assert!(decoder.discarded() > 0);
}
