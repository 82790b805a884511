//! 主循环集成测试：Loopback 串口 + Mock 硬件

use bmcu_firmware::{FirmwareConfig, Firmware, FirmwareError};
use bmcu_hal::StoredSettings;
use bmcu_hal::mock::{FixedBootSignal, LoopbackTransport, MemoryStore, MockLanes};
use bmcu_protocol::{
    BootMode, CMD_HEARTBEAT, CMD_ONLINE_DETECT, DeviceType, LaneIndex, OnlineDetectReply, Packet,
    decode,
};
use serde_json::Value;

type TestFirmware = Firmware<MockLanes, MemoryStore, LoopbackTransport>;

struct Rig {
    firmware: TestFirmware,
    lanes: MockLanes,
    store: MemoryStore,
    link: LoopbackTransport,
}

fn boot(config: FirmwareConfig, store: MemoryStore, signal: Option<BootMode>) -> Rig {
    let lanes = MockLanes::new();
    let link = LoopbackTransport::new();
    let firmware = Firmware::init(
        config,
        lanes.clone(),
        store.clone(),
        link.clone(),
        &mut FixedBootSignal(signal),
        0,
    )
    .unwrap();
    Rig {
        firmware,
        lanes,
        store,
        link,
    }
}

fn json_lines(bytes: &[u8]) -> Vec<Value> {
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn klipper_mode_is_default() {
    let rig = boot(FirmwareConfig::default(), MemoryStore::new(), None);
    assert_eq!(rig.firmware.boot_mode(), BootMode::Klipper);

    let startup = json_lines(&rig.link.take_tx());
    assert_eq!(startup.len(), 1);
    assert_eq!(startup[0]["event"], "STARTUP");
}

#[test]
fn klipper_requests_get_replies() {
    let mut rig = boot(FirmwareConfig::default(), MemoryStore::new(), None);
    rig.link.take_tx();
    rig.lanes.set_present(LaneIndex::new(3).unwrap(), true);

    rig.link
        .inject(b"{\"id\":1,\"cmd\":\"PING\"}\r\n{\"id\":2,\"cmd\":\"GET_SENSORS\"}\n");
    let report = rig.firmware.run(10);
    assert_eq!(report.replies, 2);
    assert_eq!(report.packets, 0);

    let replies = json_lines(&rig.link.take_tx());
    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[1]["lane"], serde_json::json!([0, 0, 0, 1]));
}

#[test]
fn bambubus_mode_from_boot_signal() {
    let mut rig = boot(
        FirmwareConfig::default(),
        MemoryStore::new(),
        Some(BootMode::BambuBus),
    );
    assert_eq!(rig.firmware.boot_mode(), BootMode::BambuBus);
    assert!(rig.link.take_tx().is_empty());

    let heartbeat = Packet::short_request(CMD_HEARTBEAT, &[]).unwrap().encode();
    for t in [0, 500, 1_000] {
        rig.link.inject(&heartbeat);
        let report = rig.firmware.run(t);
        assert_eq!(report.packets, 1);
        assert_eq!(report.replies, 0);
    }
    assert!(rig.firmware.logic().is_online());

    let detect = Packet::short_request(CMD_ONLINE_DETECT, &[0]).unwrap().encode();
    rig.link.inject(&detect);
    assert_eq!(rig.firmware.run(1_100).replies, 1);

    let tx = rig.link.take_tx();
    let mut cursor = tx.as_slice();
    let reply = decode(&mut cursor).unwrap();
    let detect = OnlineDetectReply::parse(reply.payload()).unwrap();
    assert_eq!(detect.device_type, DeviceType::Ams);
    assert_eq!(detect.lane_count, 4);
}

#[test]
fn stored_boot_mode_is_used_without_signal() {
    let stored = StoredSettings {
        boot_mode: BootMode::BambuBus,
        ..StoredSettings::default()
    };
    let rig = boot(
        FirmwareConfig::default(),
        MemoryStore::with_settings(stored),
        None,
    );
    assert_eq!(rig.firmware.boot_mode(), BootMode::BambuBus);
}

#[test]
fn corrupted_frames_are_counted() {
    let mut rig = boot(
        FirmwareConfig::default(),
        MemoryStore::new(),
        Some(BootMode::BambuBus),
    );
    let mut frame = Packet::short_request(CMD_ONLINE_DETECT, &[0])
        .unwrap()
        .encode()
        .as_bytes()
        .to_vec();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    rig.link.inject(&frame);

    let report = rig.firmware.run(10);
    assert_eq!(report.received, frame.len());
    assert_eq!(report.decode_errors, 1);
    assert_eq!(report.replies, 0);
    assert!(rig.link.take_tx().is_empty());
}

#[test]
fn settings_flush_waits_for_quiet_host() {
    let mut config = FirmwareConfig::default();
    config.timing.save_debounce_ms = 100;
    config.klipper.idle_ms = 500;
    let mut rig = boot(config, MemoryStore::new(), None);

    rig.link
        .inject(b"{\"cmd\":\"SET_FILAMENT_INFO\",\"lane\":0,\"name\":\"PETG\"}\n");
    rig.firmware.run(0);
    assert!(rig.firmware.logic().is_dirty());

    rig.link.inject(b"{\"cmd\":\"PING\"}\n");
    assert!(!rig.firmware.run(200).saved);
    assert!(!rig.firmware.run(700).saved);
    assert_eq!(rig.store.save_count(), 0);

    assert!(rig.firmware.run(701).saved);
    assert_eq!(rig.store.save_count(), 1);
    let stored = rig.store.stored().unwrap();
    assert_eq!(stored.lanes[0].info.name_str(), "PETG");
    assert_eq!(stored.boot_mode, BootMode::Klipper);
}

#[test]
fn bambubus_flushes_after_debounce() {
    let mut config = FirmwareConfig::default();
    config.timing.save_debounce_ms = 100;
    let mut rig = boot(config, MemoryStore::new(), Some(BootMode::BambuBus));

    // 启动模式变化本身需要保存
    assert!(rig.firmware.logic().is_dirty());
    assert!(!rig.firmware.run(50).saved);
    assert!(rig.firmware.run(100).saved);
    assert_eq!(rig.store.stored().unwrap().boot_mode, BootMode::BambuBus);
}

#[test]
fn write_failures_do_not_stop_the_loop() {
    let mut rig = boot(FirmwareConfig::default(), MemoryStore::new(), None);
    rig.link.take_tx();
    rig.link.fail_writes(true);

    rig.link.inject(b"{\"cmd\":\"PING\"}\n");
    let report = rig.firmware.run(10);
    assert_eq!(report.replies, 1);
    assert!(rig.link.take_tx().is_empty());

    rig.link.fail_writes(false);
    rig.link.inject(b"{\"cmd\":\"PING\"}\n");
    rig.firmware.run(20);
    assert_eq!(json_lines(&rig.link.take_tx()).len(), 1);
}

#[test]
fn startup_write_failure_fails_init() {
    let link = LoopbackTransport::new();
    link.fail_writes(true);
    let result = Firmware::init(
        FirmwareConfig::default(),
        MockLanes::new(),
        MemoryStore::new(),
        link,
        &mut FixedBootSignal(None),
        0,
    );
    assert!(matches!(result, Err(FirmwareError::Transport(_))));
}

#[test]
fn stop_all_halts_every_lane() {
    let mut rig = boot(FirmwareConfig::default(), MemoryStore::new(), None);
    rig.link
        .inject(b"{\"cmd\":\"MOVE\",\"axis\":\"2\",\"dist_mm\":100,\"speed\":20}\n");
    rig.firmware.run(0);
    let lane = LaneIndex::new(2).unwrap();
    assert_eq!(rig.lanes.direction(lane), bmcu_hal::AxisDirection::Feed);

    rig.firmware.stop_all();
    assert_eq!(rig.lanes.direction(lane), bmcu_hal::AxisDirection::Stop);
}
