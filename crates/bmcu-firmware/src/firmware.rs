//! 固件主循环

use crate::FirmwareError;
use crate::boot::init_boot_check;
use crate::config::FirmwareConfig;
use bmcu_engine::{BambuEngine, DeviceIdentity, KlipperCli, STARTUP_LINE};
use bmcu_hal::{BootSignal, ByteTransport, LaneHardware, SettingsStore};
use bmcu_logic::ControlLogic;
use bmcu_protocol::{BootMode, StreamDecoder};
use tracing::{debug, info, warn};

/// 每次 `run` 最多读取的字节数
pub const RX_CHUNK_LEN: usize = 256;

/// 单次 `run` 的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 读到的字节数
    pub received: usize,
    /// 解码出的 BambuBus 包数
    pub packets: usize,
    /// 丢弃的帧数（校验失败、帧头错误）
    pub decode_errors: usize,
    /// 写出的回复数（包或 JSON 行）
    pub replies: usize,
    /// 本次写入了设置
    pub saved: bool,
}

/// 按启动模式选择的前端
#[derive(Debug)]
enum Frontend {
    BambuBus {
        engine: BambuEngine,
        decoder: StreamDecoder,
    },
    Klipper {
        cli: KlipperCli,
    },
}

/// 固件实例
///
/// 拥有控制逻辑与传输层；启动模式在 [`Firmware::init`] 中确定后不再改变。
pub struct Firmware<H, S, T> {
    config: FirmwareConfig,
    identity: DeviceIdentity,
    logic: ControlLogic<H, S>,
    transport: T,
    frontend: Frontend,
}

impl<H, S, T> Firmware<H, S, T>
where
    H: LaneHardware,
    S: SettingsStore,
    T: ByteTransport,
{
    /// 初始化
    ///
    /// 加载设置、判定启动模式、构建设备身份；Klipper 模式下发送启动事件行。
    pub fn init<B: BootSignal + ?Sized>(
        config: FirmwareConfig,
        hardware: H,
        store: S,
        mut transport: T,
        boot_signal: &mut B,
        now: u64,
    ) -> Result<Self, FirmwareError> {
        config.validate()?;

        let mut logic = ControlLogic::new(config.timing.clone(), hardware, store);
        let stored = logic.load_settings();
        let boot_mode = init_boot_check(boot_signal, stored, config.device.default_boot_mode);
        logic.set_boot_mode(boot_mode, now);

        let identity = DeviceIdentity {
            serial_number: config.device.serial_number.clone(),
            ..DeviceIdentity::new(config.device.device_type, config.device.unit_index, boot_mode)
        };

        let frontend = match boot_mode {
            BootMode::BambuBus => Frontend::BambuBus {
                engine: BambuEngine::new(identity.clone()),
                decoder: StreamDecoder::new(),
            },
            BootMode::Klipper => {
                transport.write(STARTUP_LINE.as_bytes())?;
                Frontend::Klipper {
                    cli: KlipperCli::new(identity.version.clone()),
                }
            },
        };
        info!(
            "firmware ready: {:?} unit {} as {:?}",
            boot_mode, identity.unit_index, identity.device_type
        );

        let mut firmware = Self {
            config,
            identity,
            logic,
            transport,
            frontend,
        };
        firmware.logic.tick(now);
        Ok(firmware)
    }

    /// 执行一次有界的处理
    ///
    /// 读取至多 [`RX_CHUNK_LEN`] 字节、分发、写回复、推进控制逻辑，
    /// 最后按去抖规则写入设置（Klipper 模式下仅在主机空闲时写入）。
    /// 传输错误只记录日志。
    pub fn run(&mut self, now: u64) -> TickReport {
        let mut report = TickReport::default();
        let mut rx = [0u8; RX_CHUNK_LEN];
        match self.transport.read(&mut rx) {
            Ok(n) => report.received = n.min(RX_CHUNK_LEN),
            Err(e) => warn!("transport read failed: {}", e),
        }
        let bytes = &rx[..report.received];

        let mut tx = Vec::new();
        let may_flush = match &mut self.frontend {
            Frontend::BambuBus { engine, decoder } => {
                for &byte in bytes {
                    match decoder.push(byte) {
                        Ok(Some(packet)) => {
                            report.packets += 1;
                            if let Some(reply) = engine.handle(&mut self.logic, &packet, now) {
                                tx.extend_from_slice(reply.encode().as_bytes());
                                report.replies += 1;
                            }
                        },
                        Ok(None) => {},
                        Err(e) => {
                            debug!("frame dropped: {}", e);
                            report.decode_errors += 1;
                        },
                    }
                }
                true
            },
            Frontend::Klipper { cli } => {
                report.replies = cli.feed(bytes, &mut self.logic, now, &mut tx);
                cli.is_idle(now, self.config.klipper.idle_ms)
            },
        };

        if !tx.is_empty() {
            if let Err(e) = self.transport.write(&tx) {
                warn!("transport write failed: {}", e);
            }
        }

        self.logic.tick(now);
        if may_flush {
            report.saved = self.logic.flush_settings(now);
        }
        report
    }

    /// 立即停止所有通道
    pub fn stop_all(&mut self) {
        self.logic.stop_all();
    }

    pub fn boot_mode(&self) -> BootMode {
        self.identity.boot_mode
    }

    /// 当前设备身份（BambuBus 模式下设备类型可能被总线重新配置）
    pub fn identity(&self) -> &DeviceIdentity {
        match &self.frontend {
            Frontend::BambuBus { engine, .. } => engine.identity(),
            Frontend::Klipper { .. } => &self.identity,
        }
    }

    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    pub fn logic(&self) -> &ControlLogic<H, S> {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut ControlLogic<H, S> {
        &mut self.logic
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
