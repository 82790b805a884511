//! Klipper 模式仿真
//!
//! stdin 的字节由读线程注入 Loopback 串口，主循环把回复写到 stdout。
//! Ctrl-C 或 stdin 结束时停止所有电机并保存设置。

use crate::store::SimStore;
use crate::utils::parse_lanes;
use anyhow::{Context, Result};
use bmcu_firmware::{Firmware, FirmwareConfig};
use bmcu_hal::mock::{FixedBootSignal, LoopbackTransport, MockLanes};
use bmcu_hal::{Clock, MonotonicClock};
use bmcu_protocol::BootMode;
use clap::Args;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Klipper 模式参数
#[derive(Args, Debug)]
pub struct KlipperCommand {
    /// 设置文件（JSON），不指定时只保存在内存中
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// 插有耗材的通道，如 `0,2`
    #[arg(long, default_value = "")]
    pub present: String,

    /// 主循环周期（ms）
    #[arg(long, default_value_t = 5)]
    pub period_ms: u64,
}

impl KlipperCommand {
    pub fn execute(&self, config: FirmwareConfig) -> Result<()> {
        let lanes = MockLanes::new();
        for lane in parse_lanes(&self.present)? {
            lanes.set_present(lane, true);
            lanes.set_at_outlet(lane, true);
            lanes.set_pressure(lane, 1.65);
        }

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })
        .context("failed to set Ctrl-C handler")?;

        let link = LoopbackTransport::new();
        let eof = Arc::new(AtomicBool::new(false));
        spawn_stdin_reader(link.clone(), eof.clone());

        let clock = MonotonicClock::new();
        let mut firmware = Firmware::init(
            config,
            lanes.clone(),
            SimStore::open(self.settings.as_deref()),
            link.clone(),
            &mut FixedBootSignal(Some(BootMode::Klipper)),
            clock.now_ms(),
        )?;

        let mut stdout = io::stdout();
        let mut last = clock.now_ms();
        loop {
            flush_tx(&link, &mut stdout)?;
            if !running.load(Ordering::SeqCst) {
                info!("interrupted, stopping all lanes");
                break;
            }
            if eof.load(Ordering::SeqCst) && link.pending_rx() == 0 {
                info!("stdin closed");
                break;
            }

            let now = clock.now_ms();
            lanes.simulate(now.saturating_sub(last));
            last = now;
            firmware.run(now);
            thread::sleep(Duration::from_millis(self.period_ms));
        }

        firmware.stop_all();
        if firmware.logic().is_dirty() {
            firmware
                .logic_mut()
                .save_settings()
                .context("failed to save settings")?;
        }
        flush_tx(&link, &mut stdout)
    }
}

fn spawn_stdin_reader(link: LoopbackTransport, eof: Arc<AtomicBool>) {
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 512];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => link.inject(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                },
            }
        }
        eof.store(true, Ordering::SeqCst);
    });
}

fn flush_tx(link: &LoopbackTransport, out: &mut impl Write) -> Result<()> {
    let tx = link.take_tx();
    if !tx.is_empty() {
        out.write_all(&tx)?;
        out.flush()?;
    }
    Ok(())
}
