//! BambuBus 仿真
//!
//! 按顺序送入请求帧，每帧之间推进一个仿真步长，打印回复帧。

use crate::utils::{describe, parse_hex, parse_lanes};
use anyhow::Result;
use bmcu_firmware::{Firmware, FirmwareConfig};
use bmcu_hal::mock::{FixedBootSignal, LoopbackTransport, MemoryStore, MockLanes};
use bmcu_protocol::{BootMode, LaneIndex, decode};
use clap::Args;

/// 插入耗材通道的压力电压（正常区间）
const RESTING_PRESSURE_VOLTS: f32 = 1.65;

/// 仿真命令参数
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// 请求帧（十六进制），可重复
    #[arg(short, long = "frame")]
    pub frames: Vec<String>,

    /// 插有耗材的通道，如 `0,2`
    #[arg(long, default_value = "")]
    pub present: String,

    /// 所有帧处理完后额外推进的次数
    #[arg(long, default_value_t = 1)]
    pub ticks: u32,

    /// 每步的仿真时间（ms）
    #[arg(long, default_value_t = 100)]
    pub step_ms: u64,
}

impl SimulateCommand {
    pub fn execute(&self, config: FirmwareConfig) -> Result<()> {
        for line in self.run(config)? {
            println!("{}", line);
        }
        Ok(())
    }

    /// 运行仿真，返回输出行
    pub fn run(&self, config: FirmwareConfig) -> Result<Vec<String>> {
        let frames = self
            .frames
            .iter()
            .map(|frame| parse_hex(frame))
            .collect::<Result<Vec<_>>>()?;

        let lanes = MockLanes::new();
        for lane in parse_lanes(&self.present)? {
            lanes.set_present(lane, true);
            lanes.set_pressure(lane, RESTING_PRESSURE_VOLTS);
        }
        let link = LoopbackTransport::new();
        let mut firmware = Firmware::init(
            config,
            lanes.clone(),
            MemoryStore::new(),
            link.clone(),
            &mut FixedBootSignal(Some(BootMode::BambuBus)),
            0,
        )?;

        let mut now = 0;
        let mut lines = Vec::new();
        for frame in &frames {
            link.inject(frame);
            // 长帧可能超过单次读取上限
            while link.pending_rx() > 0 {
                now += self.step_ms;
                lanes.simulate(self.step_ms);
                firmware.run(now);
            }

            let tx = link.take_tx();
            let mut cursor = tx.as_slice();
            while !cursor.is_empty() {
                let before = cursor;
                let packet = decode(&mut cursor)?;
                let raw = &before[..before.len() - cursor.len()];
                lines.push(format!("> {}", hex::encode_upper(raw)));
                lines.push(format!("  {}", describe(&packet)));
            }
        }

        for _ in 0..self.ticks {
            now += self.step_ms;
            lanes.simulate(self.step_ms);
            firmware.run(now);
        }

        let logic = firmware.logic();
        lines.push(format!(
            "t={}ms online={} device={:?}",
            now,
            logic.is_online(),
            firmware.identity().device_type
        ));
        for lane in LaneIndex::ALL {
            let state = logic.lane(lane);
            lines.push(format!(
                "lane {}: {:?} {} {} meters={:.2}",
                lane,
                state.status(),
                state.motion().as_str(),
                logic.drive_mode(lane).as_str(),
                state.meters()
            ));
        }
        Ok(lines)
    }
}
