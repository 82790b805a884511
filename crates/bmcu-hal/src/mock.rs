//! Mock 硬件
//!
//! 所有替身都是可克隆的共享句柄：一份交给被测代码，一份留在测试中
//! 用来注入传感器状态、检查下发的命令。

use crate::{
    AxisDirection, BootSignal, ByteTransport, Clock, HalError, LaneHardware, SensorReading,
    SettingsStore, StorageError, StoredSettings,
};
use bmcu_protocol::{BootMode, LANE_COUNT, LaneIndex};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// 通道硬件
// ============================================================================

/// 单通道模拟状态
#[derive(Debug, Clone, Copy, Default)]
pub struct MockLane {
    pub reading: SensorReading,
    pub direction: AxisDirection,
    pub odometer_mm: f32,
    /// 0 表示未设置，按默认速度积分
    pub speed_mm_s: f32,
}

#[derive(Debug, Default)]
struct MockLaneBank {
    lanes: [MockLane; LANE_COUNT],
    commands: Vec<(LaneIndex, AxisDirection)>,
    fail_sensors: bool,
}

/// 模拟通道电机与传感器
#[derive(Debug, Clone, Default)]
pub struct MockLanes {
    bank: Arc<Mutex<MockLaneBank>>,
}

impl MockLanes {
    /// 未设置速度时的积分速度（mm/s）
    pub const DEFAULT_SPEED_MM_S: f32 = 50.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_present(&self, lane: LaneIndex, present: bool) {
        self.bank.lock().lanes[lane.as_usize()].reading.present = present;
    }

    pub fn set_at_outlet(&self, lane: LaneIndex, at_outlet: bool) {
        self.bank.lock().lanes[lane.as_usize()].reading.at_outlet = at_outlet;
    }

    pub fn set_pressure(&self, lane: LaneIndex, volts: f32) {
        self.bank.lock().lanes[lane.as_usize()].reading.pressure_volts = volts;
    }

    /// 直接推进编码器里程
    pub fn advance_odometer(&self, lane: LaneIndex, mm: f32) {
        self.bank.lock().lanes[lane.as_usize()].odometer_mm += mm;
    }

    /// 按当前方向与速度积分 `elapsed_ms` 的里程
    pub fn simulate(&self, elapsed_ms: u64) {
        let mut bank = self.bank.lock();
        for lane in bank.lanes.iter_mut() {
            let speed = if lane.speed_mm_s > 0.0 {
                lane.speed_mm_s
            } else {
                Self::DEFAULT_SPEED_MM_S
            };
            lane.odometer_mm += lane.direction.sign() * speed * elapsed_ms as f32 / 1000.0;
        }
    }

    /// 让传感器读取失败
    pub fn fail_sensors(&self, fail: bool) {
        self.bank.lock().fail_sensors = fail;
    }

    pub fn lane(&self, lane: LaneIndex) -> MockLane {
        self.bank.lock().lanes[lane.as_usize()]
    }

    pub fn direction(&self, lane: LaneIndex) -> AxisDirection {
        self.bank.lock().lanes[lane.as_usize()].direction
    }

    /// 已下发的全部电机命令
    pub fn commands(&self) -> Vec<(LaneIndex, AxisDirection)> {
        self.bank.lock().commands.clone()
    }

    /// 某通道已下发的电机命令
    pub fn commands_for(&self, lane: LaneIndex) -> Vec<AxisDirection> {
        self.bank
            .lock()
            .commands
            .iter()
            .filter(|(l, _)| *l == lane)
            .map(|(_, d)| *d)
            .collect()
    }

    pub fn clear_commands(&self) {
        self.bank.lock().commands.clear();
    }
}

impl LaneHardware for MockLanes {
    fn move_axis(&mut self, lane: LaneIndex, direction: AxisDirection) -> Result<(), HalError> {
        let mut bank = self.bank.lock();
        bank.lanes[lane.as_usize()].direction = direction;
        bank.commands.push((lane, direction));
        Ok(())
    }

    fn set_speed(&mut self, lane: LaneIndex, mm_per_s: f32) -> Result<(), HalError> {
        self.bank.lock().lanes[lane.as_usize()].speed_mm_s = mm_per_s.abs();
        Ok(())
    }

    fn sensor_state(&mut self, lane: LaneIndex) -> Result<SensorReading, HalError> {
        let bank = self.bank.lock();
        if bank.fail_sensors {
            return Err(HalError::Sensor(lane));
        }
        Ok(bank.lanes[lane.as_usize()].reading)
    }

    fn lane_motion(&self, lane: LaneIndex) -> AxisDirection {
        self.direction(lane)
    }

    fn odometer_mm(&mut self, lane: LaneIndex) -> Result<f32, HalError> {
        Ok(self.bank.lock().lanes[lane.as_usize()].odometer_mm)
    }
}

// ============================================================================
// 设置存储
// ============================================================================

#[derive(Debug, Default)]
struct MemoryStoreState {
    settings: Option<StoredSettings>,
    fail: bool,
    saves: usize,
}

/// 内存设置存储，可按需模拟写入失败
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一份已保存的设置
    pub fn with_settings(settings: StoredSettings) -> Self {
        let store = Self::default();
        store.state.lock().settings = Some(settings);
        store
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.lock().fail = fail;
    }

    /// 成功保存的次数
    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    pub fn stored(&self) -> Option<StoredSettings> {
        self.state.lock().settings.clone()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&mut self) -> Result<Option<StoredSettings>, StorageError> {
        let state = self.state.lock();
        if state.fail {
            return Err(StorageError::Backend("simulated read failure".to_string()));
        }
        Ok(state.settings.clone())
    }

    fn save(&mut self, settings: &StoredSettings) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.fail {
            return Err(StorageError::Backend("simulated write failure".to_string()));
        }
        state.settings = Some(settings.clone());
        state.saves += 1;
        Ok(())
    }
}

// ============================================================================
// 时钟
// ============================================================================

/// 手动推进的时钟
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) -> u64 {
        self.now.fetch_add(ms, Ordering::Relaxed) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

// ============================================================================
// 字节传输
// ============================================================================

#[derive(Debug, Default)]
struct LoopbackState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    fail_writes: bool,
}

/// 回环传输：测试端注入接收字节、取出发送字节
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入待接收的字节
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// 取出并清空已发送的字节
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().tx)
    }

    pub fn pending_rx(&self) -> usize {
        self.state.lock().rx.len()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

impl ByteTransport for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        let mut state = self.state.lock();
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(HalError::Closed);
        }
        state.tx.extend_from_slice(bytes);
        Ok(())
    }
}

// ============================================================================
// 启动信号
// ============================================================================

/// 固定结果的启动信号
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBootSignal(pub Option<BootMode>);

impl BootSignal for FixedBootSignal {
    fn sample(&mut self) -> Option<BootMode> {
        self.0
    }
}
