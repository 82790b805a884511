//! 控制逻辑状态机
//!
//! 运动状态只沿两条路径迁移：
//!
//! ```text
//! 装载：Idle → NeedSendOut → InUse
//! 卸载：InUse → NeedPullBack → BeforePullBack → Idle
//! ```
//!
//! 每次调用（一个运动包或一次 tick）最多推进一步，即使传感器显示
//! 后续条件已经满足也不会跳步。超时分别回退到 `Idle`（装载）或
//! `InUse`（卸载），并在通道上挂 `MotionTimeout` 故障。

use crate::LogicError;
use crate::config::LogicConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::lane::{DriveMode, Jog, LaneFault, LaneState, Transition};
use bmcu_hal::{AxisDirection, LaneHardware, SettingsStore, StorageError, StoredLane, StoredSettings};
use bmcu_protocol::{
    BootMode, FilamentInfo, FilamentMotion, FilamentStatus, LANE_COUNT, LaneFlags, LaneIndex,
    MotionCommand, MotionRequest, PressureLevel,
};
use tracing::{debug, info, warn};

/// 单通道余量上限（m）
pub const MAX_METERS: f32 = 3000.0;

/// 控制逻辑
///
/// 持有全部通道状态、连接状态与设置脏标记。硬件与存储通过泛型注入，
/// 测试时可替换为 `bmcu_hal::mock` 中的替身。
pub struct ControlLogic<H, S> {
    config: LogicConfig,
    hardware: H,
    store: S,
    lanes: [LaneState; LANE_COUNT],
    connectivity: ConnectivityMonitor,
    active_lane: LaneIndex,
    boot_mode: BootMode,
    /// 首次标脏的时间
    dirty_since: Option<u64>,
}

impl<H: LaneHardware, S: SettingsStore> ControlLogic<H, S> {
    pub fn new(config: LogicConfig, hardware: H, store: S) -> Self {
        let connectivity =
            ConnectivityMonitor::new(config.heartbeat_timeout_ms, config.heartbeat_threshold);
        Self {
            config,
            hardware,
            store,
            lanes: Default::default(),
            connectivity,
            active_lane: LaneIndex::ALL[0],
            boot_mode: BootMode::default(),
            dirty_since: None,
        }
    }

    // ------------------------------------------------------------------------
    // 访问器
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &LogicConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lane(&self, lane: LaneIndex) -> &LaneState {
        &self.lanes[lane.as_usize()]
    }

    pub fn lanes(&self) -> &[LaneState; LANE_COUNT] {
        &self.lanes
    }

    /// 当前选中的通道（`FEED` 轴的目标）
    pub fn active_lane(&self) -> LaneIndex {
        self.active_lane
    }

    /// 持久化记录中的启动模式
    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // ------------------------------------------------------------------------
    // 设置加载
    // ------------------------------------------------------------------------

    /// 从存储加载设置
    ///
    /// 读取失败或记录不兼容时保持默认值。返回记录中的启动模式。
    pub fn load_settings(&mut self) -> Option<BootMode> {
        let settings = match self.store.load() {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("no stored settings, using defaults");
                return None;
            },
            Err(e) => {
                warn!("failed to load settings: {}", e);
                return None;
            },
        };
        if !settings.is_compatible() {
            warn!(
                "ignoring stored settings (magic 0x{:08X}, version {})",
                settings.magic, settings.version
            );
            return None;
        }

        for (state, stored) in self.lanes.iter_mut().zip(settings.lanes.iter()) {
            state.info = stored.info;
            state.meters = if stored.meters.is_finite() {
                stored.meters.clamp(0.0, MAX_METERS)
            } else {
                0.0
            };
            state.auto_feed = stored.auto_feed;
        }
        self.active_lane = LaneIndex::new(settings.active_lane).unwrap_or(self.active_lane);
        self.boot_mode = settings.boot_mode;
        info!("settings loaded, active lane {}", self.active_lane);
        Some(settings.boot_mode)
    }

    /// 记录本次启动采用的模式，变化时标脏
    pub fn set_boot_mode(&mut self, mode: BootMode, now: u64) {
        if self.boot_mode != mode {
            self.boot_mode = mode;
            self.set_need_to_save(now);
        }
    }

    // ------------------------------------------------------------------------
    // 装载 / 卸载
    // ------------------------------------------------------------------------

    /// 开始装载
    ///
    /// 只接受 `Idle` 通道；其余状态下为空操作（不下发任何硬件命令），
    /// 返回 `false`。`length_mm` 给出时还要求编码器前进至少该距离。
    pub fn start_load_filament(
        &mut self,
        lane: LaneIndex,
        length_mm: Option<u16>,
        now: u64,
    ) -> Result<bool, LogicError> {
        let motion = self.lanes[lane.as_usize()].motion;
        if motion != FilamentMotion::Idle {
            debug!("lane {} load ignored in {}", lane, motion.as_str());
            return Ok(false);
        }

        let origin_mm = self.hardware.odometer_mm(lane)?;
        self.drive(lane, AxisDirection::Feed, self.config.motion_speed_mm_s)?;

        let state = &mut self.lanes[lane.as_usize()];
        state.jog = None;
        state.fault = None;
        state.motion = FilamentMotion::NeedSendOut;
        state.transition = Some(Transition {
            started_ms: now,
            origin_mm,
            length_mm: length_mm.map(f32::from),
        });
        self.select_lane(lane, now);
        info!("lane {} load started", lane);
        Ok(true)
    }

    /// 开始卸载
    ///
    /// 只接受 `InUse` 通道，其余状态下为空操作。`length_mm` 给出时
    /// 要求编码器回退至少该距离后才回到 `Idle`。
    pub fn start_unload_filament(
        &mut self,
        lane: LaneIndex,
        length_mm: Option<u16>,
        now: u64,
    ) -> Result<bool, LogicError> {
        let motion = self.lanes[lane.as_usize()].motion;
        if motion != FilamentMotion::InUse {
            debug!("lane {} unload ignored in {}", lane, motion.as_str());
            return Ok(false);
        }

        let origin_mm = self.hardware.odometer_mm(lane)?;
        self.drive(lane, AxisDirection::Retract, self.config.motion_speed_mm_s)?;

        let state = &mut self.lanes[lane.as_usize()];
        state.jog = None;
        state.fault = None;
        state.motion = FilamentMotion::NeedPullBack;
        state.transition = Some(Transition {
            started_ms: now,
            origin_mm,
            length_mm: length_mm.map(f32::from),
        });
        info!("lane {} unload started", lane);
        Ok(true)
    }

    /// 处理 filament_motion_short 请求，返回处理后的运动状态
    pub fn process_motion_short(
        &mut self,
        request: &MotionRequest,
        now: u64,
    ) -> Result<FilamentMotion, LogicError> {
        self.motion_short_logic(request.lane, request.command, now)?;
        Ok(self.lanes[request.lane.as_usize()].motion)
    }

    /// 处理 filament_motion_long 请求，返回处理后的运动状态
    pub fn process_motion_long(
        &mut self,
        request: &MotionRequest,
        now: u64,
    ) -> Result<FilamentMotion, LogicError> {
        self.motion_long_logic(request.lane, request.command, request.length_mm, now)?;
        Ok(self.lanes[request.lane.as_usize()].motion)
    }

    fn motion_short_logic(
        &mut self,
        lane: LaneIndex,
        command: MotionCommand,
        now: u64,
    ) -> Result<(), LogicError> {
        self.motion_step(lane, command, None, now)
    }

    fn motion_long_logic(
        &mut self,
        lane: LaneIndex,
        command: MotionCommand,
        length_mm: Option<u16>,
        now: u64,
    ) -> Result<(), LogicError> {
        self.motion_step(lane, command, length_mm, now)
    }

    /// 命令能开启新过渡时只做开启，否则按传感器推进一步
    fn motion_step(
        &mut self,
        lane: LaneIndex,
        command: MotionCommand,
        length_mm: Option<u16>,
        now: u64,
    ) -> Result<(), LogicError> {
        match (command, self.lanes[lane.as_usize()].motion) {
            (MotionCommand::SendOut, FilamentMotion::Idle) => {
                self.start_load_filament(lane, length_mm, now)?;
            },
            (MotionCommand::PullBack, FilamentMotion::InUse) => {
                self.start_unload_filament(lane, length_mm, now)?;
            },
            _ => {
                self.advance_lane(lane, now)?;
            },
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 周期驱动
    // ------------------------------------------------------------------------

    /// 周期驱动：每个通道最多推进一步，然后检查连接超时
    ///
    /// 单个通道的硬件错误只记录日志，不影响其他通道。
    pub fn tick(&mut self, now: u64) {
        for lane in LaneIndex::ALL {
            if let Err(e) = self.advance_lane(lane, now) {
                warn!("lane {} tick failed: {}", lane, e);
            }
        }
        self.update_connectivity(now, false);
    }

    /// 读取传感器并推进一步，返回发生迁移时的新状态
    fn advance_lane(
        &mut self,
        lane: LaneIndex,
        now: u64,
    ) -> Result<Option<FilamentMotion>, LogicError> {
        let idx = lane.as_usize();
        let reading = match self.hardware.sensor_state(lane) {
            Ok(reading) => reading,
            Err(e) => {
                self.lanes[idx].fault = Some(LaneFault::Sensor);
                return Err(e.into());
            },
        };
        self.lanes[idx].reading = reading;
        self.update_status(lane, now);

        let odometer_mm = self.hardware.odometer_mm(lane)?;
        let level = self.config.pressure_level(reading.pressure_volts);
        let state = &self.lanes[idx];
        let timed_out = state
            .transition
            .is_some_and(|t| now.saturating_sub(t.started_ms) >= self.config.motion_timeout_ms);
        let reached = |direction| {
            state
                .transition
                .is_none_or(|t| t.distance_reached(odometer_mm, direction))
        };

        let motion = state.motion;
        let next = match motion {
            FilamentMotion::NeedSendOut if timed_out => Some((FilamentMotion::Idle, true)),
            FilamentMotion::NeedSendOut => (reading.at_outlet && reached(AxisDirection::Feed))
                .then_some((FilamentMotion::InUse, false)),
            FilamentMotion::NeedPullBack | FilamentMotion::BeforePullBack if timed_out => {
                Some((FilamentMotion::InUse, true))
            },
            FilamentMotion::NeedPullBack => {
                (level != PressureLevel::High).then_some((FilamentMotion::BeforePullBack, false))
            },
            FilamentMotion::BeforePullBack => (!reading.at_outlet
                && reached(AxisDirection::Retract))
            .then_some((FilamentMotion::Idle, false)),
            FilamentMotion::Idle | FilamentMotion::InUse => {
                self.drive_settled_lane(lane, level, odometer_mm)?;
                None
            },
        };

        let Some((next, timed_out)) = next else {
            return Ok(None);
        };
        // BeforePullBack 仍在回抽，电机不停
        if next != FilamentMotion::BeforePullBack {
            self.drive(lane, AxisDirection::Stop, 0.0)?;
        }

        let state = &mut self.lanes[idx];
        let previous = state.motion;
        if next == FilamentMotion::BeforePullBack {
            state.motion = next;
        } else {
            state.settle(next);
        }
        if timed_out {
            state.fault = Some(LaneFault::MotionTimeout);
            warn!(
                "lane {} motion timeout in {}, back to {}",
                lane,
                previous.as_str(),
                next.as_str()
            );
        } else {
            info!("lane {} {} -> {}", lane, previous.as_str(), next.as_str());
        }
        Ok(Some(next))
    }

    /// 跟随传感器更新耗材状态；NFC 等待期间只检查截止时间
    fn update_status(&mut self, lane: LaneIndex, now: u64) {
        let state = &mut self.lanes[lane.as_usize()];
        if state.status == FilamentStatus::NfcWaiting {
            if state.nfc_deadline_ms.is_some_and(|deadline| now >= deadline) {
                state.status = FilamentStatus::Offline;
                state.nfc_deadline_ms = None;
                warn!("lane {} NFC read timeout", lane);
            }
            return;
        }

        let status = if state.reading.present {
            FilamentStatus::Online
        } else {
            FilamentStatus::Offline
        };
        if status != state.status {
            debug!("lane {} status {:?} -> {:?}", lane, state.status, status);
            state.status = status;
        }
    }

    /// `Idle`/`InUse` 通道：点动到位停止，或按压力自动送料
    fn drive_settled_lane(
        &mut self,
        lane: LaneIndex,
        level: PressureLevel,
        odometer_mm: f32,
    ) -> Result<(), LogicError> {
        let idx = lane.as_usize();
        if let Some(jog) = self.lanes[idx].jog {
            if jog.is_done(odometer_mm) {
                self.lanes[idx].jog = None;
                self.drive(lane, AxisDirection::Stop, 0.0)?;
                debug!("lane {} jog ({:?}) finished", lane, jog.direction);
            }
            return Ok(());
        }

        if self.lanes[idx].auto_feed {
            let wanted = match level {
                PressureLevel::Low => AxisDirection::Feed,
                PressureLevel::High => AxisDirection::Retract,
                PressureLevel::Normal => AxisDirection::Stop,
            };
            if self.hardware.lane_motion(lane) != wanted {
                self.drive(lane, wanted, self.config.auto_feed_speed_mm_s)?;
            }
        }
        Ok(())
    }

    /// 下发电机命令，失败时在通道上挂 `Actuator` 故障
    fn drive(
        &mut self,
        lane: LaneIndex,
        direction: AxisDirection,
        speed_mm_s: f32,
    ) -> Result<(), LogicError> {
        let result = match direction {
            AxisDirection::Stop => self.hardware.move_axis(lane, direction),
            _ => self
                .hardware
                .set_speed(lane, speed_mm_s)
                .and_then(|_| self.hardware.move_axis(lane, direction)),
        };
        if let Err(e) = result {
            self.lanes[lane.as_usize()].fault = Some(LaneFault::Actuator);
            return Err(e.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 连接状态 / NFC
    // ------------------------------------------------------------------------

    /// 更新主机连接状态
    ///
    /// 每个心跳包以 `heartbeat = true` 调用，每个 tick 以 `false` 调用。
    /// 返回更新后是否在线。
    pub fn update_connectivity(&mut self, now: u64, heartbeat: bool) -> bool {
        match self.connectivity.update(now, heartbeat) {
            Some(true) => info!("host online"),
            Some(false) => warn!("host offline"),
            None => {},
        }
        self.connectivity.is_online()
    }

    /// 开始 NFC 读取
    ///
    /// 只有 `Online` 通道会进入 `NfcWaiting`，返回是否进入等待。
    pub fn start_nfc_read(&mut self, lane: LaneIndex, now: u64) -> bool {
        let state = &mut self.lanes[lane.as_usize()];
        if state.status != FilamentStatus::Online {
            return false;
        }
        state.status = FilamentStatus::NfcWaiting;
        state.nfc_deadline_ms = Some(now.saturating_add(self.config.nfc_timeout_ms));
        debug!("lane {} waiting for NFC data", lane);
        true
    }

    // ------------------------------------------------------------------------
    // 耗材信息与设置持久化
    // ------------------------------------------------------------------------

    /// 更新通道耗材信息
    ///
    /// `meters` 为 `None`（或非有限值）时保持原值，否则截断到
    /// `[0, MAX_METERS]`。有变化时标脏，并结束该通道的 NFC 等待。
    /// 返回是否有变化。
    pub fn set_filament_info_action(
        &mut self,
        lane: LaneIndex,
        info: FilamentInfo,
        meters: Option<f32>,
        now: u64,
    ) -> bool {
        let state = &mut self.lanes[lane.as_usize()];
        let mut changed = false;
        if state.info != info {
            state.info = info;
            changed = true;
        }
        if let Some(meters) = meters.filter(|m| m.is_finite()) {
            let meters = meters.clamp(0.0, MAX_METERS);
            if state.meters != meters {
                state.meters = meters;
                changed = true;
            }
        }
        if state.status == FilamentStatus::NfcWaiting {
            state.status = FilamentStatus::Online;
            state.nfc_deadline_ms = None;
        }

        if changed {
            debug!("lane {} filament info updated", lane);
            self.set_need_to_save(now);
        }
        changed
    }

    /// 标记设置需要保存
    ///
    /// 去抖从第一次标脏开始计时，后续标脏不会推迟写入。
    pub fn set_need_to_save(&mut self, now: u64) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(now);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// 当前状态对应的持久化记录
    pub fn stored_settings(&self) -> StoredSettings {
        let mut settings = StoredSettings {
            active_lane: self.active_lane.get(),
            boot_mode: self.boot_mode,
            ..StoredSettings::default()
        };
        for (stored, state) in settings.lanes.iter_mut().zip(self.lanes.iter()) {
            *stored = StoredLane {
                info: state.info,
                meters: state.meters,
                auto_feed: state.auto_feed,
            };
        }
        settings
    }

    /// 立即保存设置，成功后清除脏标记
    pub fn save_settings(&mut self) -> Result<(), StorageError> {
        let settings = self.stored_settings();
        self.store.save(&settings)?;
        self.dirty_since = None;
        info!("settings saved");
        Ok(())
    }

    /// 脏标记到期时保存，返回是否写入成功
    ///
    /// 写入失败时保持脏标记并重新计时。
    pub fn flush_settings(&mut self, now: u64) -> bool {
        let Some(since) = self.dirty_since else {
            return false;
        };
        if now.saturating_sub(since) < self.config.save_debounce_ms {
            return false;
        }
        match self.save_settings() {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to save settings: {}", e);
                self.dirty_since = Some(now);
                false
            },
        }
    }

    // ------------------------------------------------------------------------
    // Klipper 原语
    // ------------------------------------------------------------------------

    /// 立即停止所有通道并强制回到 `Idle`，取消点动与自动送料
    pub fn stop_all(&mut self) {
        for lane in LaneIndex::ALL {
            if let Err(e) = self.hardware.move_axis(lane, AxisDirection::Stop) {
                warn!("lane {} stop failed: {}", lane, e);
                self.lanes[lane.as_usize()].fault = Some(LaneFault::Actuator);
            }
            let state = &mut self.lanes[lane.as_usize()];
            state.settle(FilamentMotion::Idle);
            state.jog = None;
            state.auto_feed = false;
        }
        info!("all lanes stopped");
    }

    /// 按距离点动
    ///
    /// 正距离送出，负距离回抽，0 停止。装载/卸载进行中的通道返回
    /// `LaneBusy`。速度取绝对值并限制在配置的上限内。
    pub fn move_axis(
        &mut self,
        lane: LaneIndex,
        dist_mm: f32,
        speed_mm_s: f32,
    ) -> Result<(), LogicError> {
        if !dist_mm.is_finite() {
            return Err(LogicError::InvalidArgument("dist_mm"));
        }
        if !speed_mm_s.is_finite() {
            return Err(LogicError::InvalidArgument("speed"));
        }
        let idx = lane.as_usize();
        if self.lanes[idx].motion.is_transitional() {
            return Err(LogicError::LaneBusy(lane));
        }

        if dist_mm == 0.0 {
            self.lanes[idx].jog = None;
            return self.drive(lane, AxisDirection::Stop, 0.0);
        }

        let direction = if dist_mm > 0.0 {
            AxisDirection::Feed
        } else {
            AxisDirection::Retract
        };
        let speed = speed_mm_s.abs().min(self.config.max_jog_speed_mm_s);
        let origin_mm = self.hardware.odometer_mm(lane)?;
        self.drive(lane, direction, speed)?;
        self.lanes[idx].jog = Some(Jog {
            origin_mm,
            distance_mm: dist_mm.abs(),
            direction,
        });
        debug!("lane {} jog {} mm at {} mm/s", lane, dist_mm, speed);
        Ok(())
    }

    /// 开关自动送料，变化时标脏；关闭时停止电机
    pub fn set_auto_feed(
        &mut self,
        lane: LaneIndex,
        enable: bool,
        now: u64,
    ) -> Result<(), LogicError> {
        let idx = lane.as_usize();
        if self.lanes[idx].auto_feed == enable {
            return Ok(());
        }
        self.lanes[idx].auto_feed = enable;
        self.set_need_to_save(now);
        info!("lane {} auto feed {}", lane, if enable { "on" } else { "off" });

        let state = &self.lanes[idx];
        if !enable && !state.motion.is_transitional() && state.jog.is_none() {
            self.drive(lane, AxisDirection::Stop, 0.0)?;
        }
        Ok(())
    }

    /// 选择当前通道，变化时标脏
    pub fn select_lane(&mut self, lane: LaneIndex, now: u64) {
        if self.active_lane != lane {
            self.active_lane = lane;
            self.set_need_to_save(now);
        }
    }

    /// 耗材在位位图：bit i 对应通道 i
    pub fn sensor_bitmap(&self) -> u8 {
        self.lanes
            .iter()
            .enumerate()
            .filter(|(_, state)| state.reading.present)
            .fold(0u8, |bits, (i, _)| bits | (1 << i))
    }

    /// 通道驱动模式
    pub fn drive_mode(&self, lane: LaneIndex) -> DriveMode {
        let state = &self.lanes[lane.as_usize()];
        if state.jog.is_some() {
            DriveMode::VelCtrl
        } else if state.auto_feed && !state.motion.is_transitional() {
            DriveMode::AutoFeed
        } else {
            DriveMode::from(self.hardware.lane_motion(lane))
        }
    }

    /// 从硬件回读电机方向
    pub fn lane_motion(&self, lane: LaneIndex) -> AxisDirection {
        self.hardware.lane_motion(lane)
    }

    /// 回复包中的通道状态位域
    pub fn lane_flags(&self, lane: LaneIndex) -> LaneFlags {
        let state = &self.lanes[lane.as_usize()];
        LaneFlags::compose(
            state.reading.present,
            self.config.pressure_level(state.reading.pressure_volts),
            state.fault.is_some(),
            state.auto_feed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmcu_hal::mock::{MemoryStore, MockLanes};
    use bmcu_protocol::Rgba;

    type Logic = ControlLogic<MockLanes, MemoryStore>;

    fn lane(i: u8) -> LaneIndex {
        LaneIndex::new(i).unwrap()
    }

    fn setup() -> (Logic, MockLanes, MemoryStore) {
        let lanes = MockLanes::new();
        let store = MemoryStore::new();
        let logic = ControlLogic::new(LogicConfig::default(), lanes.clone(), store.clone());
        (logic, lanes, store)
    }

    /// 把通道推进到 InUse
    fn load(logic: &mut Logic, lanes: &MockLanes, l: LaneIndex) {
        lanes.set_present(l, true);
        lanes.set_pressure(l, 1.65);
        assert!(logic.start_load_filament(l, None, 0).unwrap());
        lanes.set_at_outlet(l, true);
        logic.tick(10);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::InUse);
        lanes.clear_commands();
    }

    #[test]
    fn test_load_path() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        lanes.set_present(l, true);

        assert!(logic.start_load_filament(l, None, 0).unwrap());
        assert_eq!(logic.lane(l).motion(), FilamentMotion::NeedSendOut);
        assert_eq!(lanes.direction(l), AxisDirection::Feed);

        // 出口未检测到，保持
        logic.tick(100);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::NeedSendOut);
        assert_eq!(logic.lane(l).status(), FilamentStatus::Online);

        lanes.set_at_outlet(l, true);
        logic.tick(200);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::InUse);
        assert_eq!(lanes.direction(l), AxisDirection::Stop);
    }

    #[test]
    fn test_load_with_length_waits_for_odometer() {
        let (mut logic, lanes, _) = setup();
        let l = lane(2);
        lanes.set_at_outlet(l, true);
        logic.start_load_filament(l, Some(100), 0).unwrap();

        lanes.advance_odometer(l, 60.0);
        logic.tick(10);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::NeedSendOut);

        lanes.advance_odometer(l, 40.0);
        logic.tick(20);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::InUse);
    }

    #[test]
    fn test_load_idempotent() {
        let (mut logic, lanes, _) = setup();
        let l = lane(1);
        load(&mut logic, &lanes, l);

        assert!(!logic.start_load_filament(l, None, 100).unwrap());
        assert!(!logic.start_load_filament(l, None, 101).unwrap());
        assert!(lanes.commands().is_empty());
        assert_eq!(logic.lane(l).motion(), FilamentMotion::InUse);
    }

    #[test]
    fn test_load_timeout_sets_fault() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        logic.start_load_filament(l, None, 1_000).unwrap();

        logic.tick(1_000 + 19_999);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::NeedSendOut);

        logic.tick(1_000 + 20_000);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::Idle);
        assert_eq!(logic.lane(l).fault(), Some(LaneFault::MotionTimeout));
        assert_eq!(lanes.direction(l), AxisDirection::Stop);
        assert!(logic.lane_flags(l).fault());

        // 下一次成功开启时清除故障
        logic.start_load_filament(l, None, 30_000).unwrap();
        assert!(logic.lane(l).fault().is_none());
    }

    #[test]
    fn test_unload_path_one_step_per_tick() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        load(&mut logic, &lanes, l);

        assert!(logic.start_unload_filament(l, None, 100).unwrap());
        assert_eq!(logic.lane(l).motion(), FilamentMotion::NeedPullBack);
        assert_eq!(lanes.direction(l), AxisDirection::Retract);

        // 传感器已显示耗材离开出口，仍然只推进一步
        lanes.set_at_outlet(l, false);
        logic.tick(200);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::BeforePullBack);
        assert_eq!(lanes.direction(l), AxisDirection::Retract);

        logic.tick(300);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::Idle);
        assert_eq!(lanes.direction(l), AxisDirection::Stop);
    }

    #[test]
    fn test_unload_waits_for_pressure_release() {
        let (mut logic, lanes, _) = setup();
        let l = lane(3);
        load(&mut logic, &lanes, l);
        logic.start_unload_filament(l, None, 100).unwrap();

        lanes.set_pressure(l, 1.95);
        logic.tick(200);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::NeedPullBack);

        lanes.set_pressure(l, 1.6);
        logic.tick(300);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::BeforePullBack);
    }

    #[test]
    fn test_unload_timeout_returns_in_use() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        load(&mut logic, &lanes, l);
        logic.start_unload_filament(l, None, 100).unwrap();

        logic.tick(200);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::BeforePullBack);
        // 出口一直有耗材
        logic.tick(100 + 20_000);
        assert_eq!(logic.lane(l).motion(), FilamentMotion::InUse);
        assert_eq!(logic.lane(l).fault(), Some(LaneFault::MotionTimeout));
    }

    #[test]
    fn test_unload_ignored_unless_in_use() {
        let (mut logic, lanes, _) = setup();
        assert!(!logic.start_unload_filament(lane(0), None, 0).unwrap());
        assert!(lanes.commands().is_empty());
    }

    #[test]
    fn test_motion_packet_starts_then_steps() {
        let (mut logic, lanes, _) = setup();
        let l = lane(1);
        lanes.set_at_outlet(l, true);
        let request = MotionRequest {
            ams: 0,
            lane: l,
            command: MotionCommand::SendOut,
            length_mm: None,
        };
        // 第一包只开启装载
        assert_eq!(
            logic.process_motion_short(&request, 0).unwrap(),
            FilamentMotion::NeedSendOut
        );
        // 第二包按传感器推进
        assert_eq!(
            logic.process_motion_short(&request, 10).unwrap(),
            FilamentMotion::InUse
        );
        assert_eq!(logic.active_lane(), l);

        let query = MotionRequest {
            command: MotionCommand::Query,
            ..request
        };
        assert_eq!(logic.process_motion_short(&query, 20).unwrap(), FilamentMotion::InUse);
    }

    #[test]
    fn test_motion_long_uses_length() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        lanes.set_at_outlet(l, true);
        let request = MotionRequest {
            ams: 0,
            lane: l,
            command: MotionCommand::SendOut,
            length_mm: Some(30),
        };
        logic.process_motion_long(&request, 0).unwrap();
        assert_eq!(
            logic.process_motion_long(&request, 10).unwrap(),
            FilamentMotion::NeedSendOut
        );
        lanes.advance_odometer(l, 30.0);
        assert_eq!(
            logic.process_motion_long(&request, 20).unwrap(),
            FilamentMotion::InUse
        );
    }

    #[test]
    fn test_status_follows_presence() {
        let (mut logic, lanes, _) = setup();
        let l = lane(2);
        logic.tick(0);
        assert_eq!(logic.lane(l).status(), FilamentStatus::Offline);
        lanes.set_present(l, true);
        logic.tick(10);
        assert_eq!(logic.lane(l).status(), FilamentStatus::Online);
        assert_eq!(logic.sensor_bitmap(), 0b0100);
    }

    #[test]
    fn test_nfc_wait_ends_with_info() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        assert!(!logic.start_nfc_read(l, 0));

        lanes.set_present(l, true);
        logic.tick(0);
        assert!(logic.start_nfc_read(l, 0));
        logic.tick(100);
        assert_eq!(logic.lane(l).status(), FilamentStatus::NfcWaiting);

        let info = FilamentInfo::new("GFA00", "PLA Basic", Rgba::from_rgb(0x00FF00), 190, 230)
            .unwrap();
        assert!(logic.set_filament_info_action(l, info, Some(250.0), 200));
        assert_eq!(logic.lane(l).status(), FilamentStatus::Online);
        assert_eq!(logic.lane(l).info(), &info);
    }

    #[test]
    fn test_nfc_wait_times_out_offline() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        lanes.set_present(l, true);
        logic.tick(0);
        logic.start_nfc_read(l, 0);

        logic.tick(4_999);
        assert_eq!(logic.lane(l).status(), FilamentStatus::NfcWaiting);
        logic.tick(5_000);
        assert_eq!(logic.lane(l).status(), FilamentStatus::Offline);
    }

    #[test]
    fn test_set_filament_info_meters_clamped() {
        let (mut logic, _, _) = setup();
        let l = lane(0);
        let info = *logic.lane(l).info();

        assert!(logic.set_filament_info_action(l, info, Some(5_000.0), 0));
        assert_eq!(logic.lane(l).meters(), MAX_METERS);
        assert!(logic.set_filament_info_action(l, info, Some(-3.0), 0));
        assert_eq!(logic.lane(l).meters(), 0.0);

        // 无变化不标脏
        let (mut logic, _, _) = setup();
        assert!(!logic.set_filament_info_action(l, info, None, 0));
        assert!(!logic.set_filament_info_action(l, info, Some(f32::NAN), 0));
        assert!(!logic.is_dirty());
    }

    #[test]
    fn test_flush_after_debounce() {
        let (mut logic, _, store) = setup();
        let l = lane(1);
        let mut info = *logic.lane(l).info();
        info.color = Rgba::from_rgb(0x123456);
        logic.set_filament_info_action(l, info, Some(100.0), 1_000);
        // 后续标脏不推迟写入
        logic.set_need_to_save(4_000);

        assert!(!logic.flush_settings(5_999));
        assert!(logic.flush_settings(6_000));
        assert!(!logic.is_dirty());
        assert_eq!(store.save_count(), 1);
        let stored = store.stored().unwrap();
        assert_eq!(stored.lanes[1].info.color, Rgba::from_rgb(0x123456));
        assert_eq!(stored.lanes[1].meters, 100.0);
    }

    #[test]
    fn test_flush_failure_rearms() {
        let (mut logic, _, store) = setup();
        store.set_fail(true);
        logic.set_need_to_save(0);

        assert!(!logic.flush_settings(5_000));
        assert!(logic.is_dirty());
        // 重新计时
        store.set_fail(false);
        assert!(!logic.flush_settings(9_999));
        assert!(logic.flush_settings(10_000));
    }

    #[test]
    fn test_load_settings_applies_record() {
        let mut settings = StoredSettings::default();
        settings.lanes[2].meters = 42.0;
        settings.lanes[2].auto_feed = true;
        settings.active_lane = 2;
        settings.boot_mode = BootMode::BambuBus;
        let store = MemoryStore::with_settings(settings);
        let mut logic = ControlLogic::new(LogicConfig::default(), MockLanes::new(), store);

        assert_eq!(logic.load_settings(), Some(BootMode::BambuBus));
        assert_eq!(logic.lane(lane(2)).meters(), 42.0);
        assert!(logic.lane(lane(2)).auto_feed());
        assert_eq!(logic.active_lane(), lane(2));
        assert_eq!(logic.stored_settings().lanes[2].meters, 42.0);
    }

    #[test]
    fn test_load_settings_ignores_incompatible() {
        let settings = StoredSettings {
            magic: 0xDEAD_BEEF,
            active_lane: 3,
            ..StoredSettings::default()
        };
        let store = MemoryStore::with_settings(settings);
        let mut logic = ControlLogic::new(LogicConfig::default(), MockLanes::new(), store);
        assert_eq!(logic.load_settings(), None);
        assert_eq!(logic.active_lane(), lane(0));
    }

    #[test]
    fn test_stop_all() {
        let (mut logic, lanes, _) = setup();
        load(&mut logic, &lanes, lane(0));
        logic.start_load_filament(lane(1), None, 0).unwrap();
        logic.set_auto_feed(lane(2), true, 0).unwrap();
        logic.move_axis(lane(3), 50.0, 20.0).unwrap();

        logic.stop_all();
        for l in LaneIndex::ALL {
            assert_eq!(logic.lane(l).motion(), FilamentMotion::Idle);
            assert_eq!(lanes.direction(l), AxisDirection::Stop);
            assert!(!logic.lane(l).auto_feed());
            assert!(!logic.lane(l).is_jogging());
            assert_eq!(logic.drive_mode(l), DriveMode::Idle);
        }
    }

    #[test]
    fn test_jog_runs_until_distance() {
        let (mut logic, lanes, _) = setup();
        let l = lane(1);
        logic.move_axis(l, -25.0, 500.0).unwrap();
        assert_eq!(lanes.direction(l), AxisDirection::Retract);
        assert_eq!(lanes.lane(l).speed_mm_s, 200.0);
        assert_eq!(logic.drive_mode(l), DriveMode::VelCtrl);

        lanes.advance_odometer(l, -20.0);
        logic.tick(10);
        assert!(logic.lane(l).is_jogging());

        lanes.advance_odometer(l, -5.0);
        logic.tick(20);
        assert!(!logic.lane(l).is_jogging());
        assert_eq!(lanes.direction(l), AxisDirection::Stop);
    }

    #[test]
    fn test_jog_rejected_while_busy() {
        let (mut logic, _, _) = setup();
        let l = lane(0);
        logic.start_load_filament(l, None, 0).unwrap();
        assert!(matches!(
            logic.move_axis(l, 10.0, 10.0),
            Err(LogicError::LaneBusy(_))
        ));
        assert!(matches!(
            logic.move_axis(lane(1), f32::NAN, 10.0),
            Err(LogicError::InvalidArgument("dist_mm"))
        ));
    }

    #[test]
    fn test_auto_feed_follows_pressure() {
        let (mut logic, lanes, _) = setup();
        let l = lane(0);
        logic.set_auto_feed(l, true, 0).unwrap();
        assert!(logic.is_dirty());
        assert_eq!(logic.drive_mode(l), DriveMode::AutoFeed);

        lanes.set_pressure(l, 1.2);
        logic.tick(10);
        assert_eq!(lanes.direction(l), AxisDirection::Feed);

        lanes.set_pressure(l, 2.0);
        logic.tick(20);
        assert_eq!(lanes.direction(l), AxisDirection::Retract);

        lanes.set_pressure(l, 1.65);
        logic.tick(30);
        assert_eq!(lanes.direction(l), AxisDirection::Stop);

        lanes.set_pressure(l, 1.2);
        logic.tick(40);
        logic.set_auto_feed(l, false, 50).unwrap();
        assert_eq!(lanes.direction(l), AxisDirection::Stop);
    }

    #[test]
    fn test_sensor_failure_marks_fault() {
        let (mut logic, lanes, _) = setup();
        lanes.fail_sensors(true);
        logic.tick(0);
        for l in LaneIndex::ALL {
            assert_eq!(logic.lane(l).fault(), Some(LaneFault::Sensor));
        }
    }

    #[test]
    fn test_heartbeat_connectivity() {
        let (mut logic, _, _) = setup();
        assert!(!logic.update_connectivity(0, true));
        assert!(!logic.update_connectivity(500, true));
        assert!(logic.update_connectivity(1_000, true));
        logic.tick(3_500);
        assert!(logic.is_online());
        logic.tick(4_001);
        assert!(!logic.is_online());
    }

    #[test]
    fn test_select_lane_and_boot_mode_mark_dirty() {
        let (mut logic, _, _) = setup();
        logic.select_lane(lane(0), 0);
        assert!(!logic.is_dirty());
        logic.select_lane(lane(3), 0);
        assert!(logic.is_dirty());

        let (mut logic, _, _) = setup();
        logic.set_boot_mode(BootMode::Klipper, 0);
        assert!(!logic.is_dirty());
        logic.set_boot_mode(BootMode::BambuBus, 0);
        assert!(logic.is_dirty());
        assert_eq!(logic.stored_settings().boot_mode, BootMode::BambuBus);
    }
}
