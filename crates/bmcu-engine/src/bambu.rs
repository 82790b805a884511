//! BambuBus 请求分发
//!
//! 按包类型路由：身份/在线查询直接由设备身份与连接状态回答，运动与
//! 耗材信息请求转给控制逻辑，未识别类型只做空应答。
//!
//! 以下包不产生回复：
//! - 回复方向或未知帧头的包
//! - 机组号不是本机的请求
//! - 目标地址不是 AMS / AMS-lite 的长包
//! - 只写类型（heartbeat、set_filament_info、set_filament_info_type2）

use crate::EngineError;
use crate::identity::DeviceIdentity;
use bmcu_hal::{LaneHardware, SettingsStore};
use bmcu_logic::ControlLogic;
use bmcu_protocol::{
    BootMode, DeviceType, Direction, Header, LANE_COUNT, LaneFilament, LaneIndex, LaneQuery,
    LaneRecord, McOnlineReply, MotionReport, MotionReportLong, MotionRequest, NfcDetectReply,
    OnlineDetectReply, PackageType, Packet, Reqx6Reply, UnitQuery,
};
use tracing::{debug, info, warn};

/// BambuBus 协议引擎
#[derive(Debug, Clone)]
pub struct BambuEngine {
    identity: DeviceIdentity,
}

impl BambuEngine {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_type(&self) -> DeviceType {
        self.identity.device_type
    }

    pub fn boot_mode(&self) -> BootMode {
        self.identity.boot_mode
    }

    /// 处理一个已解码的包，返回需要发送的回复
    ///
    /// 解析失败或控制逻辑报错只记录日志，不产生回复。
    pub fn handle<H: LaneHardware, S: SettingsStore>(
        &mut self,
        logic: &mut ControlLogic<H, S>,
        packet: &Packet,
        now: u64,
    ) -> Option<Packet> {
        if packet.direction() != Direction::Request {
            debug!("ignoring {:?} packet ({:?})", packet.direction(), packet.package_type());
            return None;
        }
        if let Some(data) = packet.long_data() {
            if !DeviceType::is_emulated_role(data.target_address) {
                debug!("ignoring long packet for 0x{:04X}", data.target_address);
                return None;
            }
            let target = DeviceType::from(data.target_address);
            if target != self.identity.device_type {
                info!(
                    "device type reconfigured {:?} -> {:?}",
                    self.identity.device_type, target
                );
                self.identity.device_type = target;
            }
        }

        match self.dispatch(logic, packet, now) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("dropping {:?} request: {}", packet.package_type(), e);
                None
            },
        }
    }

    fn dispatch<H: LaneHardware, S: SettingsStore>(
        &mut self,
        logic: &mut ControlLogic<H, S>,
        packet: &Packet,
        now: u64,
    ) -> Result<Option<Packet>, EngineError> {
        let package_type = packet.package_type();
        debug!("handling {:?}", package_type);
        match package_type {
            PackageType::Heartbeat => {
                logic.update_connectivity(now, true);
                Ok(None)
            },
            PackageType::FilamentMotionShort | PackageType::FilamentMotionLong => {
                self.filament_motion(logic, packet, now)
            },
            PackageType::OnlineDetect => {
                let query = UnitQuery::try_from(packet)?;
                if !self.is_own_unit(query.ams) {
                    return Ok(None);
                }
                let reply = OnlineDetectReply {
                    ams: query.ams,
                    device_type: self.identity.device_type,
                    online: logic.is_online(),
                    lane_count: LANE_COUNT as u8,
                };
                self.reply(packet, &reply.to_bytes())
            },
            PackageType::Reqx6 => {
                let query = UnitQuery::try_from(packet)?;
                if !self.is_own_unit(query.ams) {
                    return Ok(None);
                }
                let reply = Reqx6Reply {
                    ams: query.ams,
                    lanes: LaneIndex::ALL.map(|lane| lane_record(logic, lane)),
                };
                self.reply(packet, &reply.to_bytes())
            },
            PackageType::McOnline => {
                let query = UnitQuery::try_from(packet)?;
                if !self.is_own_unit(query.ams) {
                    return Ok(None);
                }
                let reply = McOnlineReply {
                    ams: query.ams,
                    online: logic.is_online(),
                    device_type: self.identity.device_type,
                };
                self.reply(packet, &reply.to_bytes())
            },
            PackageType::NfcDetect => {
                let query = LaneQuery::try_from(packet)?;
                if !self.is_own_unit(query.ams) {
                    return Ok(None);
                }
                logic.start_nfc_read(query.lane, now);
                let reply = NfcDetectReply {
                    ams: query.ams,
                    lane: query.lane,
                    status: logic.lane(query.lane).status(),
                };
                self.reply(packet, &reply.to_bytes())
            },
            PackageType::ReadFilamentInfo => {
                let query = LaneQuery::try_from(packet)?;
                if !self.is_own_unit(query.ams) {
                    return Ok(None);
                }
                let state = logic.lane(query.lane);
                let reply = LaneFilament {
                    ams: query.ams,
                    lane: query.lane,
                    info: *state.info(),
                    meters: state.meters(),
                };
                self.reply(packet, &reply.to_bytes())
            },
            PackageType::SetFilamentInfo | PackageType::SetFilamentInfoType2 => {
                let request = LaneFilament::try_from(packet)?;
                if self.is_own_unit(request.ams) {
                    logic.set_filament_info_action(
                        request.lane,
                        request.info,
                        Some(request.meters),
                        now,
                    );
                }
                Ok(None)
            },
            PackageType::Version => self.reply(packet, &self.identity.version_bytes()),
            PackageType::SerialNumber => self.reply(packet, &self.identity.serial_bytes()),
            PackageType::Etc | PackageType::Error => self.reply(packet, &[]),
            PackageType::None => Ok(None),
        }
    }

    fn filament_motion<H: LaneHardware, S: SettingsStore>(
        &self,
        logic: &mut ControlLogic<H, S>,
        packet: &Packet,
        now: u64,
    ) -> Result<Option<Packet>, EngineError> {
        let request = MotionRequest::try_from(packet)?;
        if !self.is_own_unit(request.ams) {
            return Ok(None);
        }
        let lane = request.lane;
        let motion = if packet.package_type() == PackageType::FilamentMotionLong {
            logic.process_motion_long(&request, now)?
        } else {
            logic.process_motion_short(&request, now)?
        };

        let state = logic.lane(lane);
        let report = MotionReport {
            ams: request.ams,
            lane,
            motion,
            status: state.status(),
            flags: logic.lane_flags(lane),
        };
        if packet.package_type() == PackageType::FilamentMotionLong {
            let long = MotionReportLong {
                report,
                meters: state.meters(),
                pressure_mv: state.pressure_mv(),
            };
            self.reply(packet, &long.to_bytes())
        } else {
            self.reply(packet, &report.to_bytes())
        }
    }

    fn is_own_unit(&self, ams: u8) -> bool {
        if ams != self.identity.unit_index {
            debug!("request for unit {} ignored", ams);
            return false;
        }
        true
    }

    /// 按请求布局构建回复：短包回显命令字，长包回显包序号与类型并交换地址
    fn reply(&self, request: &Packet, payload: &[u8]) -> Result<Option<Packet>, EngineError> {
        let packet = match request.header() {
            Header::Short { command, .. } => Packet::short_reply(*command, payload)?,
            Header::Long { data, .. } => {
                Packet::long_reply(data.reply_to(self.identity.address()), payload)?
            },
        };
        Ok(Some(packet))
    }
}

fn lane_record<H: LaneHardware, S: SettingsStore>(
    logic: &ControlLogic<H, S>,
    lane: LaneIndex,
) -> LaneRecord {
    let state = logic.lane(lane);
    LaneRecord {
        lane,
        status: state.status(),
        motion: state.motion(),
        flags: logic.lane_flags(lane),
        info: *state.info(),
    }
}
