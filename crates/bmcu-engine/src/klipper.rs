//! Klipper JSON 行协议
//!
//! 每行一个 JSON 请求 `{"id": n, "cmd": "...", "args": {...}}`，缺少 `args`
//! 时直接使用根对象。CR、LF、CRLF 都作为行结束符；每个回复以 CRLF 结尾。
//!
//! 错误码：`BAD_ARGS`、`BAD_AXIS`、`BAD_LANE`、`BUSY`、`TOO_LONG`、
//! `HW_ERROR`、`UNKNOWN_CMD`。

use bmcu_hal::{LaneHardware, SettingsStore};
use bmcu_logic::{ControlLogic, LaneState, LogicError};
use bmcu_protocol::{FilamentInfo, LaneIndex, Rgba};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// 行缓冲区大小
pub const LINE_BUFFER_LEN: usize = 1024;

/// 启动时发送的事件行
pub const STARTUP_LINE: &str = "{\"event\":\"STARTUP\",\"msg\":\"KlipperCLI Ready\"}\r\n";

/// 解析失败时回显的最大字符数
const ECHO_LIMIT: usize = 100;

/// Klipper 模式命令层
#[derive(Debug)]
pub struct KlipperCli {
    line: heapless::Vec<u8, LINE_BUFFER_LEN>,
    last_was_cr: bool,
    /// 当前行已溢出，丢弃到行尾
    overflowed: bool,
    last_activity_ms: Option<u64>,
    version: String,
}

impl KlipperCli {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            line: heapless::Vec::new(),
            last_was_cr: false,
            overflowed: false,
            last_activity_ms: None,
            version: version.into(),
        }
    }

    /// 启动事件行
    pub fn startup_line(&self) -> &'static str {
        STARTUP_LINE
    }

    /// 距上次收到完整行超过 `idle_ms` 时返回 true
    pub fn is_idle(&self, now: u64, idle_ms: u64) -> bool {
        self.last_activity_ms
            .is_none_or(|last| now.saturating_sub(last) > idle_ms)
    }

    /// 输入一段字节，完整行的回复追加到 `out`，返回回复条数
    pub fn feed<H: LaneHardware, S: SettingsStore>(
        &mut self,
        bytes: &[u8],
        logic: &mut ControlLogic<H, S>,
        now: u64,
        out: &mut Vec<u8>,
    ) -> usize {
        let mut replies = 0;
        for &byte in bytes {
            if self.push_byte(byte, logic, now, out) {
                replies += 1;
            }
        }
        replies
    }

    fn push_byte<H: LaneHardware, S: SettingsStore>(
        &mut self,
        byte: u8,
        logic: &mut ControlLogic<H, S>,
        now: u64,
        out: &mut Vec<u8>,
    ) -> bool {
        match byte {
            b'\n' if self.last_was_cr => {
                self.last_was_cr = false;
                false
            },
            b'\n' | b'\r' => {
                self.last_was_cr = byte == b'\r';
                self.last_activity_ms = Some(now);
                if self.overflowed {
                    warn!("discarding line longer than {} bytes", LINE_BUFFER_LEN);
                    self.overflowed = false;
                    return false;
                }
                let line = core::mem::take(&mut self.line);
                match self.handle_line(&line, logic, now) {
                    Some(reply) => {
                        out.extend_from_slice(reply.as_bytes());
                        true
                    },
                    None => false,
                }
            },
            _ => {
                self.last_was_cr = false;
                if !self.overflowed && self.line.push(byte).is_err() {
                    self.line.clear();
                    self.overflowed = true;
                }
                false
            },
        }
    }

    /// 处理一行（不含行结束符），返回带 CRLF 的回复
    pub fn handle_line<H: LaneHardware, S: SettingsStore>(
        &self,
        line: &[u8],
        logic: &mut ControlLogic<H, S>,
        now: u64,
    ) -> Option<String> {
        if line.is_empty() {
            return Some(finish(parse_error(None, "Empty packet")));
        }
        if line
            .iter()
            .any(|&c| (c < 32 && c != b'\t') || c > 126)
        {
            return Some(finish(parse_error(None, "Binary garbage detected")));
        }

        logic.update_connectivity(now, true);

        // 上面已排除非 ASCII 字节
        let text = String::from_utf8_lossy(line);
        let root: Value = match serde_json::from_str(&text) {
            Ok(root) => root,
            Err(e) => {
                let received: String = text.chars().take(ECHO_LIMIT).collect();
                return Some(finish(parse_error(Some(received), &e.to_string())));
            },
        };

        let id = root.get("id").and_then(Value::as_i64).unwrap_or(0);
        let Some(cmd) = root.get("cmd").and_then(Value::as_str) else {
            debug!("request without cmd ignored");
            return None;
        };
        let args = root
            .get("args")
            .filter(|args| args.is_object())
            .unwrap_or(&root);

        debug!("klipper {} (id {})", cmd, id);
        let reply = match cmd {
            "PING" => self.ping(id, now),
            "STATUS" => status(id, logic),
            "GET_SENSORS" => get_sensors(id, logic),
            "MOVE" => move_axis(id, args, logic),
            "STOP" => {
                logic.stop_all();
                ok_with(id, "STOPPED", "All motion stopped")
            },
            "SELECT_LANE" => select_lane(id, args, logic, now),
            "SET_AUTO_FEED" => set_auto_feed(id, args, logic, now),
            "LOAD_FILAMENT" => load_filament(id, args, logic, now, true),
            "UNLOAD_FILAMENT" => load_filament(id, args, logic, now, false),
            "GET_FILAMENT_INFO" => get_filament_info(id, args, logic),
            "SET_FILAMENT_INFO" => set_filament_info(id, args, logic, now),
            other => error(id, "UNKNOWN_CMD", other),
        };
        Some(finish(reply))
    }

    fn ping(&self, id: i64, now: u64) -> Value {
        json!({
            "id": id,
            "cmd": "PING",
            "ok": true,
            "result": "ok",
            "telemetry": {
                "version": self.version,
                "uptime": now,
            },
        })
    }
}

// ============================================================================
// 命令处理
// ============================================================================

fn status<H: LaneHardware, S: SettingsStore>(id: i64, logic: &ControlLogic<H, S>) -> Value {
    let bitmap = logic.sensor_bitmap();
    let lanes: Vec<Value> = LaneIndex::ALL
        .iter()
        .map(|&lane| {
            let state = logic.lane(lane);
            let mut entry = filament_fields(state);
            entry.insert("id".into(), json!(lane.get()));
            entry.insert("present".into(), json!(bitmap & (1 << lane.get()) != 0));
            entry.insert("motion".into(), json!(logic.drive_mode(lane).as_str()));
            entry.insert("state".into(), json!(state.motion().as_str()));
            Value::Object(entry)
        })
        .collect();
    json!({ "id": id, "cmd": "STATUS", "ok": true, "lanes": lanes })
}

fn get_sensors<H: LaneHardware, S: SettingsStore>(id: i64, logic: &ControlLogic<H, S>) -> Value {
    let bitmap = logic.sensor_bitmap();
    let lanes: Vec<u8> = LaneIndex::ALL
        .iter()
        .map(|lane| (bitmap >> lane.get()) & 1)
        .collect();
    json!({ "id": id, "cmd": "GET_SENSORS", "ok": true, "lane": lanes })
}

fn move_axis<H: LaneHardware, S: SettingsStore>(
    id: i64,
    args: &Value,
    logic: &mut ControlLogic<H, S>,
) -> Value {
    let (Some(axis), Some(dist), Some(speed)) = (
        args.get("axis").and_then(Value::as_str),
        args.get("dist_mm").and_then(Value::as_f64),
        args.get("speed").and_then(Value::as_f64),
    ) else {
        return error(id, "BAD_ARGS", "Missing axis, dist, or speed");
    };

    let lane = match axis {
        "FEED" => Some(logic.active_lane()),
        "SELECTOR" => None,
        _ => leading_number(axis).and_then(|n| LaneIndex::new(n).ok()),
    };
    let Some(lane) = lane else {
        return error(id, "BAD_AXIS", "Invalid or unknown axis");
    };

    match logic.move_axis(lane, dist as f32, speed as f32) {
        Ok(()) => ok_with(id, "MOVING", "Motion started"),
        Err(e) => logic_error(id, e),
    }
}

fn select_lane<H: LaneHardware, S: SettingsStore>(
    id: i64,
    args: &Value,
    logic: &mut ControlLogic<H, S>,
    now: u64,
) -> Value {
    match lane_arg(args) {
        Ok(lane) => {
            logic.select_lane(lane, now);
            ok(id)
        },
        Err(reply) => reply.into_value(id),
    }
}

fn set_auto_feed<H: LaneHardware, S: SettingsStore>(
    id: i64,
    args: &Value,
    logic: &mut ControlLogic<H, S>,
    now: u64,
) -> Value {
    let Some(enable) = args.get("enable").and_then(Value::as_bool) else {
        return error(id, "BAD_ARGS", "Missing lane or enable");
    };
    let lane = match lane_arg(args) {
        Ok(lane) => lane,
        Err(LaneArgError::Missing) => return error(id, "BAD_ARGS", "Missing lane or enable"),
        Err(reply) => return reply.into_value(id),
    };
    match logic.set_auto_feed(lane, enable, now) {
        Ok(()) => ok(id),
        Err(e) => logic_error(id, e),
    }
}

fn load_filament<H: LaneHardware, S: SettingsStore>(
    id: i64,
    args: &Value,
    logic: &mut ControlLogic<H, S>,
    now: u64,
    load: bool,
) -> Value {
    let lane = match lane_arg(args) {
        Ok(lane) => lane,
        Err(reply) => return reply.into_value(id),
    };
    let length_mm = match args.get("length_mm") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_u64().and_then(|v| u16::try_from(v).ok()) {
            Some(length) => Some(length),
            None => return error(id, "BAD_ARGS", "Invalid length_mm"),
        },
    };

    let result = if load {
        logic.start_load_filament(lane, length_mm, now)
    } else {
        logic.start_unload_filament(lane, length_mm, now)
    };
    match result {
        Ok(true) if load => ok_with(id, "LOADING", "Load started"),
        Ok(true) => ok_with(id, "UNLOADING", "Unload started"),
        Ok(false) if load => error(id, "BUSY", "Lane not idle"),
        Ok(false) => error(id, "BUSY", "Lane not in use"),
        Err(e) => logic_error(id, e),
    }
}

fn get_filament_info<H: LaneHardware, S: SettingsStore>(
    id: i64,
    args: &Value,
    logic: &ControlLogic<H, S>,
) -> Value {
    let lane = match lane_arg(args) {
        Ok(lane) => lane,
        Err(reply) => return reply.into_value(id),
    };
    let mut reply = filament_fields(logic.lane(lane));
    reply.insert("id".into(), json!(id));
    reply.insert("cmd".into(), json!("GET_FILAMENT_INFO"));
    reply.insert("ok".into(), json!(true));
    reply.insert("lane".into(), json!(lane.get()));
    Value::Object(reply)
}

fn set_filament_info<H: LaneHardware, S: SettingsStore>(
    id: i64,
    args: &Value,
    logic: &mut ControlLogic<H, S>,
    now: u64,
) -> Value {
    let lane = match lane_arg(args) {
        Ok(lane) => lane,
        Err(reply) => return reply.into_value(id),
    };

    let mut info: FilamentInfo = *logic.lane(lane).info();
    if let Some(id_str) = args.get("id_str").and_then(Value::as_str) {
        if info.set_id(id_str).is_err() {
            return error(id, "TOO_LONG", "ID too long (max 8)");
        }
    }
    if let Some(name) = args.get("name").and_then(Value::as_str) {
        if info.set_name(name).is_err() {
            return error(id, "TOO_LONG", "Name too long (max 20)");
        }
    }
    match (temperature_arg(args, "temp_min"), temperature_arg(args, "temp_max")) {
        (Ok(min), Ok(max)) => {
            if let Some(t) = min {
                info.temperature_min = t;
            }
            if let Some(t) = max {
                info.temperature_max = t;
            }
        },
        _ => return error(id, "BAD_ARGS", "temp_min/temp_max must be integers"),
    }
    if let Some(color) = args.get("color").and_then(Value::as_array) {
        if color.len() >= 3 {
            let channel = |i: usize| {
                color
                    .get(i)
                    .and_then(Value::as_i64)
                    .map_or(0, |c| c.clamp(0, 255) as u8)
            };
            let alpha = if color.len() > 3 { channel(3) } else { 255 };
            info.color = Rgba::new(channel(0), channel(1), channel(2), alpha);
        }
    }
    // 整数与浮点都接受
    let meters = args.get("meters").and_then(Value::as_f64).map(|m| m as f32);

    logic.set_filament_info_action(lane, info, meters, now);
    ok(id)
}

// ============================================================================
// 辅助函数
// ============================================================================

/// 通道参数错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneArgError {
    Missing,
    OutOfRange,
}

impl LaneArgError {
    fn into_value(self, id: i64) -> Value {
        match self {
            LaneArgError::Missing => error(id, "BAD_ARGS", "Missing lane"),
            LaneArgError::OutOfRange => error(id, "BAD_LANE", "Lane must be 0-3"),
        }
    }
}

fn lane_arg(args: &Value) -> Result<LaneIndex, LaneArgError> {
    let lane = args
        .get("lane")
        .and_then(Value::as_i64)
        .ok_or(LaneArgError::Missing)?;
    u8::try_from(lane)
        .ok()
        .and_then(|lane| LaneIndex::new(lane).ok())
        .ok_or(LaneArgError::OutOfRange)
}

/// 轴名开头的十进制数字
fn leading_number(axis: &str) -> Option<u8> {
    let digits: String = axis.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// 耗材信息字段（STATUS 与 GET_FILAMENT_INFO 共用）
/// 温度参数：缺省为 `Ok(None)`，整数截断到 `u16`，其余类型（含小数）为错误
fn temperature_arg(args: &Value, key: &str) -> Result<Option<u16>, ()> {
    match args.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(|t| Some(t.clamp(0, u16::MAX as i64) as u16))
            .ok_or(()),
    }
}

fn filament_fields(state: &LaneState) -> Map<String, Value> {
    let info = state.info();
    let meters = if state.meters().is_finite() {
        (state.meters() as f64 * 100.0).round() / 100.0
    } else {
        0.0
    };
    let mut fields = Map::new();
    fields.insert("meters".into(), json!(meters));
    fields.insert("pressure".into(), json!(state.pressure_mv() as f64 / 1000.0));
    fields.insert("rfid".into(), json!(info.id_str()));
    fields.insert("name".into(), json!(info.name_str()));
    fields.insert("temp_min".into(), json!(info.temperature_min));
    fields.insert("temp_max".into(), json!(info.temperature_max));
    fields.insert(
        "color".into(),
        json!([info.color.r, info.color.g, info.color.b, info.color.a]),
    );
    fields
}

fn ok(id: i64) -> Value {
    json!({ "id": id, "ok": true })
}

fn ok_with(id: i64, code: &str, msg: &str) -> Value {
    json!({ "id": id, "ok": true, "code": code, "msg": msg })
}

fn error(id: i64, code: &str, msg: &str) -> Value {
    json!({ "id": id, "ok": false, "code": code, "msg": msg })
}

fn logic_error(id: i64, err: LogicError) -> Value {
    match err {
        LogicError::LaneBusy(_) => error(id, "BUSY", "Lane busy"),
        LogicError::InvalidArgument(field) => error(id, "BAD_ARGS", field),
        other => {
            warn!("klipper command failed: {}", other);
            error(id, "HW_ERROR", &other.to_string())
        },
    }
}

fn parse_error(received: Option<String>, detail: &str) -> Value {
    let mut reply = json!({ "ok": false, "msg": "JSON Parse Error", "error": detail });
    if let (Some(received), Some(obj)) = (received, reply.as_object_mut()) {
        obj.insert("received".into(), json!(received));
    }
    reply
}

fn finish(reply: Value) -> String {
    let mut line = reply.to_string();
    line.push_str("\r\n");
    line
}
