//! 单调时钟
//!
//! 以构造时刻为零点，不受系统时间调整影响，单位与控制逻辑的毫秒计数一致。

use crate::Clock;
use std::time::Instant;

/// 自构造起计时的毫秒时钟
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
