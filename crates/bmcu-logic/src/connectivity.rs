//! 连接状态监视
//!
//! 上线需要连续 N 次窗口内心跳（去抖），超时则立即下线。
//! 上下线判据不对称，避免弱链路上反复抖动，同时对真实断线反应迅速。

/// 设备连接状态
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    timeout_ms: u64,
    threshold: u32,
    last_heartbeat: Option<u64>,
    consecutive: u32,
    online: bool,
}

impl ConnectivityMonitor {
    /// 创建监视器
    ///
    /// # 参数
    /// - `timeout_ms`: 相邻心跳的最大间隔
    /// - `threshold`: 上线所需的连续心跳次数（0 按 1 处理）
    pub fn new(timeout_ms: u64, threshold: u32) -> Self {
        Self {
            timeout_ms,
            threshold: threshold.max(1),
            last_heartbeat: None,
            consecutive: 0,
            online: false,
        }
    }

    /// 处理一次心跳或一次周期检查
    ///
    /// `heartbeat = false` 表示周期检查，只做超时判定。
    /// 返回状态发生变化时的新状态。
    pub fn update(&mut self, now: u64, heartbeat: bool) -> Option<bool> {
        let was_online = self.online;
        let in_window = self
            .last_heartbeat
            .is_some_and(|last| now.saturating_sub(last) <= self.timeout_ms);

        if heartbeat {
            self.last_heartbeat = Some(now);
            if in_window {
                self.consecutive = self.consecutive.saturating_add(1);
            } else {
                // 迟到的心跳只作为新一轮计数的第一次
                self.consecutive = 1;
                if was_online {
                    self.online = false;
                    return Some(false);
                }
            }
            if !self.online && self.consecutive >= self.threshold {
                self.online = true;
            }
        } else if !in_window {
            self.online = false;
            self.consecutive = 0;
        }

        (self.online != was_online).then_some(self.online)
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// 最近一次心跳时间
    pub fn last_heartbeat(&self) -> Option<u64> {
        self.last_heartbeat
    }

    /// 当前连续心跳计数
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn time_since_last_heartbeat(&self, now: u64) -> Option<u64> {
        self.last_heartbeat.map(|last| now.saturating_sub(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initially_offline() {
        let mut monitor = ConnectivityMonitor::new(3000, 3);
        assert!(!monitor.is_online());
        assert_eq!(monitor.update(0, false), None);
        assert!(monitor.last_heartbeat().is_none());
    }

    #[test]
    fn test_online_after_threshold() {
        let mut monitor = ConnectivityMonitor::new(3000, 3);
        assert_eq!(monitor.update(0, true), None);
        assert_eq!(monitor.update(1000, true), None);
        assert!(!monitor.is_online());
        assert_eq!(monitor.update(2000, true), Some(true));
        assert!(monitor.is_online());
        assert_eq!(monitor.consecutive(), 3);
    }

    #[test]
    fn test_gap_restarts_count() {
        let mut monitor = ConnectivityMonitor::new(3000, 3);
        monitor.update(0, true);
        monitor.update(1000, true);
        // 间隔超过窗口，重新计数
        monitor.update(5000, true);
        assert_eq!(monitor.consecutive(), 1);
        monitor.update(6000, true);
        assert!(!monitor.is_online());
        monitor.update(7000, true);
        assert!(monitor.is_online());
    }

    #[test]
    fn test_late_heartbeat_goes_offline() {
        let mut monitor = ConnectivityMonitor::new(3000, 3);
        for t in [0, 1000, 2000] {
            monitor.update(t, true);
        }
        assert!(monitor.is_online());
        assert_eq!(monitor.update(6000, true), Some(false));
        assert!(!monitor.is_online());
        assert_eq!(monitor.time_since_last_heartbeat(6500), Some(500));
    }

    #[test]
    fn test_late_heartbeat_goes_offline_with_threshold_one() {
        let mut monitor = ConnectivityMonitor::new(3000, 1);
        assert_eq!(monitor.update(0, true), Some(true));
        assert_eq!(monitor.update(5000, true), Some(false));
        assert!(!monitor.is_online());
        assert_eq!(monitor.consecutive(), 1);
        // 下一次窗口内心跳重新上线
        assert_eq!(monitor.update(6000, true), Some(true));
    }

    #[test]
    fn test_tick_timeout_goes_offline() {
        let mut monitor = ConnectivityMonitor::new(3000, 1);
        assert_eq!(monitor.update(100, true), Some(true));
        assert_eq!(monitor.update(3100, false), None);
        assert_eq!(monitor.update(3101, false), Some(false));
        assert_eq!(monitor.consecutive(), 0);
    }

    #[test]
    fn test_zero_threshold_treated_as_one() {
        let mut monitor = ConnectivityMonitor::new(3000, 0);
        assert_eq!(monitor.update(0, true), Some(true));
    }
}
