//! 控制循环指标
//!
//! 原子计数器，控制线程写入，任意线程读取快照，不引入锁竞争。

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 控制循环实时指标
#[derive(Debug, Default)]
pub struct LoopMetrics {
    /// 已执行的周期数
    pub ticks: AtomicU64,

    /// 实际下发了校正的周期数
    pub corrections: AtomicU64,

    /// 周期超时次数
    ///
    /// 持续增长说明硬件写入耗时超过控制周期，应降低控制频率。
    pub overruns: AtomicU64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        LoopMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.corrections.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMetricsSnapshot {
    pub ticks: u64,
    pub corrections: u64,
    pub overruns: u64,
}

impl LoopMetricsSnapshot {
    /// 超时比例（0.0 ~ 1.0）
    pub fn overrun_ratio(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.overruns as f64 / self.ticks as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = LoopMetrics::new();
        metrics.ticks.fetch_add(10, Ordering::Relaxed);
        metrics.overruns.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ticks, 10);
        assert_eq!(snapshot.corrections, 0);
        assert!((snapshot.overrun_ratio() - 0.1).abs() < 1e-12);

        metrics.reset();
        assert_eq!(metrics.snapshot(), LoopMetricsSnapshot::default());
        assert_eq!(metrics.snapshot().overrun_ratio(), 0.0);
    }
}
