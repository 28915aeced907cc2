//! 周期控制循环
//!
//! 在独立线程中以固定频率调用 [`DrivetrainSynchronizer::tick`]：推进电机斜坡，
//! 并在校正周期到达时执行同步校正。
//!
//! # 调度
//!
//! 使用绝对时间锚点（`next_tick += period`）消除累积漂移；等待通过
//! `recv_deadline` 完成，停止信号可以随时打断等待。某个周期超时后重新锚定到当前时刻，
//! 不做追赶。

use crate::ControlError;
use crate::config::LoopConfig;
use crate::drivetrain::DrivetrainSynchronizer;
use crate::metrics::LoopMetrics;
use crawler_hal::{JoinTimeout, SharedClock};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 控制循环句柄
///
/// 丢弃句柄即停止循环并等待线程退出（最多 2 秒）。
pub struct ControlLoop {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<LoopMetrics>,
    is_running: Arc<AtomicBool>,
}

impl ControlLoop {
    /// 启动控制线程
    ///
    /// # 错误
    ///
    /// - `ControlError::InvalidConfig`: 控制频率非法
    /// - `ControlError::Thread`: 线程创建失败
    pub fn spawn(
        drivetrain: Arc<DrivetrainSynchronizer>,
        clock: SharedClock,
        config: LoopConfig,
    ) -> Result<Self, ControlError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let metrics = Arc::new(LoopMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let handle = {
            let metrics = metrics.clone();
            let is_running = is_running.clone();
            thread::Builder::new()
                .name("crawler-control".into())
                .spawn(move || {
                    run_loop(&drivetrain, &clock, &config, &shutdown_rx, &metrics);
                    is_running.store(false, Ordering::Release);
                })
                .map_err(ControlError::Thread)?
        };

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            metrics,
            is_running,
        })
    }

    pub fn metrics(&self) -> Arc<LoopMetrics> {
        self.metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 停止循环并等待线程退出
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // 关闭发送端即唤醒等待中的 recv_deadline
        drop(self.shutdown_tx.take());

        if let Some(handle) = self.handle.take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "Control thread panicked or failed to shut down within {:?}",
                JOIN_TIMEOUT
            );
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(
    drivetrain: &DrivetrainSynchronizer,
    clock: &SharedClock,
    config: &LoopConfig,
    shutdown_rx: &Receiver<()>,
    metrics: &LoopMetrics,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => info!("Control thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Failed to set control thread priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }

    let period = config.period();
    info!("Control loop started ({} Hz)", config.frequency_hz);

    let mut next_tick = Instant::now() + period;
    loop {
        match shutdown_rx.recv_deadline(next_tick) {
            Err(RecvTimeoutError::Timeout) => {},
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        metrics.ticks.fetch_add(1, Ordering::Relaxed);
        if drivetrain.tick(clock.now()) {
            metrics.corrections.fetch_add(1, Ordering::Relaxed);
        }

        next_tick += period;
        let now = Instant::now();
        if now > next_tick {
            metrics.overruns.fetch_add(1, Ordering::Relaxed);
            if config.overrun_warn {
                warn!("Control cycle overrun: {:?} behind schedule", now - next_tick);
            }
            next_tick = now;
        }
    }

    info!("Control loop stopped");
}
