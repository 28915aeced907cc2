//! 轮速编码器
//!
//! 边沿回调运行在硬件后端的通知上下文中，只做原子计数；
//! 测速由控制循环在自己的线程里调用 [`Encoder::sample_velocity`] 完成。
//!
//! # 计数语义
//!
//! - `count`：滚动计数，只在 [`Encoder::reset`] / [`Encoder::reset_total`] 时清零
//! - `total_count`：累计计数，只在 [`Encoder::reset_total`] 时清零
//! - `since_sample`：距上次测速的增量，测速时原子地读出并清零，
//!   因此 reset 与测速交错时增量不会变成负数
//!
//! 正交模式下 A 相每个边沿计一次，同时根据 B 相电平判向：
//! A 与 B 电平不同为正转，相同为反转。

use crate::config::{EncoderConfig, EncoderMode};
use crate::DriverError;
use crawler_hal::{CallbackId, Edge, Level, PinMode, Pull, SharedBackend, SharedClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// 旋转方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// 单相模式或尚未观测到边沿
    #[default]
    Unknown = 0,
    Forward = 1,
    Reverse = 2,
}

impl Direction {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Forward,
            2 => Self::Reverse,
            _ => Self::Unknown,
        }
    }
}

/// 边沿计数器（回调与读取方共享，只含原子量）
#[derive(Debug, Default)]
struct EdgeCounters {
    count: AtomicU64,
    total: AtomicU64,
    since_sample: AtomicU64,
    position: AtomicI64,
    direction: AtomicU8,
    phase_b: AtomicBool,
}

impl EdgeCounters {
    /// A 相边沿
    #[inline]
    fn on_edge(&self, level: Level, quadrature: bool) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.since_sample.fetch_add(1, Ordering::AcqRel);

        if quadrature {
            let forward = level.is_high() != self.phase_b.load(Ordering::Relaxed);
            let (step, direction) = if forward {
                (1, Direction::Forward)
            } else {
                (-1, Direction::Reverse)
            };
            self.position.fetch_add(step, Ordering::Relaxed);
            self.direction.store(direction as u8, Ordering::Relaxed);
        }
    }

    /// B 相边沿：只记录电平
    #[inline]
    fn on_phase_b(&self, level: Level) {
        self.phase_b.store(level.is_high(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Sampler {
    last_sample: Instant,
    rpm: f64,
    velocity_mm_s: f64,
    window: VecDeque<f64>,
}

/// 轮速编码器
pub struct Encoder {
    config: EncoderConfig,
    backend: SharedBackend,
    clock: SharedClock,
    counters: Arc<EdgeCounters>,
    sampler: Mutex<Sampler>,
    callbacks: Mutex<SmallVec<[CallbackId; 2]>>,
}

impl Encoder {
    /// 配置输入引脚（上拉）并注册边沿回调
    pub fn new(
        backend: SharedBackend,
        config: EncoderConfig,
        clock: SharedClock,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let quadrature = config.mode == EncoderMode::Quadrature;
        let counters = Arc::new(EdgeCounters::default());

        let mut pins: SmallVec<[_; 2]> = SmallVec::new();
        pins.push(config.pin_a);
        if quadrature {
            pins.push(config.pin_b);
        }
        for &pin in &pins {
            backend.set_mode(pin, PinMode::Input)?;
            backend.set_pull(pin, Pull::Up)?;
        }

        let mut callbacks = SmallVec::new();
        if quadrature {
            let initial_b = backend.read(config.pin_b)?;
            counters.on_phase_b(initial_b);

            let c = counters.clone();
            let id = backend.register_edge_callback(
                config.pin_b,
                Edge::Either,
                Arc::new(move |_, level, _| c.on_phase_b(level)),
            )?;
            callbacks.push(id);
        }

        let c = counters.clone();
        let id = match backend.register_edge_callback(
            config.pin_a,
            Edge::Either,
            Arc::new(move |_, level, _| c.on_edge(level, quadrature)),
        ) {
            Ok(id) => id,
            Err(e) => {
                for id in callbacks.drain(..) {
                    let _ = backend.cancel_callback(id);
                }
                return Err(e.into());
            },
        };
        callbacks.push(id);

        info!(
            "Encoder '{}' on A={} B={} ({:?})",
            config.name, config.pin_a, config.pin_b, config.mode
        );

        let window = VecDeque::with_capacity(config.smoothing_window);
        let now = clock.now();
        Ok(Self {
            config,
            backend,
            clock,
            counters,
            sampler: Mutex::new(Sampler {
                last_sample: now,
                rpm: 0.0,
                velocity_mm_s: 0.0,
                window,
            }),
            callbacks: Mutex::new(callbacks),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// 在 `now` 时刻测速，返回 RPM（无符号）
    ///
    /// 距上次测速不足最小间隔时返回缓存值；时钟回拨或零间隔时跳过本次更新。
    /// 超过合理上限的读数视为毛刺：缓存值置 0 并记录警告。
    pub fn sample_velocity(&self, now: Instant) -> f64 {
        let mut sampler = self.sampler.lock();

        let elapsed = match now.checked_duration_since(sampler.last_sample) {
            Some(elapsed) if !elapsed.is_zero() => elapsed,
            _ => {
                debug!("Encoder '{}': non-positive sample interval, skipped", self.config.name);
                return sampler.rpm;
            },
        };
        if elapsed < self.config.min_sample_interval() {
            return sampler.rpm;
        }

        let delta = self.counters.since_sample.swap(0, Ordering::AcqRel);
        sampler.last_sample = now;

        let secs = elapsed.as_secs_f64();
        let revolutions = delta as f64 / self.config.pulses_per_revolution as f64;
        let rpm = revolutions / secs * 60.0;

        if rpm > self.config.max_plausible_rpm {
            warn!(
                "Encoder '{}': implausible reading {:.1} RPM ({} edges in {:?}), treated as glitch",
                self.config.name, rpm, delta, elapsed
            );
            sampler.rpm = 0.0;
            sampler.velocity_mm_s = 0.0;
            return 0.0;
        }

        sampler.rpm = rpm;
        sampler.velocity_mm_s = revolutions * self.config.wheel_circumference_mm() / secs;
        if sampler.window.len() == self.config.smoothing_window {
            sampler.window.pop_front();
        }
        sampler.window.push_back(rpm);
        rpm
    }

    /// 以当前时钟测速
    pub fn rpm(&self) -> f64 {
        self.sample_velocity(self.clock.now())
    }

    /// 最近一次测速结果（无副作用）
    pub fn cached_rpm(&self) -> f64 {
        self.sampler.lock().rpm
    }

    /// 平滑窗口内的平均 RPM，窗口为空时返回缓存值
    pub fn average_rpm(&self) -> f64 {
        let sampler = self.sampler.lock();
        if sampler.window.is_empty() {
            sampler.rpm
        } else {
            sampler.window.iter().sum::<f64>() / sampler.window.len() as f64
        }
    }

    /// 最近一次测速得到的线速度（mm/s，无符号）
    pub fn velocity_mm_s(&self) -> f64 {
        self.sampler.lock().velocity_mm_s
    }

    pub fn count(&self) -> u64 {
        self.counters.count.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    /// 带符号位置（正交模式；单相模式恒为 0）
    pub fn position(&self) -> i64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    pub fn direction(&self) -> Direction {
        Direction::from_u8(self.counters.direction.load(Ordering::Relaxed))
    }

    /// 累计行驶距离（mm）
    pub fn distance_mm(&self) -> f64 {
        self.total_count() as f64 / self.config.pulses_per_revolution as f64
            * self.config.wheel_circumference_mm()
    }

    /// 清零滚动计数与位置，累计计数保留
    pub fn reset(&self) {
        self.counters.count.store(0, Ordering::Relaxed);
        self.counters.position.store(0, Ordering::Relaxed);
        self.counters.direction.store(Direction::Unknown as u8, Ordering::Relaxed);
        self.rebaseline();
    }

    /// 清零全部计数
    pub fn reset_total(&self) {
        self.counters.total.store(0, Ordering::Relaxed);
        self.reset();
    }

    fn rebaseline(&self) {
        let mut sampler = self.sampler.lock();
        self.counters.since_sample.store(0, Ordering::Release);
        sampler.last_sample = self.clock.now();
    }

    /// 注销边沿回调（幂等）
    pub fn cleanup(&self) {
        let ids: SmallVec<[CallbackId; 2]> = self.callbacks.lock().drain(..).collect();
        if ids.is_empty() {
            return;
        }
        for id in ids {
            if let Err(e) = self.backend.cancel_callback(id) {
                warn!("Encoder '{}': failed to cancel callback: {}", self.config.name, e);
            }
        }
        info!("Encoder '{}' released", self.config.name);
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_hal::{ManualClock, MockBackend};
    use std::time::Duration;

    fn setup(config: EncoderConfig) -> (Arc<MockBackend>, Arc<ManualClock>, Encoder) {
        let backend = MockBackend::shared();
        let clock = Arc::new(ManualClock::new());
        let encoder = Encoder::new(backend.clone(), config, clock.clone()).unwrap();
        (backend, clock, encoder)
    }

    #[test]
    fn test_rpm_from_pulses() {
        let (backend, clock, encoder) = setup(EncoderConfig::left());

        backend.fire_pulses(17, 4);
        clock.advance(Duration::from_secs(1));

        assert!((encoder.rpm() - 60.0).abs() < 1e-9);
        assert!((encoder.cached_rpm() - 60.0).abs() < 1e-9);
        // 一转 = 一个周长
        assert!((encoder.velocity_mm_s() - encoder.config().wheel_circumference_mm()).abs() < 1e-9);
    }

    #[test]
    fn test_sample_interval_gate() {
        let (backend, clock, encoder) = setup(EncoderConfig::left());

        backend.fire_pulses(17, 4);
        clock.advance(Duration::from_millis(20));
        assert_eq!(encoder.rpm(), 0.0);

        // 增量没有被消耗，下一次合法测速仍然能看到
        clock.advance(Duration::from_millis(980));
        assert!((encoder.rpm() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_backwards_is_skipped() {
        let (backend, clock, encoder) = setup(EncoderConfig::left());
        clock.set_elapsed(Duration::from_secs(1));
        backend.fire_pulses(17, 4);
        assert!((encoder.rpm() - 60.0).abs() < 1e-9);

        backend.fire_pulses(17, 40);
        clock.set_elapsed(Duration::from_millis(500));
        assert!((encoder.rpm() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_rpm_is_zeroed() {
        let (backend, clock, encoder) = setup(EncoderConfig::left());
        // 400 边沿 / 50ms = 120000 RPM
        backend.fire_pulses(17, 400);
        clock.advance(Duration::from_millis(50));
        assert_eq!(encoder.rpm(), 0.0);
        assert_eq!(encoder.cached_rpm(), 0.0);
    }

    #[test]
    fn test_reset_vs_reset_total() {
        let (backend, _clock, encoder) = setup(EncoderConfig::left());
        backend.fire_pulses(17, 10);
        assert_eq!(encoder.count(), 10);
        assert_eq!(encoder.total_count(), 10);

        encoder.reset();
        assert_eq!(encoder.count(), 0);
        assert_eq!(encoder.total_count(), 10);

        backend.fire_pulses(17, 3);
        encoder.reset_total();
        assert_eq!(encoder.count(), 0);
        assert_eq!(encoder.total_count(), 0);
    }

    #[test]
    fn test_reset_never_makes_delta_negative() {
        let (backend, clock, encoder) = setup(EncoderConfig::left());
        backend.fire_pulses(17, 8);
        encoder.reset();
        backend.fire_pulses(17, 4);
        clock.advance(Duration::from_secs(1));
        assert!((encoder.rpm() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_quadrature_direction() {
        let (backend, _clock, encoder) = setup(EncoderConfig::left());

        // B 低：A 上升沿为正转
        backend.fire_edge(17, Level::High);
        assert_eq!(encoder.direction(), Direction::Forward);
        assert_eq!(encoder.position(), 1);

        // B 高：A 下降沿为正转，上升沿为反转
        backend.fire_edge(27, Level::High);
        backend.fire_edge(17, Level::Low);
        assert_eq!(encoder.position(), 2);
        backend.fire_edge(17, Level::High);
        assert_eq!(encoder.direction(), Direction::Reverse);
        assert_eq!(encoder.position(), 1);
        // B 相边沿不计入幅值
        assert_eq!(encoder.count(), 3);
    }

    #[test]
    fn test_single_channel_has_no_direction() {
        let mut config = EncoderConfig::right();
        config.mode = EncoderMode::SingleChannel;
        let (backend, _clock, encoder) = setup(config);

        backend.fire_pulses(5, 6);
        backend.fire_pulses(6, 6);
        assert_eq!(encoder.count(), 6);
        assert_eq!(encoder.position(), 0);
        assert_eq!(encoder.direction(), Direction::Unknown);
        assert_eq!(backend.callback_count(), 1);
    }

    #[test]
    fn test_average_rpm_window() {
        let (backend, clock, encoder) = setup(EncoderConfig::left());
        for pulses in [4usize, 8] {
            backend.fire_pulses(17, pulses);
            clock.advance(Duration::from_secs(1));
            encoder.rpm();
        }
        assert!((encoder.average_rpm() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance() {
        let (backend, _clock, encoder) = setup(EncoderConfig::left());
        backend.fire_pulses(17, 8);
        let expected = 2.0 * encoder.config().wheel_circumference_mm();
        assert!((encoder.distance_mm() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_cleanup_cancels_callbacks() {
        let (backend, _clock, encoder) = setup(EncoderConfig::left());
        assert_eq!(backend.callback_count(), 2);
        encoder.cleanup();
        encoder.cleanup();
        assert_eq!(backend.callback_count(), 0);

        backend.fire_pulses(17, 4);
        assert_eq!(encoder.count(), 0);
    }
}
