//! 平滑角度执行器（摄像头舵机）
//!
//! 平滑运动在调用线程上同步执行：按 smoothstep 曲线插值，逐步写脉宽并休眠。
//! 同一时刻只允许一个平滑运动，并发请求立即返回 [`DriverError::ActuatorBusy`]，
//! 进行中的运动不受影响。

use crate::config::{MAX_SPEED_FACTOR, MIN_SPEED_FACTOR, ServoConfig};
use crate::easing::smoothstep;
use crate::DriverError;
use crawler_hal::{SharedBackend, SharedClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// cleanup 等待运动结束时的轮询间隔
const CLEANUP_POLL: Duration = Duration::from_millis(10);

/// 一次平滑运动的插值计划
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovePlan {
    pub start: f64,
    pub target: f64,
    pub duration: Duration,
    pub steps: u32,
}

impl MovePlan {
    /// 计算运动计划
    ///
    /// # 参数
    ///
    /// - `duration`: 指定时长；为 `None` 时按 `base + proportional * |Δ| / 180`
    ///   计算并除以速度系数
    ///
    /// 时长最终被限制到 `[min_duration, max_duration]`，
    /// 步数为 `max(2, duration * update_rate)`。
    pub fn compute(
        config: &ServoConfig,
        start: f64,
        target: f64,
        speed_factor: f64,
        duration: Option<Duration>,
    ) -> Self {
        let secs = match duration {
            Some(d) => d.as_secs_f64(),
            None => {
                let base = config.base_duration_ms as f64 / 1000.0;
                let proportional = config.proportional_duration_ms as f64 / 1000.0;
                (base + proportional * (target - start).abs() / 180.0) / speed_factor
            },
        };
        let min = config.min_duration_ms as f64 / 1000.0;
        let max = config.max_duration_ms as f64 / 1000.0;
        let secs = secs.clamp(min, max);
        let steps = ((secs * config.update_rate_hz as f64) as u32).max(2);

        Self {
            start,
            target,
            duration: Duration::from_secs_f64(secs),
            steps,
        }
    }

    /// 第 `step` 步的角度（`0..=steps`）
    pub fn angle_at(&self, step: u32) -> f64 {
        let t = smoothstep(step as f64 / self.steps as f64);
        self.start + (self.target - self.start) * t
    }

    pub fn step_delay(&self) -> Duration {
        self.duration / self.steps
    }
}

#[derive(Debug)]
struct ServoState {
    angle: f64,
    target: f64,
    speed_factor: f64,
}

/// 运动标志守卫，离开作用域时清除标志
struct MovingGuard<'a>(&'a AtomicBool);

impl Drop for MovingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 平滑角度执行器
pub struct SmoothAngleActuator {
    config: ServoConfig,
    backend: SharedBackend,
    clock: SharedClock,
    state: Mutex<ServoState>,
    moving: AtomicBool,
}

impl SmoothAngleActuator {
    /// 创建执行器并直接写出默认角度
    pub fn new(
        backend: SharedBackend,
        config: ServoConfig,
        clock: SharedClock,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let actuator = Self {
            state: Mutex::new(ServoState {
                angle: config.default_angle,
                target: config.default_angle,
                speed_factor: config.speed_factor,
            }),
            config,
            backend,
            clock,
            moving: AtomicBool::new(false),
        };

        let pulse = actuator.angle_to_pulse_width(actuator.config.default_angle);
        actuator
            .backend
            .set_servo_pulse_width(actuator.config.pin, pulse)?;

        info!(
            "Servo '{}' on GPIO {} ({}°..{}°, {}..{} µs)",
            actuator.config.name,
            actuator.config.pin,
            actuator.config.min_angle,
            actuator.config.max_angle,
            actuator.config.min_pulse_us,
            actuator.config.max_pulse_us
        );
        Ok(actuator)
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    fn clamp(&self, angle: f64) -> f64 {
        if angle.is_nan() {
            return self.config.default_angle;
        }
        angle.clamp(self.config.min_angle, self.config.max_angle)
    }

    /// 角度转脉宽（µs，截断取整）
    pub fn angle_to_pulse_width(&self, angle: f64) -> u32 {
        let angle = self.clamp(angle);
        let span = (self.config.max_pulse_us - self.config.min_pulse_us) as f64;
        (self.config.min_pulse_us as f64 + angle / 180.0 * span) as u32
    }

    fn write_angle(&self, angle: f64) {
        let pulse = self.angle_to_pulse_width(angle);
        if let Err(e) = self.backend.set_servo_pulse_width(self.config.pin, pulse) {
            warn!("Servo '{}': pulse write failed: {}", self.config.name, e);
        }
    }

    /// 转到目标角度
    ///
    /// # 参数
    ///
    /// - `target`: 目标角度，超出范围时被限制
    /// - `smooth`: 是否平滑运动（阻塞调用方直到运动结束）
    /// - `duration`: 平滑运动时长，`None` 为按角度差自动计算
    ///
    /// # 错误
    ///
    /// 已有平滑运动进行中时返回 [`DriverError::ActuatorBusy`]（平滑和直接写都会被拒绝）。
    pub fn set_angle(
        &self,
        target: f64,
        smooth: bool,
        duration: Option<Duration>,
    ) -> Result<(), DriverError> {
        let target = self.clamp(target);
        let current = self.angle();
        if (target - current).abs() < self.config.dead_band_deg {
            return Ok(());
        }

        // 直接写与平滑运动共用同一个占用标志，运动进行中的直接写同样被拒绝
        let _guard = self.acquire(target)?;

        if !smooth {
            self.write_angle(target);
            let mut state = self.state.lock();
            state.angle = target;
            state.target = target;
            return Ok(());
        }

        let (start, speed_factor) = {
            let mut state = self.state.lock();
            state.target = target;
            (state.angle, state.speed_factor)
        };
        let plan = MovePlan::compute(&self.config, start, target, speed_factor, duration);
        let delay = plan.step_delay();

        for step in 0..=plan.steps {
            let angle = plan.angle_at(step);
            self.write_angle(angle);
            self.state.lock().angle = angle;
            if step < plan.steps {
                self.clock.sleep(delay);
            }
        }
        self.state.lock().angle = target;

        debug!(
            "Servo '{}': {:.2}° -> {:.2}° in {:?} ({} steps)",
            self.config.name, start, target, plan.duration, plan.steps
        );
        Ok(())
    }

    fn acquire(&self, target: f64) -> Result<MovingGuard<'_>, DriverError> {
        if self
            .moving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "Servo '{}': move to {:.1}° rejected, already moving",
                self.config.name, target
            );
            return Err(DriverError::ActuatorBusy);
        }
        Ok(MovingGuard(&self.moving))
    }

    /// 相对当前角度转动
    pub fn move_by(&self, delta: f64, smooth: bool) -> Result<(), DriverError> {
        self.set_angle(self.angle() + delta, smooth, None)
    }

    /// 把 `[min, max]` 区间内的输入值映射到角度范围并平滑转动（如滑块输入）
    pub fn set_angle_proportional(&self, value: f64, min: f64, max: f64) -> Result<(), DriverError> {
        if !(max > min) {
            return Err(DriverError::InvalidInput(format!(
                "empty input range [{}, {}]",
                min, max
            )));
        }
        let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
        let angle =
            self.config.min_angle + normalized * (self.config.max_angle - self.config.min_angle);
        self.set_angle(angle, true, None)
    }

    /// 平滑回到角度范围中点
    pub fn center(&self) -> Result<(), DriverError> {
        let middle = (self.config.min_angle + self.config.max_angle) / 2.0;
        self.set_angle(middle, true, None)
    }

    /// 设置速度系数（限制到 [0.1, 5.0]），返回实际采用的值
    pub fn set_speed_factor(&self, factor: f64) -> f64 {
        let factor = if factor.is_nan() {
            1.0
        } else {
            factor.clamp(MIN_SPEED_FACTOR, MAX_SPEED_FACTOR)
        };
        self.state.lock().speed_factor = factor;
        factor
    }

    pub fn speed_factor(&self) -> f64 {
        self.state.lock().speed_factor
    }

    pub fn angle(&self) -> f64 {
        self.state.lock().angle
    }

    pub fn target_angle(&self) -> f64 {
        self.state.lock().target
    }

    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::Acquire)
    }

    /// 等待进行中的运动结束，然后关闭舵机输出（脉宽 0）
    pub fn cleanup(&self) {
        let deadline = self.clock.now()
            + Duration::from_millis(self.config.max_duration_ms)
            + Duration::from_secs(1);
        while self.is_moving() {
            if self.clock.now() >= deadline {
                warn!("Servo '{}': move still running at cleanup", self.config.name);
                break;
            }
            self.clock.sleep(CLEANUP_POLL);
        }

        if let Err(e) = self.backend.set_servo_pulse_width(self.config.pin, 0) {
            warn!("Servo '{}': failed to switch off: {}", self.config.name, e);
        }
        info!("Servo '{}' released", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_hal::{ManualClock, MockBackend, SystemClock};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn setup() -> (Arc<MockBackend>, Arc<ManualClock>, SmoothAngleActuator) {
        let backend = MockBackend::shared();
        let clock = Arc::new(ManualClock::new());
        let servo =
            SmoothAngleActuator::new(backend.clone(), ServoConfig::default(), clock.clone())
                .unwrap();
        (backend, clock, servo)
    }

    #[test]
    fn test_new_writes_default_angle() {
        let (backend, _clock, servo) = setup();
        assert_eq!(backend.servo_pulse(24), 1500);
        assert_eq!(servo.angle(), 90.0);
    }

    #[test]
    fn test_angle_to_pulse_width() {
        let (_backend, _clock, servo) = setup();
        assert_eq!(servo.angle_to_pulse_width(0.0), 600);
        assert_eq!(servo.angle_to_pulse_width(180.0), 2400);
        assert_eq!(servo.angle_to_pulse_width(45.0), 1050);
        assert_eq!(servo.angle_to_pulse_width(-20.0), 600);
        assert_eq!(servo.angle_to_pulse_width(500.0), 2400);
        // 截断
        assert_eq!(servo.angle_to_pulse_width(0.15), 601);
    }

    #[test]
    fn test_direct_move() {
        let (backend, clock, servo) = setup();
        servo.set_angle(180.0, false, None).unwrap();
        assert_eq!(backend.servo_pulse(24), 2400);
        assert_eq!(servo.angle(), 180.0);
        assert_eq!(clock.sleep_calls(), 0);
    }

    #[test]
    fn test_dead_band_is_noop() {
        let (backend, _clock, servo) = setup();
        backend.clear_writes();
        servo.set_angle(90.05, true, None).unwrap();
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn test_smooth_move_profile() {
        let (backend, clock, servo) = setup();
        backend.clear_writes();
        servo.set_angle(0.0, true, None).unwrap();

        // 0.05 + 0.6 * 90/180 = 0.35s, 52 步
        let pulses = backend.servo_history(24);
        assert_eq!(pulses.len(), 53);
        assert_eq!(pulses.first(), Some(&1500));
        assert_eq!(pulses.last(), Some(&600));
        assert!(pulses.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(clock.sleep_calls(), 52);
        assert!((clock.total_slept().as_secs_f64() - 0.35).abs() < 1e-6);

        assert_eq!(servo.angle(), 0.0);
        assert!(!servo.is_moving());
    }

    #[test]
    fn test_speed_factor() {
        let (_backend, clock, servo) = setup();
        assert_eq!(servo.set_speed_factor(10.0), 5.0);
        assert_eq!(servo.set_speed_factor(0.01), 0.1);
        servo.set_speed_factor(2.0);

        servo.set_angle(180.0, true, None).unwrap();
        assert!((clock.total_slept().as_secs_f64() - 0.175).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_duration_is_clamped() {
        let (_backend, clock, servo) = setup();
        servo
            .set_angle(0.0, true, Some(Duration::from_secs(10)))
            .unwrap();
        assert!((clock.total_slept().as_secs_f64() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_move_plan_minimum_steps() {
        let config = ServoConfig::default();
        let plan = MovePlan::compute(&config, 90.0, 91.0, 1.0, Some(Duration::from_millis(1)));
        assert!((plan.duration.as_secs_f64() - 0.03).abs() < 1e-9);
        assert_eq!(plan.steps, 4);

        let plan = MovePlan::compute(&config, 0.0, 10.0, 1.0, Some(Duration::from_millis(5)));
        assert!(plan.steps >= 2);
        assert_eq!(plan.angle_at(0), 0.0);
        assert_eq!(plan.angle_at(plan.steps), 10.0);
    }

    #[test]
    fn test_move_by_and_proportional() {
        let (_backend, _clock, servo) = setup();
        servo.move_by(-30.0, false).unwrap();
        assert_eq!(servo.angle(), 60.0);

        servo.set_angle_proportional(100.0, 0.0, 100.0).unwrap();
        assert_eq!(servo.angle(), 180.0);
        servo.set_angle_proportional(-5.0, 0.0, 100.0).unwrap();
        assert_eq!(servo.angle(), 0.0);

        assert!(matches!(
            servo.set_angle_proportional(1.0, 5.0, 5.0),
            Err(DriverError::InvalidInput(_))
        ));

        servo.center().unwrap();
        assert_eq!(servo.angle(), 90.0);
    }

    #[test]
    fn test_moving_servo_rejects_other_writes() {
        let backend = MockBackend::shared();
        let servo = Arc::new(
            SmoothAngleActuator::new(backend.clone(), ServoConfig::default(), SystemClock::shared())
                .unwrap(),
        );

        let mover = {
            let servo = servo.clone();
            thread::spawn(move || servo.set_angle(180.0, true, Some(Duration::from_millis(500))))
        };
        let deadline = Instant::now() + Duration::from_secs(1);
        while !servo.is_moving() {
            assert!(Instant::now() < deadline, "smooth move never started");
            thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(
            servo.set_angle(10.0, true, None),
            Err(DriverError::ActuatorBusy)
        ));
        assert!(matches!(
            servo.set_angle(0.0, false, None),
            Err(DriverError::ActuatorBusy)
        ));
        assert_eq!(servo.target_angle(), 180.0);

        mover.join().unwrap().unwrap();
        assert_eq!(servo.angle(), 180.0);
        assert_eq!(servo.target_angle(), servo.angle());
        assert_eq!(backend.servo_pulse(24), 2400);
        assert!(!servo.is_moving());

        // 运动结束后直接写恢复可用
        servo.set_angle(0.0, false, None).unwrap();
        assert_eq!(backend.servo_pulse(24), 600);
    }

    #[test]
    fn test_write_failure_still_completes() {
        let (backend, _clock, servo) = setup();
        backend.set_fail_writes(true);
        servo.set_angle(120.0, true, None).unwrap();
        assert_eq!(servo.angle(), 120.0);
        assert!(!servo.is_moving());
    }

    #[test]
    fn test_cleanup_switches_off() {
        let (backend, _clock, servo) = setup();
        servo.cleanup();
        assert_eq!(backend.servo_pulse(24), 0);
    }
}
