//! 直流电机驱动（H 桥：PWM + 两个方向引脚）
//!
//! 速度以百分比表示（正为前进，负为后退）。斜坡是一个由时钟推进的状态机：
//! [`MotorDriver::set_speed`] 只记录斜坡起点，[`MotorDriver::advance`] 由控制循环
//! 周期调用，按已流逝时间写出对应步的速度。新的 `set_speed` 直接替换进行中的斜坡。
//!
//! # 输出不变量
//!
//! 占空比要么为 0，要么位于 `[min_pwm, max_pwm]`；`|速度| < dead_zone` 时输出 0。

use crate::config::{MotorConfig, PWM_RANGE};
use crate::DriverError;
use crawler_hal::{Level, PinMode, SharedBackend, SharedClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// H 桥方向状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotorDirection {
    /// IN1 高，IN2 低
    Forward,
    /// IN1 低，IN2 高
    Reverse,
    /// 两脚均低（滑行）
    #[default]
    Neutral,
    /// 两脚均高（制动）
    Brake,
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    start: f64,
    target: f64,
    started_at: Instant,
    step_time: Duration,
    steps: u32,
    applied_step: u32,
}

impl Ramp {
    /// `now` 时刻应处于的步序号（封顶于 `steps`）
    fn step_at(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.started_at);
        let step = elapsed.as_nanos() / self.step_time.as_nanos().max(1);
        step.min(self.steps as u128) as u32
    }

    fn value_at(&self, step: u32) -> f64 {
        if step >= self.steps {
            self.target
        } else {
            self.start + (self.target - self.start) * step as f64 / self.steps as f64
        }
    }
}

#[derive(Debug, Default)]
struct MotorState {
    speed: f64,
    target: f64,
    duty: u32,
    direction: MotorDirection,
    ramp: Option<Ramp>,
}

/// 直流电机驱动
pub struct MotorDriver {
    config: MotorConfig,
    backend: SharedBackend,
    clock: SharedClock,
    state: Mutex<MotorState>,
    write_failures: AtomicU64,
}

impl MotorDriver {
    /// 初始化引脚：输出模式、PWM 频率与量程、占空比 0、方向脚全低
    ///
    /// 任何一步失败都视为硬件不可用，返回错误。
    pub fn new(
        backend: SharedBackend,
        config: MotorConfig,
        clock: SharedClock,
    ) -> Result<Self, DriverError> {
        config.validate()?;

        for pin in [config.pwm_pin, config.in1_pin, config.in2_pin] {
            backend.set_mode(pin, PinMode::Output)?;
        }
        let actual_hz = backend.set_pwm_frequency(config.pwm_pin, config.pwm_frequency_hz)?;
        backend.set_pwm_range(config.pwm_pin, PWM_RANGE)?;
        backend.set_pwm_duty(config.pwm_pin, 0)?;
        backend.write(config.in1_pin, Level::Low)?;
        backend.write(config.in2_pin, Level::Low)?;

        info!(
            "Motor '{}' on PWM={} IN1={} IN2={} ({} Hz)",
            config.name, config.pwm_pin, config.in1_pin, config.in2_pin, actual_hz
        );

        Ok(Self {
            config,
            backend,
            clock,
            state: Mutex::new(MotorState::default()),
            write_failures: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    /// 设置目标速度（%）
    ///
    /// 目标被限制到 `±max_pwm`，不会被拒绝。`immediate` 为真时直接输出，
    /// 否则从当前输出速度开始一段新斜坡（减速到 0 的斜坡时长乘以 `stop_ramp_factor`）。
    pub fn set_speed(&self, target: f64, immediate: bool) {
        let target = self.clamp(target);
        let mut state = self.state.lock();
        state.target = target;

        let duration = if target == 0.0 {
            self.config.ramp_time().mul_f64(self.config.stop_ramp_factor)
        } else {
            self.config.ramp_time()
        };
        let step_time = duration / self.config.ramp_steps;

        if immediate || step_time.is_zero() || state.speed == target {
            state.ramp = None;
            self.apply_direct(&mut state, target);
            return;
        }

        debug!(
            "Motor '{}': ramp {:.1} -> {:.1} over {:?}",
            self.config.name, state.speed, target, duration
        );
        state.ramp = Some(Ramp {
            start: state.speed,
            target,
            started_at: self.clock.now(),
            step_time,
            steps: self.config.ramp_steps,
            applied_step: 0,
        });
    }

    /// 推进斜坡，返回斜坡是否仍在进行
    ///
    /// 只在步序号变化时写硬件；最后一步精确落在目标值上。
    pub fn advance(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        let Some(ramp) = state.ramp.as_mut() else {
            return false;
        };

        let step = ramp.step_at(now);
        let finished = step >= ramp.steps;
        let next = (step != ramp.applied_step).then(|| {
            ramp.applied_step = step;
            ramp.value_at(step)
        });
        if finished {
            state.ramp = None;
        }
        if let Some(value) = next {
            self.apply_direct(&mut state, value);
        }
        !finished
    }

    /// 直接输出速度（不经斜坡），调用方持有状态锁
    fn apply_direct(&self, state: &mut MotorState, speed: f64) {
        let mut speed = self.clamp(speed);
        if speed.abs() < self.config.dead_zone {
            speed = 0.0;
        }

        let (direction, in1, in2) = if speed > 0.0 {
            (MotorDirection::Forward, Level::High, Level::Low)
        } else if speed < 0.0 {
            (MotorDirection::Reverse, Level::Low, Level::High)
        } else {
            (MotorDirection::Neutral, Level::Low, Level::Low)
        };
        let duty = if speed == 0.0 {
            0
        } else {
            speed.abs().max(self.config.min_pwm).round() as u32
        };

        self.write_outputs(in1, in2, duty);
        state.speed = speed;
        state.duty = duty;
        state.direction = direction;
    }

    /// 写方向脚和占空比；失败只记录，不中断
    fn write_outputs(&self, in1: Level, in2: Level, duty: u32) {
        let results = [
            self.backend.write(self.config.in1_pin, in1),
            self.backend.write(self.config.in2_pin, in2),
            self.backend.set_pwm_duty(self.config.pwm_pin, duty),
        ];
        for result in results {
            if let Err(e) = result {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Motor '{}': hardware write failed: {}", self.config.name, e);
            }
        }
    }

    fn clamp(&self, speed: f64) -> f64 {
        if speed.is_nan() {
            return 0.0;
        }
        speed.clamp(-self.config.max_pwm, self.config.max_pwm)
    }

    /// 主动制动：方向脚全高，占空比 0，取消斜坡
    pub fn brake(&self) {
        let mut state = self.state.lock();
        state.ramp = None;
        self.write_outputs(Level::High, Level::High, 0);
        state.speed = 0.0;
        state.target = 0.0;
        state.duty = 0;
        state.direction = MotorDirection::Brake;
    }

    /// 斜坡减速到 0
    pub fn stop(&self) {
        self.set_speed(0.0, false);
    }

    pub fn stop_immediate(&self) {
        self.set_speed(0.0, true);
    }

    /// 当前输出速度
    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn target_speed(&self) -> f64 {
        self.state.lock().target
    }

    pub fn duty(&self) -> u32 {
        self.state.lock().duty
    }

    pub fn direction(&self) -> MotorDirection {
        self.state.lock().direction
    }

    pub fn is_ramping(&self) -> bool {
        self.state.lock().ramp.is_some()
    }

    /// 累计硬件写入失败次数
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// 释放输出：取消斜坡，占空比 0，方向脚全低
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        state.ramp = None;
        state.target = 0.0;
        self.apply_direct(&mut state, 0.0);
        info!("Motor '{}' released", self.config.name);
    }
}
