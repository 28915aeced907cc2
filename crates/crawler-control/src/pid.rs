//! PID Controller - 比例-积分-微分控制器
//!
//! # 算法
//!
//! ```text
//! output = clamp(Kp * e + Ki * ∫e dt + Kd * de/dt)
//! ```
//!
//! 其中 `e = setpoint - measurement`。
//!
//! # 时间基准
//!
//! `update` 接收调用方提供的时间戳。构造或 [`PidController::reset`] 之后的第一次调用
//! 只建立时间基准，输出限幅后的比例项；之后 `dt ≤ 0`（时钟回拨或重复时间戳）时
//! 返回 0 且不修改任何状态。
//!
//! # 示例
//!
//! ```rust
//! use crawler_control::PidController;
//! use std::time::{Duration, Instant};
//!
//! let mut pid = PidController::new(0.3, 0.1, 0.05).with_output_limits(-20.0, 20.0);
//! let t0 = Instant::now();
//! let first = pid.update(-10.0, t0);
//! assert!((first - 3.0).abs() < 1e-9);
//! let _ = pid.update(-8.0, t0 + Duration::from_millis(200));
//! ```

use crate::config::PidConfig;
use std::time::Instant;

/// PID 控制器
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    output_min: f64,
    output_max: f64,
    integral_limit: Option<f64>,
    integral: f64,
    previous_error: f64,
    last_time: Option<Instant>,
}

impl PidController {
    /// 创建 PID 控制器
    ///
    /// # 默认参数
    ///
    /// - 设定值 = 0
    /// - 输出限制 = [-20, 20]
    /// - 积分不限制
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            output_min: -20.0,
            output_max: 20.0,
            integral_limit: None,
            integral: 0.0,
            previous_error: 0.0,
            last_time: None,
        }
    }

    pub fn from_config(config: &PidConfig) -> Self {
        let pid = Self::new(config.kp, config.ki, config.kd)
            .with_output_limits(config.output_min, config.output_max);
        match config.integral_limit {
            Some(limit) => pid.with_integral_limit(limit),
            None => pid,
        }
    }

    pub fn with_output_limits(mut self, min: f64, max: f64) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub fn with_setpoint(mut self, setpoint: f64) -> Self {
        self.setpoint = setpoint;
        self
    }

    /// 设置积分项限制
    ///
    /// 防止积分饱和（Integral Windup）。
    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = Some(limit.abs());
        self
    }

    /// 计算一次控制输出
    pub fn update(&mut self, measurement: f64, now: Instant) -> f64 {
        let error = self.setpoint - measurement;

        let Some(last_time) = self.last_time else {
            self.last_time = Some(now);
            self.previous_error = error;
            return self.clamp(self.kp * error);
        };

        let dt = match now.checked_duration_since(last_time) {
            Some(dt) if !dt.is_zero() => dt.as_secs_f64(),
            _ => {
                tracing::warn!(
                    "PID controller received zero or negative dt, returning zero output"
                );
                return 0.0;
            },
        };

        self.integral += error * dt;
        if let Some(limit) = self.integral_limit {
            self.integral = self.integral.clamp(-limit, limit);
        }
        let derivative = (error - self.previous_error) / dt;

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;

        self.previous_error = error;
        self.last_time = Some(now);
        self.clamp(output)
    }

    fn clamp(&self, output: f64) -> f64 {
        output.clamp(self.output_min, self.output_max)
    }

    /// 清零积分与上次误差，并清除时间基准
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.last_time = None;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// 当前积分项（调试用）
    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    /// `(kp, ki, kd)`
    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// `(min, max)`
    pub fn output_limits(&self) -> (f64, f64) {
        (self.output_min, self.output_max)
    }
}
