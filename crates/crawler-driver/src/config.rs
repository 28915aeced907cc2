//! 驱动层配置
//!
//! 所有通道编号和调参量都是构造期配置，默认值对应履带底盘的实际接线：
//!
//! | 组件 | 引脚 |
//! |------|------|
//! | 左电机 | PWM 18, IN1 20, IN2 21 |
//! | 右电机 | PWM 13, IN1 19, IN2 26 |
//! | 左编码器 | A 17, B 27 |
//! | 右编码器 | A 5, B 6 |
//! | 摄像头舵机 | 24 |
//!
//! 时长字段以毫秒整数表示，便于在 TOML 中书写。

use crate::DriverError;
use crawler_hal::Gpio;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PWM 占空比量程（占空比即百分比）
pub const PWM_RANGE: u32 = 100;

/// 电机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// 日志中使用的名称
    pub name: String,
    pub pwm_pin: Gpio,
    pub in1_pin: Gpio,
    pub in2_pin: Gpio,
    pub pwm_frequency_hz: u32,
    /// 速度上限（%），目标速度被限制在 ±max_pwm
    pub max_pwm: f64,
    /// 非零输出时的最小占空比（%），低于该值电机无法克服静摩擦
    pub min_pwm: f64,
    /// 死区（%），|速度| 小于该值视为 0
    pub dead_zone: f64,
    /// 加速斜坡总时长
    pub ramp_time_ms: u64,
    pub ramp_steps: u32,
    /// 减速到 0 的斜坡时长系数（相对 ramp_time）
    pub stop_ramp_factor: f64,
}

impl MotorConfig {
    pub fn left() -> Self {
        Self {
            name: "left".to_string(),
            pwm_pin: 18,
            in1_pin: 20,
            in2_pin: 21,
            ..Self::base()
        }
    }

    pub fn right() -> Self {
        Self {
            name: "right".to_string(),
            pwm_pin: 13,
            in1_pin: 19,
            in2_pin: 26,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            name: String::new(),
            pwm_pin: 0,
            in1_pin: 0,
            in2_pin: 0,
            pwm_frequency_hz: 450,
            max_pwm: 80.0,
            min_pwm: 20.0,
            dead_zone: 15.0,
            ramp_time_ms: 800,
            ramp_steps: 20,
            stop_ramp_factor: 0.5,
        }
    }

    pub fn ramp_time(&self) -> Duration {
        Duration::from_millis(self.ramp_time_ms)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if !(self.max_pwm > 0.0 && self.max_pwm <= PWM_RANGE as f64) {
            return Err(invalid(&self.name, "max_pwm must be in (0, 100]"));
        }
        if !(self.min_pwm >= 0.0 && self.min_pwm <= self.max_pwm) {
            return Err(invalid(&self.name, "min_pwm must be in [0, max_pwm]"));
        }
        if !(self.dead_zone >= 0.0 && self.dead_zone < self.max_pwm) {
            return Err(invalid(&self.name, "dead_zone must be in [0, max_pwm)"));
        }
        if self.pwm_frequency_hz == 0 {
            return Err(invalid(&self.name, "pwm_frequency_hz must be positive"));
        }
        if self.ramp_steps == 0 {
            return Err(invalid(&self.name, "ramp_steps must be at least 1"));
        }
        if !(self.stop_ramp_factor > 0.0 && self.stop_ramp_factor <= 1.0) {
            return Err(invalid(&self.name, "stop_ramp_factor must be in (0, 1]"));
        }
        let pins = [self.pwm_pin, self.in1_pin, self.in2_pin];
        if pins[0] == pins[1] || pins[0] == pins[2] || pins[1] == pins[2] {
            return Err(invalid(&self.name, "pwm/in1/in2 pins must be distinct"));
        }
        Ok(())
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::left()
    }
}

/// 编码器解码模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    /// A/B 两相，A 相边沿计数，B 相电平判向
    #[default]
    Quadrature,
    /// 仅 A 相，只有幅值没有方向
    SingleChannel,
}

/// 编码器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub name: String,
    pub pin_a: Gpio,
    pub pin_b: Gpio,
    pub mode: EncoderMode,
    /// 每转边沿数
    pub pulses_per_revolution: u32,
    pub wheel_diameter_mm: f64,
    /// 两次测速之间的最小间隔
    pub min_sample_interval_ms: u64,
    /// 超过该值的 RPM 视为毛刺
    pub max_plausible_rpm: f64,
    /// RPM 平滑窗口长度
    pub smoothing_window: usize,
}

impl EncoderConfig {
    pub fn left() -> Self {
        Self {
            name: "left".to_string(),
            pin_a: 17,
            pin_b: 27,
            ..Self::base()
        }
    }

    pub fn right() -> Self {
        Self {
            name: "right".to_string(),
            pin_a: 5,
            pin_b: 6,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            name: String::new(),
            pin_a: 0,
            pin_b: 0,
            mode: EncoderMode::Quadrature,
            pulses_per_revolution: 4,
            wheel_diameter_mm: 65.0,
            min_sample_interval_ms: 50,
            max_plausible_rpm: 2000.0,
            smoothing_window: 5,
        }
    }

    pub fn min_sample_interval(&self) -> Duration {
        Duration::from_millis(self.min_sample_interval_ms)
    }

    /// 车轮周长（mm）
    pub fn wheel_circumference_mm(&self) -> f64 {
        std::f64::consts::PI * self.wheel_diameter_mm
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.pulses_per_revolution == 0 {
            return Err(invalid(&self.name, "pulses_per_revolution must be positive"));
        }
        if !(self.wheel_diameter_mm > 0.0) {
            return Err(invalid(&self.name, "wheel_diameter_mm must be positive"));
        }
        if !(self.max_plausible_rpm > 0.0) {
            return Err(invalid(&self.name, "max_plausible_rpm must be positive"));
        }
        if self.smoothing_window == 0 {
            return Err(invalid(&self.name, "smoothing_window must be at least 1"));
        }
        if self.mode == EncoderMode::Quadrature && self.pin_a == self.pin_b {
            return Err(invalid(&self.name, "quadrature mode needs distinct A/B pins"));
        }
        Ok(())
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::left()
    }
}

/// 舵机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub name: String,
    pub pin: Gpio,
    pub min_angle: f64,
    pub max_angle: f64,
    pub default_angle: f64,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    /// 速度系数（0.1 慢，5.0 快），只影响自动计算的运动时长
    pub speed_factor: f64,
    /// 平滑插值的更新频率
    pub update_rate_hz: u32,
    pub base_duration_ms: u64,
    /// 转过 180° 额外增加的时长
    pub proportional_duration_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    /// 小于该角度差的请求直接忽略
    pub dead_band_deg: f64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            pin: 24,
            min_angle: 0.0,
            max_angle: 180.0,
            default_angle: 90.0,
            min_pulse_us: 600,
            max_pulse_us: 2400,
            speed_factor: 1.0,
            update_rate_hz: 150,
            base_duration_ms: 50,
            proportional_duration_ms: 600,
            min_duration_ms: 30,
            max_duration_ms: 1500,
            dead_band_deg: 0.1,
        }
    }
}

impl ServoConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if !(self.min_angle < self.max_angle) {
            return Err(invalid(&self.name, "min_angle must be below max_angle"));
        }
        if !(self.min_angle..=self.max_angle).contains(&self.default_angle) {
            return Err(invalid(&self.name, "default_angle must lie within the angle range"));
        }
        if self.min_pulse_us >= self.max_pulse_us {
            return Err(invalid(&self.name, "min_pulse_us must be below max_pulse_us"));
        }
        if !(MIN_SPEED_FACTOR..=MAX_SPEED_FACTOR).contains(&self.speed_factor) {
            return Err(invalid(&self.name, "speed_factor must be in [0.1, 5.0]"));
        }
        if self.update_rate_hz == 0 {
            return Err(invalid(&self.name, "update_rate_hz must be positive"));
        }
        if self.min_duration_ms > self.max_duration_ms {
            return Err(invalid(&self.name, "min_duration_ms must not exceed max_duration_ms"));
        }
        Ok(())
    }
}

/// 舵机速度系数下限
pub const MIN_SPEED_FACTOR: f64 = 0.1;
/// 舵机速度系数上限
pub const MAX_SPEED_FACTOR: f64 = 5.0;

fn invalid(name: &str, reason: &str) -> DriverError {
    DriverError::InvalidConfig(format!("{}: {}", name, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wiring() {
        let left = MotorConfig::left();
        assert_eq!((left.pwm_pin, left.in1_pin, left.in2_pin), (18, 20, 21));
        let right = MotorConfig::right();
        assert_eq!((right.pwm_pin, right.in1_pin, right.in2_pin), (13, 19, 26));

        assert_eq!((EncoderConfig::left().pin_a, EncoderConfig::left().pin_b), (17, 27));
        assert_eq!((EncoderConfig::right().pin_a, EncoderConfig::right().pin_b), (5, 6));
        assert_eq!(ServoConfig::default().pin, 24);
    }

    #[test]
    fn test_defaults_validate() {
        MotorConfig::left().validate().unwrap();
        MotorConfig::right().validate().unwrap();
        EncoderConfig::left().validate().unwrap();
        EncoderConfig::right().validate().unwrap();
        ServoConfig::default().validate().unwrap();
    }

    #[test]
    fn test_motor_validate_rejects() {
        let mut config = MotorConfig::left();
        config.min_pwm = 90.0;
        assert!(matches!(config.validate(), Err(DriverError::InvalidConfig(_))));

        let mut config = MotorConfig::left();
        config.ramp_steps = 0;
        assert!(config.validate().is_err());

        let mut config = MotorConfig::left();
        config.in2_pin = config.pwm_pin;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encoder_and_servo_validate_rejects() {
        let mut encoder = EncoderConfig::right();
        encoder.pulses_per_revolution = 0;
        assert!(encoder.validate().is_err());

        let mut servo = ServoConfig::default();
        servo.default_angle = 200.0;
        assert!(servo.validate().is_err());

        let mut servo = ServoConfig::default();
        servo.speed_factor = 10.0;
        assert!(servo.validate().is_err());
    }

    #[test]
    fn test_wheel_circumference() {
        let config = EncoderConfig::left();
        assert!((config.wheel_circumference_mm() - 204.2035).abs() < 1e-3);
    }
}
