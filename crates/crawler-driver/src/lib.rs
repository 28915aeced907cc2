//! # Crawler Driver
//!
//! 履带底盘的执行器与传感器驱动：
//!
//! - [`Encoder`]：轮速编码器（原子边沿计数 + 周期测速，正交判向）
//! - [`MotorDriver`]：H 桥直流电机（死区、最小占空比、时钟推进的加减速斜坡）
//! - [`SmoothAngleActuator`]：舵机平滑转动（smoothstep 插值，忙碌拒绝）
//!
//! 所有组件都通过构造参数接收硬件后端和时钟，不存在全局硬件句柄。
//!
//! # 示例
//!
//! ```rust,no_run
//! use crawler_driver::{MotorConfig, MotorDriver};
//! use crawler_hal::{PigpiodBackend, SystemClock};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), crawler_driver::DriverError> {
//! let backend = Arc::new(PigpiodBackend::connect(("127.0.0.1", 8888))?);
//! let motor = MotorDriver::new(backend, MotorConfig::left(), SystemClock::shared())?;
//! motor.set_speed(40.0, true);
//! motor.stop_immediate();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod easing;
pub mod encoder;
mod error;
pub mod motor;
pub mod servo;

pub use config::{EncoderConfig, EncoderMode, MotorConfig, PWM_RANGE, ServoConfig};
pub use encoder::{Direction, Encoder};
pub use error::DriverError;
pub use motor::{MotorDirection, MotorDriver};
pub use servo::{MovePlan, SmoothAngleActuator};
