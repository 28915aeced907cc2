//! # Crawler Control
//!
//! 双轮闭环控制层：
//!
//! - [`PidController`]：带输出/积分限幅的 PID
//! - [`DrivetrainSynchronizer`]：按编码器反馈校正左右轮速度
//! - [`ControlLoop`]：固定频率的控制线程（推进斜坡 + 周期校正）
//!
//! # 示例
//!
//! ```rust,no_run
//! use crawler_control::{ControlLoop, DrivetrainSynchronizer, LoopConfig, SyncConfig};
//! use crawler_driver::{Encoder, EncoderConfig, MotorConfig, MotorDriver};
//! use crawler_hal::{PigpiodBackend, SharedBackend, SystemClock};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend: SharedBackend = Arc::new(PigpiodBackend::connect(("127.0.0.1", 8888))?);
//! let clock = SystemClock::shared();
//!
//! let drivetrain = Arc::new(DrivetrainSynchronizer::new(
//!     Arc::new(MotorDriver::new(backend.clone(), MotorConfig::left(), clock.clone())?),
//!     Arc::new(MotorDriver::new(backend.clone(), MotorConfig::right(), clock.clone())?),
//!     Arc::new(Encoder::new(backend.clone(), EncoderConfig::left(), clock.clone())?),
//!     Arc::new(Encoder::new(backend, EncoderConfig::right(), clock.clone())?),
//!     SyncConfig::default(),
//! )?);
//! let control = ControlLoop::spawn(drivetrain.clone(), clock, LoopConfig::default())?;
//!
//! drivetrain.forward(50.0);
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! drivetrain.stop();
//! control.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod drivetrain;
mod error;
pub mod loop_runner;
pub mod metrics;
pub mod pid;

pub use config::{LoopConfig, PidConfig, SyncConfig};
pub use drivetrain::{
    CorrectionReport, DrivetrainState, DrivetrainStatus, DrivetrainSynchronizer, WheelCorrection,
    WheelStatus,
};
pub use error::ControlError;
pub use loop_runner::ControlLoop;
pub use metrics::{LoopMetrics, LoopMetricsSnapshot};
pub use pid::PidController;
