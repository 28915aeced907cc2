//! Crawler SDK - 履带底盘 Rust SDK
//!
//! 闭环差速驱动：编码器测速、PID 双轮同步、电机斜坡、摄像头舵机平滑转动。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **硬件层** (`hal`): GPIO/PWM 能力抽象，pigpiod 后端与 mock 后端
//! - **驱动层** (`driver`): 编码器、电机、舵机
//! - **控制层** (`control`): PID、双轮同步、控制循环
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use crawler_sdk::prelude::*;
//!
//! # fn main() -> Result<(), CrawlerError> {
//! crawler_sdk::init_logging();
//! let crawler = CrawlerBuilder::new(CrawlerConfig::default()).connect()?;
//! crawler.drivetrain().spin_left(50.0);
//! crawler.stop();
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod config;
mod crawler;
mod error;
mod logging;
pub mod prelude;

pub use crawler_control as control;
pub use crawler_driver as driver;
pub use crawler_hal as hal;

pub use builder::CrawlerBuilder;
pub use config::{BackendConfig, CrawlerConfig};
pub use crawler::{Crawler, CrawlerStatus};
pub use error::{CrawlerError, Result};
pub use logging::{init_logging, init_logging_with};
