//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use crawler_sdk::prelude::*;
//! ```

pub use crate::{BackendConfig, Crawler, CrawlerBuilder, CrawlerConfig, CrawlerError, CrawlerStatus};

// 控制层
pub use crawler_control::{
    DrivetrainState, DrivetrainStatus, DrivetrainSynchronizer, LoopConfig, PidConfig,
    PidController, SyncConfig,
};

// 驱动层
pub use crawler_driver::{
    Direction, DriverError, Encoder, EncoderConfig, EncoderMode, MotorConfig, MotorDriver,
    ServoConfig, SmoothAngleActuator,
};

// 硬件层
pub use crawler_hal::{Clock, HalError, HardwareBackend, SharedBackend, SharedClock, SystemClock};
