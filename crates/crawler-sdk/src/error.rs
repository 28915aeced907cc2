//! SDK 顶层错误类型

use crawler_control::ControlError;
use crawler_driver::DriverError;
use crawler_hal::HalError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    /// 配置校验失败（如引脚冲突）
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),
}

impl CrawlerError {
    /// 是否由硬件后端不可用引起（启动阶段的致命错误）
    pub fn is_hardware_unavailable(&self) -> bool {
        let hal = match self {
            CrawlerError::Hal(e) => e,
            CrawlerError::Driver(DriverError::Hal(e)) => e,
            CrawlerError::Control(ControlError::Driver(DriverError::Hal(e))) => e,
            _ => return false,
        };
        hal.is_fatal()
    }
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
