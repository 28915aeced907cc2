//! 控制层错误类型定义

use crawler_driver::DriverError;
use thiserror::Error;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 驱动层错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 配置错误（如非法的控制频率）
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 控制线程创建失败
    #[error("Control thread error: {0}")]
    Thread(#[source] std::io::Error),
}
