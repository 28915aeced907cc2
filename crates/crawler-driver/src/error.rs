//! 驱动层错误类型定义

use crawler_hal::HalError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 硬件层错误
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    /// 配置不合法（构造阶段校验）
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 执行器正在平滑运动中，新的平滑运动请求被拒绝
    #[error("Actuator is busy with a smooth move")]
    ActuatorBusy,
}
