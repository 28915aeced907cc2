//! # Crawler Hardware Abstraction Layer
//!
//! GPIO/PWM 硬件抽象层，为上层组件提供统一的硬件访问能力对象。
//!
//! # 设计
//!
//! - **显式所有权**: 不存在全局硬件句柄，[`HardwareBackend`] 在启动时构造一次，
//!   以 [`SharedBackend`] 的形式传入每个组件的构造函数
//! - **可替换**: 真实硬件使用 [`PigpiodBackend`]（pigpio 守护进程），
//!   测试使用 `mock` feature 提供的 `MockBackend`
//! - **时间注入**: 所有依赖时间的逻辑通过 [`Clock`] 获取时间和休眠
//!
//! # 示例
//!
//! ```rust,no_run
//! use crawler_hal::{HardwareBackend, Level, PigpiodBackend, PinMode};
//!
//! # fn main() -> Result<(), crawler_hal::HalError> {
//! let backend = PigpiodBackend::connect("127.0.0.1:8888")?;
//! backend.set_mode(20, PinMode::Output)?;
//! backend.write(20, Level::High)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use thiserror::Error;

mod callbacks;
pub mod clock;
pub mod join;
pub mod pigpiod;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use callbacks::CallbackRegistry;
pub use clock::{Clock, SharedClock, SystemClock};
pub use join::JoinTimeout;
pub use pigpiod::PigpiodBackend;

#[cfg(any(test, feature = "mock"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockBackend, MockWrite};

/// Broadcom GPIO 编号
pub type Gpio = u32;

/// 硬件层统一错误类型
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 无法连接或初始化硬件后端（启动阶段的致命错误）
    #[error("Hardware backend unavailable: {0}")]
    Unavailable(String),
    /// 后端命令返回错误码
    #[error("Backend command {command} failed with code {code}")]
    Backend { command: &'static str, code: i32 },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Unknown callback: {0:?}")]
    UnknownCallback(CallbackId),
}

impl HalError {
    /// 是否为致命错误（后端整体不可用）
    pub fn is_fatal(&self) -> bool {
        matches!(self, HalError::Unavailable(_) | HalError::Io(_))
    }
}

/// 数字电平
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

/// 引脚模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// 上下拉电阻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

/// 边沿触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Either,
}

impl Edge {
    /// 电平跳变到 `level` 时是否应触发该边沿类型的回调
    pub fn matches(self, level: Level) -> bool {
        match self {
            Edge::Rising => level == Level::High,
            Edge::Falling => level == Level::Low,
            Edge::Either => true,
        }
    }
}

/// 已注册边沿回调的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// 边沿回调
///
/// 参数依次为 GPIO、跳变后的电平、后端时间戳（微秒，32 位回绕）。
///
/// # 性能要求
///
/// 回调运行在后端的通知上下文中（中断语义），实现必须只做计数等极少量工作：
/// 禁止加锁、分配、I/O。
pub type EdgeCallback = Arc<dyn Fn(Gpio, Level, u32) + Send + Sync>;

/// 硬件访问能力对象
///
/// 所有方法都以 `&self` 调用，实现需自行保证内部同步，
/// 因此同一个后端可以被多个电机、编码器、舵机共享。
pub trait HardwareBackend: Send + Sync {
    fn set_mode(&self, gpio: Gpio, mode: PinMode) -> Result<(), HalError>;

    fn set_pull(&self, gpio: Gpio, pull: Pull) -> Result<(), HalError>;

    fn write(&self, gpio: Gpio, level: Level) -> Result<(), HalError>;

    fn read(&self, gpio: Gpio) -> Result<Level, HalError>;

    /// 设置 PWM 频率，返回后端实际采用的频率（Hz）
    fn set_pwm_frequency(&self, gpio: Gpio, hz: u32) -> Result<u32, HalError>;

    /// 设置 PWM 占空比量程（占空比取值范围为 `0..=range`）
    fn set_pwm_range(&self, gpio: Gpio, range: u32) -> Result<(), HalError>;

    fn set_pwm_duty(&self, gpio: Gpio, duty: u32) -> Result<(), HalError>;

    /// 设置舵机脉宽（微秒），0 表示关闭舵机输出
    fn set_servo_pulse_width(&self, gpio: Gpio, micros: u32) -> Result<(), HalError>;

    fn register_edge_callback(
        &self,
        gpio: Gpio,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<CallbackId, HalError>;

    fn cancel_callback(&self, id: CallbackId) -> Result<(), HalError>;
}

/// 共享硬件后端
pub type SharedBackend = Arc<dyn HardwareBackend>;
