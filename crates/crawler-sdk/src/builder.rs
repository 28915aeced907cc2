//! Crawler Builder
//!
//! 按固定顺序构造整机：电机、编码器、同步驱动、摄像头舵机、控制循环。
//! 任一步失败即中止并返回错误，已构造的组件随之释放。

use crate::config::CrawlerConfig;
use crate::crawler::Crawler;
use crate::error::Result;
use crawler_control::{ControlLoop, DrivetrainSynchronizer};
use crawler_driver::{Encoder, MotorDriver, SmoothAngleActuator};
use crawler_hal::{PigpiodBackend, SharedBackend, SharedClock, SystemClock};
use std::sync::Arc;
use tracing::info;

/// Crawler Builder
///
/// # 示例
///
/// ```rust,no_run
/// use crawler_sdk::prelude::*;
///
/// # fn main() -> Result<(), CrawlerError> {
/// let config = CrawlerConfig::load_from_file("crawler.toml")?;
/// let crawler = CrawlerBuilder::new(config).connect()?;
///
/// crawler.drivetrain().forward(50.0);
/// crawler.set_camera_angle(120.0, true)?;
/// println!("{}", crawler.status().to_json().unwrap_or_default());
/// crawler.cleanup();
/// # Ok(())
/// # }
/// ```
pub struct CrawlerBuilder {
    config: CrawlerConfig,
    clock: Option<SharedClock>,
    control_loop: bool,
}

impl CrawlerBuilder {
    pub fn new(config: CrawlerConfig) -> Self {
        Self {
            config,
            clock: None,
            control_loop: true,
        }
    }

    /// 注入时钟（默认 [`SystemClock`]）
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 不启动控制线程，由调用方自行驱动 `drivetrain().tick(now)`
    pub fn without_control_loop(mut self) -> Self {
        self.control_loop = false;
        self
    }

    /// 连接配置中的 pigpio 守护进程并构造整机
    ///
    /// # 错误
    ///
    /// 守护进程不可达时返回 `Hal(Unavailable)`，不会进入降级模式。
    pub fn connect(self) -> Result<Crawler> {
        self.config.validate()?;
        let addr = (self.config.backend.host.as_str(), self.config.backend.port);
        let backend: SharedBackend = Arc::new(PigpiodBackend::connect(addr)?);
        self.build_with_backend(backend)
    }

    /// 使用给定的硬件后端构造整机
    pub fn build_with_backend(self, backend: SharedBackend) -> Result<Crawler> {
        let config = self.config;
        config.validate()?;
        let clock = self.clock.unwrap_or_else(SystemClock::shared);

        let left_motor = Arc::new(MotorDriver::new(
            backend.clone(),
            config.left_motor,
            clock.clone(),
        )?);
        let right_motor = Arc::new(MotorDriver::new(
            backend.clone(),
            config.right_motor,
            clock.clone(),
        )?);
        let left_encoder = Arc::new(Encoder::new(
            backend.clone(),
            config.left_encoder,
            clock.clone(),
        )?);
        let right_encoder = Arc::new(Encoder::new(
            backend.clone(),
            config.right_encoder,
            clock.clone(),
        )?);

        let drivetrain = Arc::new(DrivetrainSynchronizer::new(
            left_motor,
            right_motor,
            left_encoder,
            right_encoder,
            config.sync,
        )?);
        let camera = Arc::new(SmoothAngleActuator::new(
            backend.clone(),
            config.camera,
            clock.clone(),
        )?);

        let control = if self.control_loop {
            Some(ControlLoop::spawn(
                drivetrain.clone(),
                clock,
                config.control_loop,
            )?)
        } else {
            None
        };

        info!("Crawler ready");
        Ok(Crawler::new(backend, drivetrain, camera, control))
    }
}
