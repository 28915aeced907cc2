//! 整机句柄

use crate::error::Result;
use crawler_control::{
    ControlLoop, DrivetrainStatus, DrivetrainSynchronizer, LoopMetricsSnapshot,
};
use crawler_driver::SmoothAngleActuator;
use crawler_hal::SharedBackend;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// 整机状态快照（可序列化为遥测 JSON）
#[derive(Debug, Clone, Serialize)]
pub struct CrawlerStatus {
    pub drivetrain: DrivetrainStatus,
    pub camera_angle: f64,
    pub camera_target: f64,
    pub camera_moving: bool,
    /// 控制循环未运行时为 `None`
    pub loop_metrics: Option<LoopMetricsSnapshot>,
}

impl CrawlerStatus {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// 履带底盘
///
/// 由 [`CrawlerBuilder`](crate::CrawlerBuilder) 创建。持有硬件后端、同步驱动、
/// 摄像头舵机和控制循环；丢弃时自动停车并释放硬件。
pub struct Crawler {
    // 保证后端在各组件释放之后才关闭
    _backend: SharedBackend,
    drivetrain: Arc<DrivetrainSynchronizer>,
    camera: Arc<SmoothAngleActuator>,
    control: Mutex<Option<ControlLoop>>,
    released: AtomicBool,
}

impl Crawler {
    pub(crate) fn new(
        backend: SharedBackend,
        drivetrain: Arc<DrivetrainSynchronizer>,
        camera: Arc<SmoothAngleActuator>,
        control: Option<ControlLoop>,
    ) -> Self {
        Self {
            _backend: backend,
            drivetrain,
            camera,
            control: Mutex::new(control),
            released: AtomicBool::new(false),
        }
    }

    pub fn drivetrain(&self) -> &Arc<DrivetrainSynchronizer> {
        &self.drivetrain
    }

    pub fn camera(&self) -> &Arc<SmoothAngleActuator> {
        &self.camera
    }

    /// 设置左右轮目标速度（%）
    pub fn move_wheels(&self, left: f64, right: f64, immediate: bool) {
        self.drivetrain.move_wheels(left, right, immediate);
    }

    /// 转动摄像头（平滑运动会阻塞调用线程直到完成）
    ///
    /// # 错误
    ///
    /// 已有平滑运动进行中时返回 `Driver(ActuatorBusy)`。
    pub fn set_camera_angle(&self, angle: f64, smooth: bool) -> Result<()> {
        self.camera.set_angle(angle, smooth, None)?;
        Ok(())
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        self.drivetrain.set_sync_enabled(enabled);
    }

    pub fn stop(&self) {
        self.drivetrain.stop();
    }

    pub fn brake(&self) {
        self.drivetrain.brake();
    }

    pub fn loop_metrics(&self) -> Option<LoopMetricsSnapshot> {
        self.control
            .lock()
            .as_ref()
            .map(|control| control.metrics().snapshot())
    }

    pub fn status(&self) -> CrawlerStatus {
        CrawlerStatus {
            drivetrain: self.drivetrain.status(),
            camera_angle: self.camera.angle(),
            camera_target: self.camera.target_angle(),
            camera_moving: self.camera.is_moving(),
            loop_metrics: self.loop_metrics(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// 停止控制循环，立即停车并释放全部硬件（幂等）
    pub fn cleanup(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(control) = self.control.lock().take() {
            control.stop();
        }
        self.drivetrain.cleanup();
        self.camera.cleanup();
        info!("Crawler released");
    }
}

impl Drop for Crawler {
    fn drop(&mut self) {
        self.cleanup();
    }
}
