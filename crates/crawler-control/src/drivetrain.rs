//! 双轮同步驱动
//!
//! 组合左右两个 [`MotorDriver`] 和两个 [`Encoder`]，按编码器反馈对两侧速度做 PID 校正，
//! 抵消机械/电气不对称。
//!
//! # 状态机
//!
//! ```text
//! Idle ──(任一目标非零)──▶ Driving ──(两目标归零 / brake)──▶ Idle
//! ```
//!
//! 进入 Driving 时两侧 PID 复位；某一侧目标方向与其当前输出相反时，复位该侧 PID。
//!
//! # 校正
//!
//! 每个校正周期（默认 200ms）在同一把锁内对两个编码器采样，保证与标定复位互斥：
//!
//! 1. 两侧 |目标| 都必须大于接合阈值（默认 5%）
//! 2. 公共参考 RPM = 较大 |目标| / 100 * full_scale_rpm，再按 |本侧目标| / 较大 |目标|
//!    缩放得到每侧参考值（直行时两侧相同，转弯时保持转向比例）
//! 3. 每侧 PID 输入 `actual - reference`，偏置 = sign(目标) * 输出
//! 4. 新速度 = 目标 + 偏置，限制到 ±max_pwm 且不改变方向，经电机的立即路径下发
//!
//! 仍在斜坡中的一侧跳过本次校正。

use crate::ControlError;
use crate::config::SyncConfig;
use crate::pid::PidController;
use arc_swap::ArcSwapOption;
use crawler_driver::{Direction, Encoder, MotorDriver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// 速度指令范围（%）
pub const MAX_COMMAND: f64 = 100.0;

const LEFT: usize = 0;
const RIGHT: usize = 1;

/// 驱动状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrivetrainState {
    /// 两侧目标均为 0
    #[default]
    Idle,
    /// 任一侧目标非零
    Driving,
}

/// 单侧校正结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelCorrection {
    pub rpm: f64,
    pub reference_rpm: f64,
    /// 本次施加的偏置；斜坡中跳过时为 `None`
    pub bias: Option<f64>,
    pub applied_speed: Option<f64>,
}

/// 一次校正的完整记录
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionReport {
    #[serde(skip)]
    pub at: Instant,
    pub left: WheelCorrection,
    pub right: WheelCorrection,
}

impl CorrectionReport {
    /// 是否至少有一侧实际下发了校正
    pub fn applied(&self) -> bool {
        self.left.bias.is_some() || self.right.bias.is_some()
    }

    /// 两侧 RPM 差（左 - 右）
    pub fn rpm_difference(&self) -> f64 {
        self.left.rpm - self.right.rpm
    }
}

/// 单侧状态快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelStatus {
    /// 电机当前输出速度（%）
    pub speed: f64,
    /// 驱动层目标速度（%）
    pub target: f64,
    pub rpm: f64,
    pub count: u64,
    pub total_count: u64,
    pub position: i64,
    pub direction: Direction,
}

/// 驱动状态快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrivetrainStatus {
    pub left: WheelStatus,
    pub right: WheelStatus,
    pub state: DrivetrainState,
    pub sync_enabled: bool,
}

struct Inner {
    state: DrivetrainState,
    targets: [f64; 2],
    pids: [PidController; 2],
    sync_enabled: bool,
    /// 当前指令绕过校正（立即指令或同步关闭时下发）
    bypass: bool,
    last_correction_at: Option<Instant>,
}

/// 双轮同步驱动
pub struct DrivetrainSynchronizer {
    motors: [Arc<MotorDriver>; 2],
    encoders: [Arc<Encoder>; 2],
    config: SyncConfig,
    inner: Mutex<Inner>,
    last_correction: ArcSwapOption<CorrectionReport>,
}

fn clamp_command(speed: f64) -> f64 {
    if speed.is_nan() {
        return 0.0;
    }
    speed.clamp(-MAX_COMMAND, MAX_COMMAND)
}

impl DrivetrainSynchronizer {
    pub fn new(
        left_motor: Arc<MotorDriver>,
        right_motor: Arc<MotorDriver>,
        left_encoder: Arc<Encoder>,
        right_encoder: Arc<Encoder>,
        config: SyncConfig,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let pid = PidController::from_config(&config.pid);
        info!(
            "Drivetrain ready (sync {}, Kp={} Ki={} Kd={})",
            if config.enabled { "on" } else { "off" },
            config.pid.kp,
            config.pid.ki,
            config.pid.kd
        );
        Ok(Self {
            motors: [left_motor, right_motor],
            encoders: [left_encoder, right_encoder],
            inner: Mutex::new(Inner {
                state: DrivetrainState::Idle,
                targets: [0.0; 2],
                pids: [pid.clone(), pid],
                sync_enabled: config.enabled,
                bypass: !config.enabled,
                last_correction_at: None,
            }),
            config,
            last_correction: ArcSwapOption::empty(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn left_motor(&self) -> &Arc<MotorDriver> {
        &self.motors[LEFT]
    }

    pub fn right_motor(&self) -> &Arc<MotorDriver> {
        &self.motors[RIGHT]
    }

    pub fn left_encoder(&self) -> &Arc<Encoder> {
        &self.encoders[LEFT]
    }

    pub fn right_encoder(&self) -> &Arc<Encoder> {
        &self.encoders[RIGHT]
    }

    /// 设置两侧目标速度（%，限制到 ±100）
    ///
    /// 目标总是经电机的 `set_speed(target, immediate)` 下发；
    /// `immediate` 或同步关闭时，本条指令不参与周期校正。
    pub fn move_wheels(&self, left: f64, right: f64, immediate: bool) {
        let targets = [clamp_command(left), clamp_command(right)];
        let driving = targets.iter().any(|t| *t != 0.0);

        let mut inner = self.inner.lock();
        match (inner.state, driving) {
            (DrivetrainState::Idle, true) => {
                inner.pids.iter_mut().for_each(PidController::reset);
                inner.state = DrivetrainState::Driving;
                debug!("Drivetrain: Idle -> Driving");
            },
            (DrivetrainState::Driving, false) => {
                inner.state = DrivetrainState::Idle;
                debug!("Drivetrain: Driving -> Idle");
            },
            _ => {},
        }

        for (side, target) in targets.iter().enumerate() {
            if target * self.motors[side].speed() < 0.0 {
                inner.pids[side].reset();
                debug!("Drivetrain: {} wheel reversed, PID reset", self.motors[side].name());
            }
        }

        inner.targets = targets;
        inner.bypass = immediate || !inner.sync_enabled;
        for (motor, target) in self.motors.iter().zip(targets) {
            motor.set_speed(target, immediate);
        }
    }

    /// 周期校正
    ///
    /// 无论是否满足校正条件都会对两个编码器测速（状态快照因此保持新鲜）。
    /// 返回本次发布的校正记录；未满足校正条件时返回 `None`。
    pub fn correct(&self, now: Instant) -> Option<Arc<CorrectionReport>> {
        let mut inner = self.inner.lock();
        inner.last_correction_at = Some(now);

        let rpms = [
            self.encoders[LEFT].sample_velocity(now),
            self.encoders[RIGHT].sample_velocity(now),
        ];

        if !inner.sync_enabled || inner.bypass || inner.state != DrivetrainState::Driving {
            return None;
        }
        let targets = inner.targets;
        if targets.iter().any(|t| t.abs() <= self.config.engage_threshold) {
            return None;
        }

        let larger = targets[LEFT].abs().max(targets[RIGHT].abs());
        let common_rpm = larger / MAX_COMMAND * self.config.full_scale_rpm;

        let mut wheels = [WheelCorrection::default(); 2];
        for side in [LEFT, RIGHT] {
            let target = targets[side];
            let reference = common_rpm * target.abs() / larger;
            wheels[side].rpm = rpms[side];
            wheels[side].reference_rpm = reference;

            let motor = &self.motors[side];
            if motor.is_ramping() {
                continue;
            }

            let output = inner.pids[side].update(rpms[side] - reference, now);
            let bias = target.signum() * output;
            let max = motor.config().max_pwm;
            let mut speed = (target + bias).clamp(-max, max);
            if speed * target < 0.0 {
                speed = 0.0;
            }
            motor.set_speed(speed, true);

            wheels[side].bias = Some(bias);
            wheels[side].applied_speed = Some(speed);
        }

        let report = Arc::new(CorrectionReport {
            at: now,
            left: wheels[LEFT],
            right: wheels[RIGHT],
        });
        debug!(
            "Sync correction: L {:.1}/{:.1} RPM bias {:?}, R {:.1}/{:.1} RPM bias {:?}",
            report.left.rpm,
            report.left.reference_rpm,
            report.left.bias,
            report.right.rpm,
            report.right.reference_rpm,
            report.right.bias
        );
        self.last_correction.store(Some(report.clone()));
        Some(report)
    }

    /// 控制周期入口：推进两侧斜坡，校正周期到达时执行校正
    ///
    /// 返回本周期是否实际下发了校正。
    pub fn tick(&self, now: Instant) -> bool {
        for motor in &self.motors {
            motor.advance(now);
        }

        let due = self.inner.lock().last_correction_at.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.correction_interval()
        });
        due && self.correct(now).is_some_and(|report| report.applied())
    }

    pub fn forward(&self, speed: f64) {
        self.move_wheels(speed, speed, false);
    }

    pub fn backward(&self, speed: f64) {
        self.move_wheels(-speed, -speed, false);
    }

    /// 左转：左轮按 turn_ratio 减速
    pub fn turn_left(&self, speed: f64) {
        self.move_wheels(speed * self.config.turn_ratio, speed, false);
    }

    pub fn turn_right(&self, speed: f64) {
        self.move_wheels(speed, speed * self.config.turn_ratio, false);
    }

    /// 原地左转：两轮等速反向，速度乘以 spin_ratio
    pub fn spin_left(&self, speed: f64) {
        let s = speed * self.config.spin_ratio;
        self.move_wheels(-s, s, false);
    }

    pub fn spin_right(&self, speed: f64) {
        let s = speed * self.config.spin_ratio;
        self.move_wheels(s, -s, false);
    }

    /// 摇杆混控：左 = 油门 + 转向，右 = 油门 - 转向
    pub fn arcade(&self, throttle: f64, steer: f64) {
        self.move_wheels(throttle + steer, throttle - steer, false);
    }

    /// 斜坡停车
    pub fn stop(&self) {
        self.move_wheels(0.0, 0.0, false);
    }

    pub fn stop_immediate(&self) {
        self.move_wheels(0.0, 0.0, true);
    }

    /// 两侧制动并回到 Idle
    pub fn brake(&self) {
        let mut inner = self.inner.lock();
        inner.targets = [0.0; 2];
        inner.pids.iter_mut().for_each(PidController::reset);
        inner.state = DrivetrainState::Idle;
        for motor in &self.motors {
            motor.brake();
        }
    }

    /// 开关同步
    ///
    /// 关闭时撤销已施加的偏置：未在斜坡中的一侧立即恢复到原始目标。
    pub fn set_sync_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        if inner.sync_enabled == enabled {
            return;
        }
        inner.sync_enabled = enabled;
        inner.bypass = !enabled;
        inner.pids.iter_mut().for_each(PidController::reset);

        if !enabled && inner.state == DrivetrainState::Driving {
            for (motor, target) in self.motors.iter().zip(inner.targets) {
                if !motor.is_ramping() {
                    motor.set_speed(target, true);
                }
            }
        }
        info!("Wheel synchronization {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.inner.lock().sync_enabled
    }

    pub fn state(&self) -> DrivetrainState {
        self.inner.lock().state
    }

    /// `(left, right)`
    pub fn targets(&self) -> (f64, f64) {
        let targets = self.inner.lock().targets;
        (targets[LEFT], targets[RIGHT])
    }

    /// 清零两侧滚动计数（与校正互斥）
    pub fn reset_encoders(&self) {
        let _inner = self.inner.lock();
        for encoder in &self.encoders {
            encoder.reset();
        }
    }

    /// 清零两侧全部计数（与校正互斥）
    pub fn calibrate_encoders(&self) {
        let _inner = self.inner.lock();
        for encoder in &self.encoders {
            encoder.reset_total();
        }
        info!("Encoders calibrated");
    }

    /// 状态快照（无副作用，RPM 取最近一次测速结果）
    pub fn status(&self) -> DrivetrainStatus {
        let (state, sync_enabled) = {
            let inner = self.inner.lock();
            (inner.state, inner.sync_enabled)
        };
        DrivetrainStatus {
            left: self.wheel_status(LEFT),
            right: self.wheel_status(RIGHT),
            state,
            sync_enabled,
        }
    }

    fn wheel_status(&self, side: usize) -> WheelStatus {
        let motor = &self.motors[side];
        let encoder = &self.encoders[side];
        WheelStatus {
            speed: motor.speed(),
            target: motor.target_speed(),
            rpm: encoder.cached_rpm(),
            count: encoder.count(),
            total_count: encoder.total_count(),
            position: encoder.position(),
            direction: encoder.direction(),
        }
    }

    /// 最近一次校正记录（无锁读取）
    pub fn last_correction(&self) -> Option<Arc<CorrectionReport>> {
        self.last_correction.load_full()
    }

    /// 立即停车并释放电机与编码器
    pub fn cleanup(&self) {
        {
            let mut inner = self.inner.lock();
            inner.targets = [0.0; 2];
            inner.state = DrivetrainState::Idle;
        }
        for motor in &self.motors {
            motor.stop_immediate();
            motor.cleanup();
        }
        for encoder in &self.encoders {
            encoder.cleanup();
        }
        info!("Drivetrain released");
    }
}
