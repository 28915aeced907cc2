//! 控制层配置

use crate::ControlError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PID 参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// 积分项绝对值上限，缺省为不限制
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integral_limit: Option<f64>,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.3,
            ki: 0.1,
            kd: 0.05,
            output_min: -20.0,
            output_max: 20.0,
            integral_limit: None,
        }
    }
}

impl PidConfig {
    pub fn validate(&self) -> Result<(), ControlError> {
        let gains = [self.kp, self.ki, self.kd];
        if gains.iter().any(|g| !g.is_finite()) {
            return Err(ControlError::InvalidConfig("PID gains must be finite".into()));
        }
        if !(self.output_min < self.output_max) {
            return Err(ControlError::InvalidConfig(format!(
                "PID output limits [{}, {}] are empty",
                self.output_min, self.output_max
            )));
        }
        if let Some(limit) = self.integral_limit
            && !(limit > 0.0)
        {
            return Err(ControlError::InvalidConfig(format!(
                "Invalid integral_limit: {} (must be > 0)",
                limit
            )));
        }
        Ok(())
    }
}

/// 双轮同步配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 启动时是否开启同步
    pub enabled: bool,
    pub pid: PidConfig,
    /// 两轮 |目标速度| 都超过该值（%）时才做校正
    pub engage_threshold: f64,
    /// 100% 速度对应的 RPM（线性标定）
    pub full_scale_rpm: f64,
    pub correction_interval_ms: u64,
    /// 转弯时内侧轮速度比例
    pub turn_ratio: f64,
    /// 原地旋转时两轮速度比例
    pub spin_ratio: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pid: PidConfig::default(),
            engage_threshold: 5.0,
            full_scale_rpm: 150.0,
            correction_interval_ms: 200,
            turn_ratio: 0.3,
            spin_ratio: 0.7,
        }
    }
}

impl SyncConfig {
    pub fn correction_interval(&self) -> Duration {
        Duration::from_millis(self.correction_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        self.pid.validate()?;
        if !(0.0..100.0).contains(&self.engage_threshold) {
            return Err(ControlError::InvalidConfig(format!(
                "Invalid engage_threshold: {} (must be in [0, 100))",
                self.engage_threshold
            )));
        }
        if !(self.full_scale_rpm > 0.0) {
            return Err(ControlError::InvalidConfig(format!(
                "Invalid full_scale_rpm: {} (must be > 0)",
                self.full_scale_rpm
            )));
        }
        if self.correction_interval_ms == 0 {
            return Err(ControlError::InvalidConfig(
                "correction_interval_ms must be > 0".into(),
            ));
        }
        for (name, ratio) in [("turn_ratio", self.turn_ratio), ("spin_ratio", self.spin_ratio)] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ControlError::InvalidConfig(format!(
                    "Invalid {}: {} (must be in [0, 1])",
                    name, ratio
                )));
            }
        }
        Ok(())
    }
}

/// 控制循环配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// 控制频率（Hz）
    ///
    /// 例如：100.0 表示 100Hz（10ms 周期）
    pub frequency_hz: f64,

    /// 周期超时时是否记录警告
    pub overrun_warn: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 100.0,
            overrun_warn: true,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.frequency_hz > 0.0 && self.frequency_hz.is_finite()) {
            return Err(ControlError::InvalidConfig(format!(
                "Invalid frequency_hz: {} (must be > 0)",
                self.frequency_hz
            )));
        }
        if self.frequency_hz > 1000.0 {
            tracing::warn!(
                "Very high control frequency: {} Hz. Hardware writes may not keep up.",
                self.frequency_hz
            );
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_defaults() {
        let config = SyncConfig::default();
        assert!(config.enabled);
        assert_eq!(config.pid.kp, 0.3);
        assert_eq!(config.pid.ki, 0.1);
        assert_eq!(config.pid.kd, 0.05);
        assert_eq!((config.pid.output_min, config.pid.output_max), (-20.0, 20.0));
        assert_eq!(config.correction_interval(), Duration::from_millis(200));
        config.validate().unwrap();
    }

    #[test]
    fn test_loop_config_validation() {
        assert!(LoopConfig::default().validate().is_ok());
        assert_eq!(LoopConfig::default().period(), Duration::from_millis(10));

        let config = LoopConfig {
            frequency_hz: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ControlError::InvalidConfig(_))));

        let config = LoopConfig {
            frequency_hz: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sync_config_rejects() {
        let mut config = SyncConfig::default();
        config.spin_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.pid.output_min = 30.0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.pid.integral_limit = Some(-1.0);
        assert!(config.validate().is_err());
    }
}
