//! 整机配置
//!
//! 所有组件的配置集中在 [`CrawlerConfig`] 中，可以从 TOML 文件加载：
//!
//! ```toml
//! [backend]
//! host = "192.168.1.20"
//!
//! [right_motor]
//! max_pwm = 70.0
//!
//! [sync.pid]
//! kp = 0.4
//!
//! [control_loop]
//! frequency_hz = 50.0
//! ```
//!
//! 缺省的分节或字段取该分节自身的默认值（例如 `[right_motor]` 中省略的引脚仍是右侧接线）。

use crate::error::{CrawlerError, Result};
use crawler_control::{LoopConfig, SyncConfig};
use crawler_driver::{EncoderConfig, EncoderMode, MotorConfig, ServoConfig};
use crawler_hal::Gpio;
use crawler_hal::pigpiod::protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// pigpio 守护进程地址
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// 整机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub backend: BackendConfig,
    pub left_motor: MotorConfig,
    pub right_motor: MotorConfig,
    pub left_encoder: EncoderConfig,
    pub right_encoder: EncoderConfig,
    pub camera: ServoConfig,
    pub sync: SyncConfig,
    pub control_loop: LoopConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            left_motor: MotorConfig::left(),
            right_motor: MotorConfig::right(),
            left_encoder: EncoderConfig::left(),
            right_encoder: EncoderConfig::right(),
            camera: ServoConfig::default(),
            sync: SyncConfig::default(),
            control_loop: LoopConfig::default(),
        }
    }
}

impl CrawlerConfig {
    /// 从 TOML 文件加载并校验
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析并校验
    ///
    /// 用户给出的键覆盖在默认配置之上，逐层合并。
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let overlay: toml::Table = toml::from_str(content)?;
        let mut merged = match toml::Value::try_from(Self::default()) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(CrawlerError::Config("default config is not a table".into())),
            Err(e) => return Err(CrawlerError::Config(e.to_string())),
        };
        merge_tables(&mut merged, overlay);

        let config: Self = toml::Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CrawlerError::Config(e.to_string()))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// 校验全部分节，并检查引脚是否被重复占用
    pub fn validate(&self) -> Result<()> {
        if self.backend.host.trim().is_empty() {
            return Err(CrawlerError::Config("backend.host must not be empty".into()));
        }
        self.left_motor.validate()?;
        self.right_motor.validate()?;
        self.left_encoder.validate()?;
        self.right_encoder.validate()?;
        self.camera.validate()?;
        self.sync.validate()?;
        self.control_loop.validate()?;

        let mut owners: HashMap<Gpio, &str> = HashMap::new();
        for (pin, owner) in self.pin_assignments() {
            if let Some(previous) = owners.insert(pin, owner) {
                return Err(CrawlerError::Config(format!(
                    "GPIO {} is assigned to both {} and {}",
                    pin, previous, owner
                )));
            }
        }
        Ok(())
    }

    fn pin_assignments(&self) -> Vec<(Gpio, &'static str)> {
        let mut pins = vec![
            (self.left_motor.pwm_pin, "left_motor.pwm_pin"),
            (self.left_motor.in1_pin, "left_motor.in1_pin"),
            (self.left_motor.in2_pin, "left_motor.in2_pin"),
            (self.right_motor.pwm_pin, "right_motor.pwm_pin"),
            (self.right_motor.in1_pin, "right_motor.in1_pin"),
            (self.right_motor.in2_pin, "right_motor.in2_pin"),
            (self.left_encoder.pin_a, "left_encoder.pin_a"),
            (self.right_encoder.pin_a, "right_encoder.pin_a"),
            (self.camera.pin, "camera.pin"),
        ];
        if self.left_encoder.mode == EncoderMode::Quadrature {
            pins.push((self.left_encoder.pin_b, "left_encoder.pin_b"));
        }
        if self.right_encoder.mode == EncoderMode::Quadrature {
            pins.push((self.right_encoder.pin_b, "right_encoder.pin_b"));
        }
        pins
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            },
            (_, value) => {
                base.insert(key, value);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wiring() {
        let config = CrawlerConfig::default();
        assert_eq!(config.backend.port, 8888);
        assert_eq!(
            (config.left_motor.pwm_pin, config.left_motor.in1_pin, config.left_motor.in2_pin),
            (18, 20, 21)
        );
        assert_eq!(
            (config.right_motor.pwm_pin, config.right_motor.in1_pin, config.right_motor.in2_pin),
            (13, 19, 26)
        );
        assert_eq!((config.left_encoder.pin_a, config.left_encoder.pin_b), (17, 27));
        assert_eq!((config.right_encoder.pin_a, config.right_encoder.pin_b), (5, 6));
        assert_eq!(config.camera.pin, 24);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_keeps_section_defaults() {
        let config = CrawlerConfig::from_toml_str(
            r#"
            [right_motor]
            max_pwm = 70.0

            [sync.pid]
            kp = 0.4
            "#,
        )
        .unwrap();

        assert_eq!(config.right_motor.max_pwm, 70.0);
        assert_eq!(config.right_motor.pwm_pin, 13);
        assert_eq!(config.right_motor.name, "right");
        assert_eq!(config.sync.pid.kp, 0.4);
        assert_eq!(config.sync.pid.ki, 0.1);
        assert_eq!(config.left_motor, MotorConfig::left());
    }

    #[test]
    fn test_pin_conflict_rejected() {
        let mut config = CrawlerConfig::default();
        config.camera.pin = 18;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CrawlerError::Config(ref msg) if msg.contains("GPIO 18")));
    }

    #[test]
    fn test_single_channel_frees_phase_b() {
        let mut config = CrawlerConfig::default();
        config.left_encoder.mode = EncoderMode::SingleChannel;
        config.left_encoder.pin_b = 18;
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = CrawlerConfig::from_toml_str("[control_loop]\nfrequency_hz = 0.0\n");
        assert!(matches!(result, Err(CrawlerError::Control(_))));

        let result = CrawlerConfig::from_toml_str("[left_motor]\nmin_pwm = 95.0\n");
        assert!(matches!(result, Err(CrawlerError::Driver(_))));

        let result = CrawlerConfig::from_toml_str("[backend]\nport = \"eighty\"\n");
        assert!(matches!(result, Err(CrawlerError::Toml(_))));
    }
}
