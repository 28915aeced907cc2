//! Mock 硬件后端
//!
//! 用于测试的模拟 GPIO/PWM 后端：记录每个引脚的输出状态和完整写入日志，
//! 并允许测试主动触发边沿事件、注入写入失败。

use crate::{
    CallbackId, CallbackRegistry, Edge, EdgeCallback, Gpio, HalError, HardwareBackend, Level,
    PinMode, Pull,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// 模拟后端 PWM 频率上限（与 pigpio 默认采样率下的最高档一致）
const MAX_PWM_FREQUENCY_HZ: u32 = 8000;

/// 一次成功的输出写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWrite {
    Mode { gpio: Gpio, mode: PinMode },
    Pull { gpio: Gpio, pull: Pull },
    Level { gpio: Gpio, level: Level },
    PwmFrequency { gpio: Gpio, hz: u32 },
    PwmRange { gpio: Gpio, range: u32 },
    PwmDuty { gpio: Gpio, duty: u32 },
    ServoPulse { gpio: Gpio, micros: u32 },
}

/// 单个引脚的模拟状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPin {
    pub mode: Option<PinMode>,
    pub pull: Option<Pull>,
    pub level: Level,
    pub pwm_frequency: Option<u32>,
    pub pwm_range: Option<u32>,
    pub pwm_duty: u32,
    pub servo_pulse: u32,
}

impl Default for MockPin {
    fn default() -> Self {
        Self {
            mode: None,
            pull: None,
            level: Level::Low,
            pwm_frequency: None,
            pwm_range: None,
            pwm_duty: 0,
            servo_pulse: 0,
        }
    }
}

/// 模拟硬件后端
#[derive(Default)]
pub struct MockBackend {
    pins: Mutex<HashMap<Gpio, MockPin>>,
    log: Mutex<Vec<MockWrite>>,
    callbacks: CallbackRegistry,
    fail_writes: AtomicBool,
    unavailable: AtomicBool,
    tick: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 注入输出写入失败（电平、占空比、舵机脉宽）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// 模拟后端整体不可用（所有调用失败）
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn pin(&self, gpio: Gpio) -> MockPin {
        self.pins.lock().get(&gpio).cloned().unwrap_or_default()
    }

    pub fn level(&self, gpio: Gpio) -> Level {
        self.pin(gpio).level
    }

    pub fn pwm_duty(&self, gpio: Gpio) -> u32 {
        self.pin(gpio).pwm_duty
    }

    pub fn servo_pulse(&self, gpio: Gpio) -> u32 {
        self.pin(gpio).servo_pulse
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.log.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.log.lock().clear();
    }

    /// 某引脚的占空比写入历史
    pub fn duty_history(&self, gpio: Gpio) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter_map(|w| match *w {
                MockWrite::PwmDuty { gpio: g, duty } if g == gpio => Some(duty),
                _ => None,
            })
            .collect()
    }

    /// 某引脚的舵机脉宽写入历史
    pub fn servo_history(&self, gpio: Gpio) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter_map(|w| match *w {
                MockWrite::ServoPulse { gpio: g, micros } if g == gpio => Some(micros),
                _ => None,
            })
            .collect()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// 设置输入电平但不触发回调
    pub fn set_input_level(&self, gpio: Gpio, level: Level) {
        self.pins.lock().entry(gpio).or_default().level = level;
    }

    /// 模拟一次边沿：更新引脚电平并同步调用匹配的回调
    ///
    /// 返回被调用的回调数量。
    pub fn fire_edge(&self, gpio: Gpio, level: Level) -> usize {
        self.set_input_level(gpio, level);
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        self.callbacks.dispatch(gpio, level, tick)
    }

    /// 在 `gpio` 上产生 `pulses` 次交替跳变（每次跳变计一个边沿）
    pub fn fire_pulses(&self, gpio: Gpio, pulses: usize) {
        for _ in 0..pulses {
            let next = if self.level(gpio).is_high() {
                Level::Low
            } else {
                Level::High
            };
            self.fire_edge(gpio, next);
        }
    }

    fn check_available(&self) -> Result<(), HalError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(HalError::Unavailable("mock backend disabled".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, command: &'static str) -> Result<(), HalError> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(HalError::Backend { command, code: -1 });
        }
        Ok(())
    }

    fn record(&self, gpio: Gpio, write: MockWrite, update: impl FnOnce(&mut MockPin)) {
        update(self.pins.lock().entry(gpio).or_default());
        self.log.lock().push(write);
    }
}

impl HardwareBackend for MockBackend {
    fn set_mode(&self, gpio: Gpio, mode: PinMode) -> Result<(), HalError> {
        self.check_available()?;
        self.record(gpio, MockWrite::Mode { gpio, mode }, |p| p.mode = Some(mode));
        Ok(())
    }

    fn set_pull(&self, gpio: Gpio, pull: Pull) -> Result<(), HalError> {
        self.check_available()?;
        self.record(gpio, MockWrite::Pull { gpio, pull }, |p| p.pull = Some(pull));
        Ok(())
    }

    fn write(&self, gpio: Gpio, level: Level) -> Result<(), HalError> {
        self.check_write("WRITE")?;
        self.record(gpio, MockWrite::Level { gpio, level }, |p| p.level = level);
        Ok(())
    }

    fn read(&self, gpio: Gpio) -> Result<Level, HalError> {
        self.check_available()?;
        Ok(self.level(gpio))
    }

    fn set_pwm_frequency(&self, gpio: Gpio, hz: u32) -> Result<u32, HalError> {
        self.check_available()?;
        let actual = hz.min(MAX_PWM_FREQUENCY_HZ);
        self.record(gpio, MockWrite::PwmFrequency { gpio, hz: actual }, |p| {
            p.pwm_frequency = Some(actual)
        });
        Ok(actual)
    }

    fn set_pwm_range(&self, gpio: Gpio, range: u32) -> Result<(), HalError> {
        self.check_available()?;
        self.record(gpio, MockWrite::PwmRange { gpio, range }, |p| {
            p.pwm_range = Some(range)
        });
        Ok(())
    }

    fn set_pwm_duty(&self, gpio: Gpio, duty: u32) -> Result<(), HalError> {
        self.check_write("PWM")?;
        self.record(gpio, MockWrite::PwmDuty { gpio, duty }, |p| p.pwm_duty = duty);
        Ok(())
    }

    fn set_servo_pulse_width(&self, gpio: Gpio, micros: u32) -> Result<(), HalError> {
        self.check_write("SERVO")?;
        self.record(gpio, MockWrite::ServoPulse { gpio, micros }, |p| {
            p.servo_pulse = micros
        });
        Ok(())
    }

    fn register_edge_callback(
        &self,
        gpio: Gpio,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<CallbackId, HalError> {
        self.check_available()?;
        Ok(self.callbacks.register(gpio, edge, callback))
    }

    fn cancel_callback(&self, id: CallbackId) -> Result<(), HalError> {
        self.callbacks.cancel(id).map(|_| ())
    }
}
