//! pigpiod 后端
//!
//! 通过 pigpio 守护进程的套接字接口访问树莓派 GPIO：
//! 一条命令连接（请求/响应串行化在互斥锁内），以及按需打开的通知连接。
//!
//! # 示例
//!
//! ```rust,no_run
//! use crawler_hal::{HardwareBackend, PigpiodBackend};
//!
//! # fn main() -> Result<(), crawler_hal::HalError> {
//! let backend = PigpiodBackend::connect(("127.0.0.1", 8888))?;
//! let actual = backend.set_pwm_frequency(18, 450)?;
//! println!("PWM frequency: {} Hz", actual);
//! # Ok(())
//! # }
//! ```

mod notify;
pub mod protocol;

use crate::{
    CallbackId, CallbackRegistry, Edge, EdgeCallback, Gpio, HalError, HardwareBackend, Level,
    PinMode, Pull,
};
use bytes::BytesMut;
use notify::Notifier;
use parking_lot::Mutex;
use protocol::{COMMAND_SIZE, Command, Request, Response};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// pigpiod 套接字后端
pub struct PigpiodBackend {
    addr: SocketAddr,
    command: Mutex<TcpStream>,
    callbacks: Arc<CallbackRegistry>,
    notifier: Mutex<Option<Notifier>>,
}

impl PigpiodBackend {
    /// 连接 pigpiod
    ///
    /// # 错误
    ///
    /// 守护进程不可达时返回 [`HalError::Unavailable`]。
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, HalError> {
        let addr = addr
            .to_socket_addrs()
            .map_err(|e| HalError::Unavailable(format!("invalid pigpiod address: {}", e)))?
            .next()
            .ok_or_else(|| HalError::Unavailable("pigpiod address resolved to nothing".into()))?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| HalError::Unavailable(format!("cannot reach pigpiod at {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(COMMAND_TIMEOUT))?;

        info!("Connected to pigpiod at {}", addr);
        Ok(Self {
            addr,
            command: Mutex::new(stream),
            callbacks: Arc::new(CallbackRegistry::new()),
            notifier: Mutex::new(None),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn execute(&self, command: Command, p1: u32, p2: u32) -> Result<u32, HalError> {
        let mut buf = BytesMut::with_capacity(COMMAND_SIZE);
        Request::new(command, p1, p2).pack_to(&mut buf);

        let mut stream = self.command.lock();
        stream.write_all(&buf)?;
        let mut response = [0u8; COMMAND_SIZE];
        stream.read_exact(&mut response)?;
        drop(stream);

        let response = Response::unpack(&response)?;
        if response.command != command {
            return Err(HalError::Protocol(format!(
                "Response for {} while waiting for {}",
                response.command.name(),
                command.name()
            )));
        }
        response.into_result()
    }

    /// 按当前回调集合同步通知位掩码，必要时打开通知连接
    fn sync_notify_mask(&self) -> Result<(), HalError> {
        let mask = self.callbacks.watched_mask();
        let mut notifier = self.notifier.lock();

        if notifier.is_none() {
            if mask == 0 {
                return Ok(());
            }
            let levels = self.execute(Command::Br1, 0, 0)?;
            *notifier = Some(Notifier::open(self.addr, levels, self.callbacks.clone())?);
        }

        if let Some(n) = notifier.as_ref() {
            self.execute(Command::Nb, n.handle(), mask)?;
            debug!("pigpiod notify mask set to {:#010x}", mask);
        }
        Ok(())
    }
}

impl HardwareBackend for PigpiodBackend {
    fn set_mode(&self, gpio: Gpio, mode: PinMode) -> Result<(), HalError> {
        let mode = match mode {
            PinMode::Input => 0,
            PinMode::Output => 1,
        };
        self.execute(Command::Modes, gpio, mode).map(|_| ())
    }

    fn set_pull(&self, gpio: Gpio, pull: Pull) -> Result<(), HalError> {
        let pull = match pull {
            Pull::Off => 0,
            Pull::Down => 1,
            Pull::Up => 2,
        };
        self.execute(Command::Pud, gpio, pull).map(|_| ())
    }

    fn write(&self, gpio: Gpio, level: Level) -> Result<(), HalError> {
        self.execute(Command::Write, gpio, level.as_u32()).map(|_| ())
    }

    fn read(&self, gpio: Gpio) -> Result<Level, HalError> {
        self.execute(Command::Read, gpio, 0).map(|v| Level::from(v != 0))
    }

    fn set_pwm_frequency(&self, gpio: Gpio, hz: u32) -> Result<u32, HalError> {
        let actual = self.execute(Command::Pfs, gpio, hz)?;
        if actual != hz {
            debug!("GPIO {} PWM frequency {} Hz requested, {} Hz applied", gpio, hz, actual);
        }
        Ok(actual)
    }

    fn set_pwm_range(&self, gpio: Gpio, range: u32) -> Result<(), HalError> {
        self.execute(Command::Prs, gpio, range).map(|_| ())
    }

    fn set_pwm_duty(&self, gpio: Gpio, duty: u32) -> Result<(), HalError> {
        self.execute(Command::Pwm, gpio, duty).map(|_| ())
    }

    fn set_servo_pulse_width(&self, gpio: Gpio, micros: u32) -> Result<(), HalError> {
        self.execute(Command::Servo, gpio, micros).map(|_| ())
    }

    fn register_edge_callback(
        &self,
        gpio: Gpio,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<CallbackId, HalError> {
        if gpio >= 32 {
            return Err(HalError::Backend {
                command: Command::Nb.name(),
                code: -3,
            });
        }
        let id = self.callbacks.register(gpio, edge, callback);
        if let Err(e) = self.sync_notify_mask() {
            let _ = self.callbacks.cancel(id);
            return Err(e);
        }
        Ok(id)
    }

    fn cancel_callback(&self, id: CallbackId) -> Result<(), HalError> {
        self.callbacks.cancel(id)?;
        self.sync_notify_mask()
    }
}

impl Drop for PigpiodBackend {
    fn drop(&mut self) {
        if let Some(mut notifier) = self.notifier.lock().take() {
            if let Err(e) = self.execute(Command::Nc, notifier.handle(), 0) {
                warn!("Failed to close pigpiod notification handle: {}", e);
            }
            notifier.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use std::net::TcpListener;
    use std::thread;

    /// 最小 pigpiod 替身：逐条应答命令，PFS 回显频率，WRITE 到 GPIO 99 返回错误
    fn spawn_fake_daemon() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut frame = [0u8; COMMAND_SIZE];
            while stream.read_exact(&mut frame).is_ok() {
                let cmd = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
                let p1 = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
                let p2 = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
                let result: i32 = match cmd {
                    7 => p2 as i32,
                    4 if p1 == 99 => -3,
                    3 => 1,
                    _ => 0,
                };
                let mut out = BytesMut::with_capacity(COMMAND_SIZE);
                out.put_u32_le(cmd);
                out.put_u32_le(p1);
                out.put_u32_le(p2);
                out.put_i32_le(result);
                if stream.write_all(&out).is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[test]
    fn test_connect_unreachable_is_unavailable() {
        // 绑定后立即释放，得到一个大概率无人监听的端口
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let err = PigpiodBackend::connect(addr).err().unwrap();
        assert!(matches!(err, HalError::Unavailable(_)));
    }

    #[test]
    fn test_commands_against_fake_daemon() {
        let backend = PigpiodBackend::connect(spawn_fake_daemon()).unwrap();

        backend.set_mode(18, PinMode::Output).unwrap();
        assert_eq!(backend.set_pwm_frequency(18, 450).unwrap(), 450);
        backend.set_pwm_duty(18, 40).unwrap();
        assert_eq!(backend.read(17).unwrap(), Level::High);

        let err = backend.write(99, Level::High).unwrap_err();
        assert!(matches!(err, HalError::Backend { command: "WRITE", code: -3 }));
    }
}
