//! pigpiod 套接字协议定义
//!
//! 命令帧和响应帧均为 16 字节 little-endian：`cmd, p1, p2, p3`，
//! 响应的第 4 个字为命令结果（负数表示错误码）。
//! 通知通道上的报告为 12 字节：`seqno: u16, flags: u16, tick: u32, level: u32`。

use crate::HalError;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// pigpiod 默认端口
pub const DEFAULT_PORT: u16 = 8888;

/// 命令/响应帧大小
pub const COMMAND_SIZE: usize = 16;

/// 通知报告大小
pub const REPORT_SIZE: usize = 12;

/// 报告标志：看门狗超时
pub const NTFY_FLAGS_WDOG: u16 = 1 << 5;
/// 报告标志：保活
pub const NTFY_FLAGS_ALIVE: u16 = 1 << 6;
/// 报告标志：事件
pub const NTFY_FLAGS_EVENT: u16 = 1 << 7;

/// 本库用到的 pigpiod 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Command {
    /// 设置引脚模式
    Modes = 0,
    /// 设置上下拉
    Pud = 2,
    Read = 3,
    Write = 4,
    /// 设置 PWM 占空比
    Pwm = 5,
    /// 设置 PWM 量程
    Prs = 6,
    /// 设置 PWM 频率
    Pfs = 7,
    /// 设置舵机脉宽
    Servo = 8,
    /// 读取 bank 1（GPIO 0-31）电平
    Br1 = 10,
    /// 开始通知
    Nb = 19,
    /// 关闭通知
    Nc = 21,
    /// 在当前连接上打开通知句柄
    Noib = 99,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Modes => "MODES",
            Command::Pud => "PUD",
            Command::Read => "READ",
            Command::Write => "WRITE",
            Command::Pwm => "PWM",
            Command::Prs => "PRS",
            Command::Pfs => "PFS",
            Command::Servo => "SERVO",
            Command::Br1 => "BR1",
            Command::Nb => "NB",
            Command::Nc => "NC",
            Command::Noib => "NOIB",
        }
    }
}

/// 命令请求（本库的命令都不带扩展参数，p3 恒为 0）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub p1: u32,
    pub p2: u32,
}

impl Request {
    pub fn new(command: Command, p1: u32, p2: u32) -> Self {
        Self { command, p1, p2 }
    }

    pub fn pack_to(&self, buf: &mut BytesMut) {
        buf.reserve(COMMAND_SIZE);
        buf.put_u32_le(self.command.into());
        buf.put_u32_le(self.p1);
        buf.put_u32_le(self.p2);
        buf.put_u32_le(0);
    }
}

/// 命令响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub command: Command,
    pub result: i32,
}

impl Response {
    pub fn unpack(mut data: &[u8]) -> Result<Self, HalError> {
        if data.len() < COMMAND_SIZE {
            return Err(HalError::Protocol(format!(
                "Response too short: {} bytes (expected {})",
                data.len(),
                COMMAND_SIZE
            )));
        }
        let raw_cmd = data.get_u32_le();
        let command = Command::try_from(raw_cmd)
            .map_err(|_| HalError::Protocol(format!("Unknown command in response: {}", raw_cmd)))?;
        data.advance(8);
        let result = data.get_i32_le();
        Ok(Self { command, result })
    }

    /// 将负结果转换为 [`HalError::Backend`]
    pub fn into_result(self) -> Result<u32, HalError> {
        if self.result < 0 {
            Err(HalError::Backend {
                command: self.command.name(),
                code: self.result,
            })
        } else {
            Ok(self.result as u32)
        }
    }
}

/// 通知报告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub seqno: u16,
    pub flags: u16,
    pub tick: u32,
    /// GPIO 0-31 当前电平位图
    pub level: u32,
}

impl Report {
    pub fn unpack(mut data: &[u8]) -> Result<Self, HalError> {
        if data.len() < REPORT_SIZE {
            return Err(HalError::Protocol(format!(
                "Report too short: {} bytes (expected {})",
                data.len(),
                REPORT_SIZE
            )));
        }
        Ok(Self {
            seqno: data.get_u16_le(),
            flags: data.get_u16_le(),
            tick: data.get_u32_le(),
            level: data.get_u32_le(),
        })
    }

    /// 是否为电平变化报告（看门狗、保活、事件报告不携带边沿）
    pub fn is_level_change(&self) -> bool {
        self.flags & (NTFY_FLAGS_WDOG | NTFY_FLAGS_ALIVE | NTFY_FLAGS_EVENT) == 0
    }

    /// 相对上一次电平位图，`mask` 中发生跳变的 GPIO 位图
    pub fn changed(&self, previous: u32, mask: u32) -> u32 {
        (self.level ^ previous) & mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_request_pack_to() {
        let mut buf = BytesMut::new();
        Request::new(Command::Pwm, 18, 42).pack_to(&mut buf);

        assert_eq!(buf.len(), COMMAND_SIZE);
        assert_eq!(&buf[0..4], &5u32.to_le_bytes());
        assert_eq!(&buf[4..8], &18u32.to_le_bytes());
        assert_eq!(&buf[8..12], &42u32.to_le_bytes());
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_response_unpack_error_code() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&20u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(-41i32).to_le_bytes());

        let response = Response::unpack(&data).unwrap();
        assert_eq!(response.command, Command::Write);
        assert!(matches!(
            response.into_result(),
            Err(HalError::Backend { command: "WRITE", code: -41 })
        ));
    }

    #[test]
    fn test_response_unpack_too_short() {
        assert!(matches!(
            Response::unpack(&[0u8; 10]),
            Err(HalError::Protocol(_))
        ));
    }

    #[test]
    fn test_response_unknown_command() {
        let mut data = vec![0u8; COMMAND_SIZE];
        data[0..4].copy_from_slice(&1234u32.to_le_bytes());
        assert!(Response::unpack(&data).is_err());
    }

    #[test]
    fn test_report_unpack_and_changes() {
        let mut data = Vec::new();
        data.extend_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&123_456u32.to_le_bytes());
        data.extend_from_slice(&((1u32 << 17) | (1 << 5)).to_le_bytes());

        let report = Report::unpack(&data).unwrap();
        assert_eq!(report.seqno, 7);
        assert_eq!(report.tick, 123_456);
        assert!(report.is_level_change());

        // 上一次只有 GPIO5 为高，GPIO17 跳变；GPIO27 不在监听掩码内
        let mask = (1 << 17) | (1 << 5);
        assert_eq!(report.changed(1 << 5, mask), 1 << 17);
    }

    #[test]
    fn test_report_keepalive_is_not_level_change() {
        let report = Report {
            seqno: 0,
            flags: NTFY_FLAGS_ALIVE,
            tick: 0,
            level: 0,
        };
        assert!(!report.is_level_change());
    }

    fn command_strategy() -> impl Strategy<Value = Command> {
        prop::sample::select(vec![
            Command::Modes,
            Command::Pud,
            Command::Read,
            Command::Write,
            Command::Pwm,
            Command::Prs,
            Command::Pfs,
            Command::Servo,
            Command::Br1,
            Command::Nb,
            Command::Nc,
            Command::Noib,
        ])
    }

    proptest! {
        #[test]
        fn test_request_frame_parses_as_response(
            command in command_strategy(),
            p1 in any::<u32>(),
            p2 in any::<u32>(),
        ) {
            // 守护进程回显命令帧的前三个字，第 4 个字替换为结果
            let mut buf = BytesMut::new();
            Request::new(command, p1, p2).pack_to(&mut buf);
            prop_assert_eq!(buf.len(), COMMAND_SIZE);

            let response = Response::unpack(&buf).unwrap();
            prop_assert_eq!(response.command, command);
            prop_assert_eq!(response.result, 0);
        }

        #[test]
        fn test_response_result_sign(command in command_strategy(), result in any::<i32>()) {
            let mut buf = BytesMut::new();
            buf.put_u32_le(command.into());
            buf.put_u32_le(0);
            buf.put_u32_le(0);
            buf.put_i32_le(result);

            let response = Response::unpack(&buf).unwrap();
            prop_assert_eq!(response, Response { command, result });
            match response.into_result() {
                Ok(value) => prop_assert_eq!(value as i32, result),
                Err(HalError::Backend { code, .. }) => {
                    prop_assert!(result < 0);
                    prop_assert_eq!(code, result);
                },
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
        }

        #[test]
        fn test_report_unpack_fields(
            seqno in any::<u16>(),
            flags in any::<u16>(),
            tick in any::<u32>(),
            level in any::<u32>(),
        ) {
            let mut buf = BytesMut::new();
            buf.put_u16_le(seqno);
            buf.put_u16_le(flags);
            buf.put_u32_le(tick);
            buf.put_u32_le(level);

            let report = Report::unpack(&buf).unwrap();
            prop_assert_eq!(report, Report { seqno, flags, tick, level });
            prop_assert_eq!(report.changed(level, u32::MAX), 0);
        }
    }
}
