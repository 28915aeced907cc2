//! pigpiod 通知通道
//!
//! 独立的 TCP 连接：`NOIB` 打开通知句柄后，守护进程在该连接上持续推送
//! 12 字节电平报告。后台线程比较相邻报告的电平位图，把被监听 GPIO 的跳变
//! 分发给 [`CallbackRegistry`]。

use super::protocol::{COMMAND_SIZE, Command, REPORT_SIZE, Report, Request, Response};
use crate::{CallbackRegistry, HalError, JoinTimeout, Level};
use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

pub(crate) struct Notifier {
    handle: u32,
    stream: TcpStream,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Notifier {
    /// 打开通知连接并启动分发线程
    ///
    /// `initial_levels` 为打开时 bank 1 的电平位图，作为第一份报告的比较基准。
    pub(crate) fn open(
        addr: SocketAddr,
        initial_levels: u32,
        callbacks: Arc<CallbackRegistry>,
    ) -> Result<Self, HalError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let mut buf = BytesMut::with_capacity(COMMAND_SIZE);
        Request::new(Command::Noib, 0, 0).pack_to(&mut buf);
        stream.write_all(&buf)?;
        let mut response = [0u8; COMMAND_SIZE];
        stream.read_exact(&mut response)?;
        let handle = Response::unpack(&response)?.into_result()?;

        let reader = stream.try_clone()?;
        let is_running = Arc::new(AtomicBool::new(true));
        let running = is_running.clone();
        let thread = std::thread::Builder::new()
            .name("pigpiod-notify".to_string())
            .spawn(move || notify_loop(reader, initial_levels, callbacks, running))?;

        debug!("pigpiod notification handle {} opened", handle);
        Ok(Self {
            handle,
            stream,
            is_running,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> u32 {
        self.handle
    }

    /// 停止分发线程（关闭套接字使阻塞读返回）
    pub(crate) fn close(&mut self) {
        self.is_running.store(false, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);

        let join_timeout = Duration::from_secs(2);
        if let Some(handle) = self.thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Notification thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.close();
    }
}

fn notify_loop(
    mut stream: TcpStream,
    mut last_levels: u32,
    callbacks: Arc<CallbackRegistry>,
    is_running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; REPORT_SIZE];

    while is_running.load(Ordering::Acquire) {
        if let Err(e) = stream.read_exact(&mut buf) {
            if is_running.load(Ordering::Acquire) {
                warn!("pigpiod notification stream closed: {}", e);
            }
            break;
        }

        let report = match Report::unpack(&buf) {
            Ok(report) => report,
            Err(e) => {
                warn!("Dropping malformed notification report: {}", e);
                continue;
            },
        };

        if !report.is_level_change() {
            trace!("Skipping notification report with flags {:#06x}", report.flags);
            continue;
        }

        let mut changed = report.changed(last_levels, callbacks.watched_mask());
        last_levels = report.level;

        while changed != 0 {
            let gpio = changed.trailing_zeros();
            changed &= changed - 1;
            let level = Level::from((report.level >> gpio) & 1 == 1);
            callbacks.dispatch(gpio, level, report.tick);
        }
    }

    debug!("pigpiod notification thread exited");
}
