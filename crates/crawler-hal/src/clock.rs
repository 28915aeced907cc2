//! 时钟抽象
//!
//! 斜坡、测速、舵机平滑等时间相关逻辑都通过 [`Clock`] 取时和休眠，
//! 测试中替换为 `ManualClock` 后无需真实等待。

use std::sync::Arc;
use std::time::{Duration, Instant};

/// 时钟能力
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> Instant;

    /// 阻塞当前线程指定时长
    fn sleep(&self, duration: Duration);
}

/// 共享时钟
pub type SharedClock = Arc<dyn Clock>;

/// 系统时钟
///
/// 休眠使用 `spin_sleep`，短延时（舵机插值步长约 7ms）抖动更低。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        spin_sleep::sleep(duration);
    }
}

#[cfg(any(test, feature = "mock"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "mock"))]
mod manual {
    use super::Clock;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct ManualState {
        elapsed: Duration,
        sleep_calls: usize,
        slept: Duration,
    }

    /// 手动时钟（测试用）
    ///
    /// 时间只在 `advance()` / `set_elapsed()` / `sleep()` 时前进，
    /// `sleep()` 立即返回并记录调用次数与累计时长。
    #[derive(Debug)]
    pub struct ManualClock {
        base: Instant,
        state: Mutex<ManualState>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                state: Mutex::new(ManualState::default()),
            }
        }

        /// 时钟起点
        pub fn base(&self) -> Instant {
            self.base
        }

        pub fn advance(&self, duration: Duration) {
            self.state.lock().elapsed += duration;
        }

        /// 直接设置相对起点的时间，可以回拨（模拟时钟非单调）
        pub fn set_elapsed(&self, elapsed: Duration) {
            self.state.lock().elapsed = elapsed;
        }

        pub fn elapsed(&self) -> Duration {
            self.state.lock().elapsed
        }

        pub fn sleep_calls(&self) -> usize {
            self.state.lock().sleep_calls
        }

        pub fn total_slept(&self) -> Duration {
            self.state.lock().slept
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + self.state.lock().elapsed
        }

        fn sleep(&self, duration: Duration) {
            let mut state = self.state.lock();
            state.elapsed += duration;
            state.slept += duration;
            state.sleep_calls += 1;
        }
    }
}
