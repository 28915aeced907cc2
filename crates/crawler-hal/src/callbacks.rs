//! 边沿回调注册表
//!
//! 后端实现共用的回调管理：注册、注销、按 GPIO 分发。

use crate::{CallbackId, Edge, EdgeCallback, Gpio, HalError, Level};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry {
    id: CallbackId,
    gpio: Gpio,
    edge: Edge,
    callback: EdgeCallback,
}

/// 边沿回调注册表
///
/// 分发时先在锁内复制出匹配的回调，再在锁外调用，
/// 因此回调内部注册/注销回调不会死锁。
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, gpio: Gpio, edge: Edge, callback: EdgeCallback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry {
            id,
            gpio,
            edge,
            callback,
        });
        id
    }

    /// 注销回调，返回该回调监听的 GPIO
    pub fn cancel(&self, id: CallbackId) -> Result<Gpio, HalError> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(HalError::UnknownCallback(id))?;
        Ok(entries.remove(index).gpio)
    }

    /// 当前被监听的 GPIO 位掩码（bit n 对应 GPIO n，仅 0..32）
    pub fn watched_mask(&self) -> u32 {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.gpio < 32)
            .fold(0u32, |mask, e| mask | (1 << e.gpio))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 分发一次电平跳变，返回被调用的回调数量
    pub fn dispatch(&self, gpio: Gpio, level: Level, tick: u32) -> usize {
        let matched: SmallVec<[EdgeCallback; 4]> = self
            .entries
            .lock()
            .iter()
            .filter(|e| e.gpio == gpio && e.edge.matches(level))
            .map(|e| e.callback.clone())
            .collect();

        for callback in &matched {
            callback(gpio, level, tick);
        }
        matched.len()
    }
}
