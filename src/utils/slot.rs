//! 单槽最新值容器 (latest-wins)
//! Single-slot holder: a newer value unconditionally replaces an older undelivered one.

use std::sync::Mutex;

use super::thread::lock;

/// 单槽容器, 锁只覆盖读或替换操作
#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// 写入新值, 返回被覆盖的旧值 (未被取走的帧)
    pub fn put(&self, value: T) -> Option<T> {
        lock(&self.inner).replace(value)
    }

    /// 取走当前值, 槽位清空
    pub fn take(&self) -> Option<T> {
        lock(&self.inner).take()
    }

    pub fn clear(&self) {
        lock(&self.inner).take();
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_none()
    }
}

impl<T: Clone> LatestSlot<T> {
    /// 复制当前值, 不清空槽位
    pub fn peek(&self) -> Option<T> {
        lock(&self.inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn newer_value_replaces_pending_one() {
        let slot = LatestSlot::new();
        assert!(slot.put(1).is_none());
        assert_eq!(slot.put(2), Some(1));
        assert_eq!(slot.peek(), Some(2));
        assert_eq!(slot.take(), Some(2));
        assert!(slot.take().is_none());
    }

    #[test]
    fn concurrent_writers_leave_exactly_one_value() {
        let slot = Arc::new(LatestSlot::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        slot.put(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let last = slot.take().unwrap();
        assert_eq!(last % 1000, 99);
        assert!(slot.is_empty());
    }
}
