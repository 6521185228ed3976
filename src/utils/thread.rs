//! 线程辅助函数: 有界等待 join, 容忍中毒的锁

use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// 获取锁; 持锁线程 panic 后继续使用内部数据
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 在 `timeout` 内等待线程结束. 超时 (线程被分离) 或线程 panic 时返回 false
pub fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.join().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_returns_false_for_stuck_thread() {
        let handle = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(300)));
        assert!(!join_with_timeout(handle, Duration::from_millis(20)));
    }

    #[test]
    fn join_returns_true_for_finished_thread() {
        let handle = std::thread::spawn(|| 7);
        assert!(join_with_timeout(handle, Duration::from_secs(1)));
    }
}
