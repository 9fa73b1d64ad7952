//! 进程睡眠与唤醒
//!
//! 复刻 xv6 的 `sleep(chan, lk)` / `wakeup(chan)` 语义：睡眠者在释放条件锁之前
//! 先登记到等待表中，因此唤醒者只要在修改条件之后调用 `wakeup`，就不会丢失唤醒。
//! 宿主环境下用线程的 park/unpark 代替调度器切换。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use crate::spinlock::{SpinLock, SpinLockGuard};

pub use cpu::CpuManager;

mod cpu;

pub static PROC_MANAGER: ProcManager = ProcManager::new();

/// 等待表中的一项。
struct Sleeper {
    /// 睡眠所在的通道，通常是某个条件变量的地址。
    channel: usize,
    thread: Thread,
    /// 被 `wakeup` 置位后表示可以继续运行。
    runnable: Arc<AtomicBool>,
}

/// 管理所有处于睡眠状态的线程。
pub struct ProcManager {
    sleepers: SpinLock<Vec<Sleeper>>,
}

impl ProcManager {
    const fn new() -> Self {
        Self {
            sleepers: SpinLock::new(Vec::new(), "sleepers"),
        }
    }

    /// 原子地释放条件锁并在 `channel` 上睡眠。
    ///
    /// # 功能说明
    /// 与内核中 `Proc::sleep` 一致：先拿到等待表的锁并完成登记，再释放调用者传入的
    /// 条件锁 `guard`，随后挂起当前线程直到被 `wakeup` 标记为可运行。
    /// 返回时条件锁**没有**被重新获取，调用者需要自行加锁并重新检查条件。
    ///
    /// # 参数
    /// - `channel`: 睡眠通道，唤醒者使用同一个值调用 `wakeup`；
    /// - `guard`: 保护睡眠条件的自旋锁守卫，在登记完成后被释放。
    ///
    /// # 注意
    /// 可能出现虚假唤醒，调用者应在循环中使用。
    pub fn sleep<T: ?Sized>(&self, channel: usize, guard: SpinLockGuard<'_, T>) {
        let runnable = Arc::new(AtomicBool::new(false));
        let mut sleepers = self.sleepers.lock();
        sleepers.push(Sleeper {
            channel,
            thread: thread::current(),
            runnable: Arc::clone(&runnable),
        });
        drop(guard);
        drop(sleepers);

        while !runnable.load(Ordering::Acquire) {
            thread::park();
        }
    }

    /// 唤醒所有在 `channel` 上睡眠的线程。
    pub fn wakeup(&self, channel: usize) {
        let mut sleepers = self.sleepers.lock();
        sleepers.retain(|s| {
            if s.channel != channel {
                return true;
            }
            s.runnable.store(true, Ordering::Release);
            s.thread.unpark();
            false
        });
    }

    /// 当前在 `channel` 上睡眠的线程数。
    pub fn sleeping_on(&self, channel: usize) -> usize {
        self.sleepers
            .lock()
            .iter()
            .filter(|s| s.channel == channel)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_sleepers(channel: usize, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while PROC_MANAGER.sleeping_on(channel) < n {
            assert!(Instant::now() < deadline, "sleepers never registered");
            thread::yield_now();
        }
    }

    #[test]
    fn wakeup_releases_sleeper() {
        static COND: SpinLock<bool> = SpinLock::new(false, "cond");
        let channel = &COND as *const _ as usize;

        let sleeper = thread::spawn(move || {
            let mut guard = COND.lock();
            while !*guard {
                PROC_MANAGER.sleep(channel, guard);
                guard = COND.lock();
            }
        });

        wait_for_sleepers(channel, 1);
        *COND.lock() = true;
        PROC_MANAGER.wakeup(channel);
        sleeper.join().unwrap();
        assert_eq!(PROC_MANAGER.sleeping_on(channel), 0);
    }

    #[test]
    fn wakeup_only_touches_its_channel() {
        static A: SpinLock<bool> = SpinLock::new(false, "chan a");
        static B: SpinLock<bool> = SpinLock::new(false, "chan b");
        let chan_a = &A as *const _ as usize;
        let chan_b = &B as *const _ as usize;

        let sleeper = thread::spawn(move || {
            let mut guard = B.lock();
            while !*guard {
                PROC_MANAGER.sleep(chan_b, guard);
                guard = B.lock();
            }
        });

        wait_for_sleepers(chan_b, 1);
        PROC_MANAGER.wakeup(chan_a);
        assert_eq!(PROC_MANAGER.sleeping_on(chan_b), 1);

        *B.lock() = true;
        PROC_MANAGER.wakeup(chan_b);
        sleeper.join().unwrap();
    }
}
