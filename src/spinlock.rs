//! 自旋锁模块
//! 自旋锁将数据包裹在自身内部以保护这些数据。
//!
//! 宿主环境下每个线程被视作一个硬件线程（hart），锁的持有者以 hart 号记录。

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{fence, AtomicBool, AtomicIsize, Ordering};
use std::thread;

use crate::process::CpuManager;

/// 连续自旋多少次之后让出一次时间片。
///
/// 宿主线程可能在持锁期间被操作系统抢占，一味空转只会拖慢持锁者。
const SPIN_LIMIT: u32 = 64;

/// 表示一个自旋锁结构，用于在多核环境下保护共享数据。
///
/// `SpinLock` 提供了互斥访问内部数据的能力，通过忙等待（busy-waiting）实现锁机制。
/// 当锁被占用时，尝试获取锁的 hart 将在循环中等待，直到锁被释放。
/// 该锁还跟踪持有锁的 hart 号，用于检测重入。
///
/// # 类型参数
/// - `T`: 被保护的数据类型，可以是任意大小（`?Sized`）。
///
/// # 字段说明
/// - `lock`: 原子布尔值，表示锁的状态（`false`=未锁定，`true`=已锁定）；
/// - `name`: 锁的名称，用于调试和标识；
/// - `cpuid`: 当前持有锁的 hart 号（-1 表示无人持有）；
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性。
#[derive(Debug)]
pub struct SpinLock<T: ?Sized> {
    lock: AtomicBool,
    name: &'static str,
    cpuid: AtomicIsize,
    data: UnsafeCell<T>,
}

// 为SpinLock实现Sync trait，允许跨线程共享（要求T是Send）
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// 创建一个新的自旋锁实例。
    ///
    /// # 参数
    /// - `data`: 需要被保护的数据；
    /// - `name`: 锁的标识名称，用于调试。
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: AtomicBool::new(false),
            name,
            cpuid: AtomicIsize::new(-1),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// 获取自旋锁并返回一个守卫对象。
    ///
    /// # 功能说明
    /// 通过忙等待获取锁的所有权，返回一个守卫对象。
    /// 守卫对象实现了`Deref`和`DerefMut`，允许直接访问被保护数据。
    /// 当守卫对象离开作用域时，自动释放锁。
    ///
    /// # 示例
    /// ```ignore
    /// let lock = SpinLock::new(0, "test");
    /// {
    ///     let mut guard = lock.lock(); // 获取锁
    ///     *guard = 42; // 修改受保护数据
    /// } // 守卫离开作用域，自动释放锁
    /// ```
    ///
    /// # Panics
    /// 当前 hart 已经持有该锁时再次获取会 panic（`"spinlock <name> acquire"`）。
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.acquire();
        SpinLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 当前 hart 是否持有此锁。
    pub fn holding(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
            && self.cpuid.load(Ordering::Relaxed) == CpuManager::cpu_id() as isize
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 获取锁的核心实现（内部方法）。
    ///
    /// # 流程解释
    /// 1. 检查是否已持有锁（防止自死锁）；
    /// 2. 使用原子比较交换（CAS）忙等待获取锁，空转过久则让出时间片；
    /// 3. 获取成功后设置内存屏障；
    /// 4. 记录当前 hart 号。
    fn acquire(&self) {
        if self.holding() {
            panic!("spinlock {} acquire", self.name);
        }
        let mut spins = 0;
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins < SPIN_LIMIT {
                hint::spin_loop();
            } else {
                spins = 0;
                thread::yield_now();
            }
        }
        fence(Ordering::SeqCst);
        self.cpuid.store(CpuManager::cpu_id() as isize, Ordering::Relaxed);
    }

    /// 释放锁的核心实现（内部方法），由守卫的`Drop`调用。
    fn release(&self) {
        if !self.holding() {
            panic!("spinlock {} release", self.name);
        }
        self.cpuid.store(-1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.lock.store(false, Ordering::Release);
    }
}

/// 自旋锁守卫对象，提供对受保护数据的访问。
///
/// 当守卫对象存在时，表示锁已被持有。
/// 守卫离开作用域时自动释放锁。
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    data: &'a mut T,
}

impl<'a, T: ?Sized> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<'a, T: ?Sized> SpinLockGuard<'a, T> {
    /// 检查当前 hart 是否持有此锁，用于调试验证。
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    #[should_panic(expected = "spinlock smoke acquire")]
    fn smoke() {
        let m = SpinLock::new((), "smoke");
        let _g1 = m.lock();
        let _g2 = m.lock();
    }

    #[test]
    fn relock_after_release() {
        let m = SpinLock::new(0, "relock");
        *m.lock() += 1;
        *m.lock() += 1;
        assert_eq!(*m.lock(), 2);
        assert!(!m.holding());
    }

    #[test]
    fn guard_reports_holding() {
        let m = SpinLock::new((), "holding");
        let guard = m.lock();
        assert!(guard.holding());
        assert!(m.holding());
        drop(guard);
        assert!(!m.holding());
    }

    #[test]
    fn counter_across_harts() {
        const NTHREAD: usize = 8;
        const ROUNDS: usize = 2000;

        let counter = Arc::new(SpinLock::new(0usize, "counter"));
        let handles: Vec<_> = (0..NTHREAD)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), NTHREAD * ROUNDS);
    }
}
