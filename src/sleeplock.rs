//! 睡眠锁模块
//! 提供基于进程休眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的线程会进入休眠状态，避免忙等待。

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut, Drop};

use crate::process::{CpuManager, PROC_MANAGER};
use crate::spinlock::SpinLock;

/// 睡眠锁结构，提供阻塞式同步机制
///
/// 与自旋锁不同，当锁被占用时，尝试获取的线程会进入休眠状态，
/// 直到锁被释放后被唤醒。这避免了忙等待，适用于可能长时间持有的锁，
/// 例如跨越一次磁盘读写的缓冲块数据。
///
/// # 字段说明
/// - `lock`: 内部自旋锁，保护`locked`与`holder`
/// - `locked`: 表示锁是否已被占用
/// - `holder`: 持有者的 hart 号，-1 表示无人持有
/// - `name`: 锁的标识名称，用于调试
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性
pub struct SleepLock<T: ?Sized> {
    lock: SpinLock<()>,
    locked: Cell<bool>,
    holder: Cell<isize>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 为SleepLock实现Sync，允许跨线程共享（要求T是Send）
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: SpinLock::new((), "sleeplock"),
            locked: Cell::new(false),
            holder: Cell::new(-1),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// 获取睡眠锁（可能阻塞当前线程）
    ///
    /// # 流程解释
    /// 1. 获取内部自旋锁保护临界区
    /// 2. 检查`locked`状态：
    ///   - 如果已锁定：在`locked`的地址上睡眠，醒来后重新加锁再检查
    ///   - 如果未锁定：设置`locked=true`、记录持有者并返回守卫
    /// 3. 释放内部自旋锁（因已设置locked状态）
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut guard = self.lock.lock();

        while self.locked.get() {
            PROC_MANAGER.sleep(self.channel(), guard);
            guard = self.lock.lock();
        }

        self.locked.set(true);
        self.holder.set(CpuManager::cpu_id() as isize);
        drop(guard);

        SleepLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 当前 hart 是否持有该睡眠锁（对应 xv6 的 `holdingsleep`）。
    pub fn holding(&self) -> bool {
        let guard = self.lock.lock();
        let r = self.locked.get() && self.holder.get() == CpuManager::cpu_id() as isize;
        drop(guard);
        r
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn unlock(&self) {
        let guard = self.lock.lock();
        self.locked.set(false);
        self.holder.set(-1);
        PROC_MANAGER.wakeup(self.channel());
        drop(guard);
    }

    fn channel(&self) -> usize {
        self.locked.as_ptr() as usize
    }
}

/// 睡眠锁守卫，提供对受保护数据的访问
///
/// 守卫存在时表示锁已被持有，离开作用域时自动释放锁并唤醒等待者。
pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    data: &'a mut T,
}

impl<'a, T: ?Sized> SleepLockGuard<'a, T> {
    /// 当前 hart 是否确实是该锁的持有者。
    ///
    /// 守卫被转移到其他线程后，此处返回 `false`。
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
