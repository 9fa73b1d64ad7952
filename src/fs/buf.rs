//! 缓冲块的元数据与数据区

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::sleeplock::SleepLock;

/// 空链接。
pub(super) const NIL: usize = usize::MAX;

bitflags! {
    /// 缓冲块的状态位
    pub struct BufFlags: u8 {
        /// 数据区与磁盘上的内容一致
        const VALID = 1 << 0;
        /// 正在与磁盘交换数据
        const DISK = 1 << 1;
    }
}

/// 一个缓冲块的身份、引用计数与散列链接。
///
/// 字段都是原子量，但只在持有相应的锁时修改：
/// - `dev`/`blockno`/`used`/`bucket`: 同时持有全局锁与新旧两个桶锁；
/// - `refcnt`: 持有当前所在桶的锁；
/// - `hprev`/`hnext`: 持有当前所在桶的锁。
///
/// 原子化只是为了让淘汰扫描可以在不持有桶锁时做一次乐观读取，
/// 读到的值在加锁后必须重新确认。
pub(super) struct BufCtrl {
    pub(super) dev: AtomicU32,
    pub(super) blockno: AtomicU32,
    /// 是否曾经承载过某个块。未使用的缓冲块从不被查找命中。
    pub(super) used: AtomicBool,
    pub(super) refcnt: AtomicUsize,
    /// 所在桶的编号
    pub(super) bucket: AtomicUsize,
    pub(super) hprev: AtomicUsize,
    pub(super) hnext: AtomicUsize,
}

impl BufCtrl {
    pub(super) fn new() -> Self {
        Self {
            dev: AtomicU32::new(0),
            blockno: AtomicU32::new(0),
            used: AtomicBool::new(false),
            refcnt: AtomicUsize::new(0),
            bucket: AtomicUsize::new(NIL),
            hprev: AtomicUsize::new(NIL),
            hnext: AtomicUsize::new(NIL),
        }
    }

    /// 是否正承载 `(dev, blockno)`。
    #[inline]
    pub(super) fn holds(&self, dev: u32, blockno: u32) -> bool {
        self.used.load(Ordering::Relaxed)
            && self.dev.load(Ordering::Relaxed) == dev
            && self.blockno.load(Ordering::Relaxed) == blockno
    }

    #[inline]
    pub(super) fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Relaxed)
    }

    #[inline]
    pub(super) fn identity(&self) -> (u32, u32) {
        (
            self.dev.load(Ordering::Relaxed),
            self.blockno.load(Ordering::Relaxed),
        )
    }
}

/// 缓冲块的数据区，长度为块大小。
pub(super) struct BufData(Box<[u8]>);

impl BufData {
    fn zeroed(bsize: usize) -> Self {
        Self(vec![0; bsize].into_boxed_slice())
    }
}

impl Deref for BufData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// 缓冲块中由睡眠锁保护的部分。
pub(super) struct BufInner {
    /// [`BufFlags`] 的位表示
    flags: AtomicU8,
    pub(super) data: SleepLock<BufData>,
}

impl BufInner {
    pub(super) fn new(bsize: usize) -> Self {
        Self {
            flags: AtomicU8::new(BufFlags::empty().bits()),
            data: SleepLock::new(BufData::zeroed(bsize), "buffer"),
        }
    }

    pub(super) fn flags(&self) -> BufFlags {
        BufFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub(super) fn set(&self, flags: BufFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Release);
    }

    pub(super) fn clear(&self, flags: BufFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Release);
    }
}
