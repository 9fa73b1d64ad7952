//! 处理器（hart）编号管理
//!
//! 内核里 hart 号来自 `tp` 寄存器；宿主环境下每个线程第一次询问时领取一个新编号，
//! 之后在该线程的生命周期内保持不变。

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// 下一个待分配的 hart 号。
static NEXT_HART: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static HART_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

pub struct CpuManager;

impl CpuManager {
    /// 返回当前线程的 hart 号。
    #[inline]
    pub fn cpu_id() -> usize {
        HART_ID.with(|id| match id.get() {
            Some(id) => id,
            None => {
                let new = NEXT_HART.fetch_add(1, Ordering::Relaxed);
                id.set(Some(new));
                new
            }
        })
    }
}
