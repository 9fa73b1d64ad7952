//! 散列桶
//!
//! 块号按 `blockno % nbuc` 分到各个桶中，每个桶维护一条双向链表，
//! 链接字段存放在 [`BufCtrl`] 里，以缓冲块下标相连。
//! 每个桶被一把自旋锁保护，对桶的 `&mut` 借用即代表持有该锁。

use core::sync::atomic::Ordering;

use super::buf::{BufCtrl, NIL};

pub(super) struct Bucket {
    id: usize,
    head: usize,
    tail: usize,
    len: usize,
}

impl Bucket {
    pub(super) const fn new(id: usize) -> Self {
        Self {
            id,
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.len
    }

    /// `index` 号缓冲块当前是否在本桶中。
    pub(super) fn contains(&self, ctrl: &[BufCtrl], index: usize) -> bool {
        ctrl[index].bucket.load(Ordering::Relaxed) == self.id
    }

    /// 在桶中寻找承载 `(dev, blockno)` 的缓冲块。
    pub(super) fn find(&self, ctrl: &[BufCtrl], dev: u32, blockno: u32) -> Option<usize> {
        self.iter(ctrl).find(|&i| ctrl[i].holds(dev, blockno))
    }

    /// 查找并增加引用计数。
    ///
    /// # 返回值
    /// 命中时返回缓冲块下标，此时引用计数已经加一。
    pub(super) fn lookup(&mut self, ctrl: &[BufCtrl], dev: u32, blockno: u32) -> Option<usize> {
        let index = self.find(ctrl, dev, blockno)?;
        ctrl[index].refcnt.fetch_add(1, Ordering::Relaxed);
        Some(index)
    }

    /// 把 `index` 号缓冲块挂到链表末尾，已在本桶中则什么也不做。
    ///
    /// 调用者需保证它不在其他桶中。
    pub(super) fn insert(&mut self, ctrl: &[BufCtrl], index: usize) {
        if self.contains(ctrl, index) {
            return;
        }
        debug_assert_eq!(ctrl[index].bucket.load(Ordering::Relaxed), NIL);

        let node = &ctrl[index];
        node.hprev.store(self.tail, Ordering::Relaxed);
        node.hnext.store(NIL, Ordering::Relaxed);
        if self.tail == NIL {
            self.head = index;
        } else {
            ctrl[self.tail].hnext.store(index, Ordering::Relaxed);
        }
        self.tail = index;
        node.bucket.store(self.id, Ordering::Relaxed);
        self.len += 1;
    }

    /// 把 `index` 号缓冲块从链表中摘下，不在本桶中则什么也不做。
    pub(super) fn remove(&mut self, ctrl: &[BufCtrl], index: usize) {
        if !self.contains(ctrl, index) {
            return;
        }
        debug_assert!(self.len > 0);

        let node = &ctrl[index];
        let prev = node.hprev.load(Ordering::Relaxed);
        let next = node.hnext.load(Ordering::Relaxed);
        if prev == NIL {
            self.head = next;
        } else {
            ctrl[prev].hnext.store(next, Ordering::Relaxed);
        }
        if next == NIL {
            self.tail = prev;
        } else {
            ctrl[next].hprev.store(prev, Ordering::Relaxed);
        }
        node.hprev.store(NIL, Ordering::Relaxed);
        node.hnext.store(NIL, Ordering::Relaxed);
        node.bucket.store(NIL, Ordering::Relaxed);
        self.len -= 1;
    }

    /// 按链表顺序遍历桶中的缓冲块下标。
    pub(super) fn iter<'a>(&self, ctrl: &'a [BufCtrl]) -> BucketIter<'a> {
        BucketIter {
            ctrl,
            cur: self.head,
        }
    }
}

pub(super) struct BucketIter<'a> {
    ctrl: &'a [BufCtrl],
    cur: usize,
}

impl<'a> Iterator for BucketIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == NIL {
            return None;
        }
        let index = self.cur;
        self.cur = self.ctrl[index].hnext.load(Ordering::Relaxed);
        Some(index)
    }
}
