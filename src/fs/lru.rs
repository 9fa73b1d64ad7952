//! 最近使用顺序
//!
//! 所有缓冲块串在一条带哨兵的环形双向链表上，哨兵的下一个是最近使用的，
//! 上一个是最久未使用的。链表只在持有全局锁时访问。

use super::buf::NIL;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

pub(super) struct BufLru {
    /// 前 `n` 项对应各缓冲块，最后一项是哨兵。
    links: Box<[Link]>,
}

impl BufLru {
    /// 建立 `n` 个缓冲块的初始顺序：0 号最久未使用，`n - 1` 号最近使用。
    pub(super) fn new(n: usize) -> Self {
        let mut links = vec![Link { prev: NIL, next: NIL }; n + 1].into_boxed_slice();
        let sentinel = n;
        // 由近到远：n - 1, n - 2, ..., 0
        for i in 0..n {
            links[i].next = if i == 0 { sentinel } else { i - 1 };
            links[i].prev = if i + 1 == n { sentinel } else { i + 1 };
        }
        links[sentinel] = Link {
            prev: if n == 0 { sentinel } else { 0 },
            next: if n == 0 { sentinel } else { n - 1 },
        };
        Self { links }
    }

    #[inline]
    fn sentinel(&self) -> usize {
        self.links.len() - 1
    }

    pub(super) fn len(&self) -> usize {
        self.links.len() - 1
    }

    /// 把 `index` 号缓冲块移到最近使用端。
    pub(super) fn touch(&mut self, index: usize) {
        let sentinel = self.sentinel();
        debug_assert!(index < sentinel);
        if self.links[sentinel].next == index {
            return;
        }

        let Link { prev, next } = self.links[index];
        self.links[prev].next = next;
        self.links[next].prev = prev;

        let first = self.links[sentinel].next;
        self.links[index] = Link {
            prev: sentinel,
            next: first,
        };
        self.links[first].prev = index;
        self.links[sentinel].next = index;
    }

    /// 从最久未使用端开始，按使用时间由远到近遍历。
    ///
    /// 每次调用都从头开始，可在加锁失败后重新发起。
    pub(super) fn scan_from_tail(&self) -> LruScan<'_> {
        LruScan {
            lru: self,
            cur: self.links[self.sentinel()].prev,
        }
    }

    /// 由近到远的完整顺序。
    pub(super) fn order(&self) -> Vec<usize> {
        let sentinel = self.sentinel();
        let mut order = Vec::with_capacity(self.len());
        let mut cur = self.links[sentinel].next;
        while cur != sentinel {
            order.push(cur);
            cur = self.links[cur].next;
        }
        order
    }
}

pub(super) struct LruScan<'a> {
    lru: &'a BufLru,
    cur: usize,
}

impl<'a> Iterator for LruScan<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == self.lru.sentinel() {
            return None;
        }
        let index = self.cur;
        self.cur = self.lru.links[index].prev;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn initial_order_puts_zero_last() {
        let lru = BufLru::new(4);
        assert_eq!(lru.order(), vec![3, 2, 1, 0]);
        assert_eq!(lru.scan_from_tail().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn touch_moves_to_front() {
        let mut lru = BufLru::new(4);
        lru.touch(0);
        assert_eq!(lru.order(), vec![0, 3, 2, 1]);
        lru.touch(2);
        assert_eq!(lru.order(), vec![2, 0, 3, 1]);
        lru.touch(2);
        assert_eq!(lru.order(), vec![2, 0, 3, 1]);
        assert_eq!(lru.scan_from_tail().next(), Some(1));
    }

    #[test]
    fn untouched_list_links_both_ways() {
        let lru = BufLru::new(3);
        let sentinel = lru.sentinel();
        assert_eq!(lru.links[sentinel].next, 2);
        assert_eq!(lru.links[sentinel].prev, 0);
        for i in 0..3 {
            let Link { prev, next } = lru.links[i];
            assert_eq!(lru.links[prev].next, i);
            assert_eq!(lru.links[next].prev, i);
        }
    }

    #[test]
    fn single_buffer() {
        let mut lru = BufLru::new(1);
        lru.touch(0);
        assert_eq!(lru.order(), vec![0]);
        assert_eq!(lru.scan_from_tail().collect::<Vec<_>>(), vec![0]);
    }

    proptest! {
        #[test]
        fn touches_keep_a_permutation(n in 1usize..24, touches in prop::collection::vec(0usize..24, 0..64)) {
            let mut lru = BufLru::new(n);
            let mut model: Vec<usize> = (0..n).rev().collect();
            for t in touches.into_iter().map(|t| t % n) {
                lru.touch(t);
                model.retain(|&i| i != t);
                model.insert(0, t);
            }
            prop_assert_eq!(lru.order(), model.clone());
            let mut back: Vec<usize> = lru.scan_from_tail().collect();
            back.reverse();
            prop_assert_eq!(back, model);
        }
    }
}
