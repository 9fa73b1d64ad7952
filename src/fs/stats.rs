//! 块缓存的运行计数与快照

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// 块缓存累计的事件次数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BcacheStats {
    /// 目标块已在缓存中（快速路径或持全局锁后的复查命中）
    pub hits: u64,
    /// 快速路径未命中、进入回收路径的次数
    pub misses: u64,
    /// 成功改换身份的缓冲块数
    pub evictions: u64,
    /// 扫描时看似空闲、加锁后发现已被占用的候选次数
    pub eviction_races: u64,
    /// 所有缓冲块都被占用而睡眠等待的次数
    pub exhaustion_sleeps: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    /// 改换身份时引用计数不为零的次数，正常情况下恒为 0
    pub pinned_swaps: u64,
}

#[derive(Default)]
pub(super) struct Counters {
    pub(super) hits: AtomicU64,
    pub(super) misses: AtomicU64,
    pub(super) evictions: AtomicU64,
    pub(super) eviction_races: AtomicU64,
    pub(super) exhaustion_sleeps: AtomicU64,
    pub(super) disk_reads: AtomicU64,
    pub(super) disk_writes: AtomicU64,
    pub(super) pinned_swaps: AtomicU64,
}

#[inline]
pub(super) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(super) fn load(&self) -> BcacheStats {
        BcacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_races: self.eviction_races.load(Ordering::Relaxed),
            exhaustion_sleeps: self.exhaustion_sleeps.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            pinned_swaps: self.pinned_swaps.load(Ordering::Relaxed),
        }
    }
}

/// 某一时刻单个缓冲块的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufState {
    pub dev: u32,
    pub blockno: u32,
    /// 是否承载过某个块
    pub used: bool,
    pub refcnt: usize,
    pub valid: bool,
}

/// 在持有全部锁的情况下一次性取得的块缓存结构视图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BcacheSnapshot {
    /// 由近到远的使用顺序
    pub lru: Vec<usize>,
    /// 每个桶按链表顺序排列的缓冲块下标
    pub buckets: Vec<Vec<usize>>,
    /// 按下标排列的缓冲块状态
    pub bufs: Vec<BufState>,
}

impl BcacheSnapshot {
    /// 承载 `(dev, blockno)` 的缓冲块下标。
    pub fn find(&self, dev: u32, blockno: u32) -> Option<usize> {
        self.bufs
            .iter()
            .position(|b| b.used && b.dev == dev && b.blockno == blockno)
    }

    /// 检查结构不变式，返回第一处违反的描述。
    ///
    /// - 每个缓冲块恰好在一个桶中，且是 `blockno % nbuc` 对应的那个；
    /// - 使用顺序是全部缓冲块的一个排列；
    /// - 任意 `(dev, blockno)` 至多由一个缓冲块承载。
    pub fn verify(&self) -> Result<(), String> {
        let nbuf = self.bufs.len();
        let nbuc = self.buckets.len();

        let mut seen = vec![0usize; nbuf];
        for (id, chain) in self.buckets.iter().enumerate() {
            for &i in chain {
                if i >= nbuf {
                    return Err(format!("bucket {} links unknown buffer {}", id, i));
                }
                seen[i] += 1;
                let b = &self.bufs[i];
                if b.blockno as usize % nbuc != id {
                    return Err(format!(
                        "buffer {} holding block {} sits in bucket {}",
                        i, b.blockno, id
                    ));
                }
            }
        }
        if let Some(i) = seen.iter().position(|&n| n != 1) {
            return Err(format!("buffer {} appears in {} buckets", i, seen[i]));
        }

        let mut order = self.lru.clone();
        order.sort_unstable();
        if order != (0..nbuf).collect::<Vec<_>>() {
            return Err(format!("recency list is not a permutation: {:?}", self.lru));
        }

        for (i, a) in self.bufs.iter().enumerate().filter(|(_, b)| b.used) {
            if let Some(j) = self.bufs[i + 1..]
                .iter()
                .position(|b| b.used && b.dev == a.dev && b.blockno == a.blockno)
            {
                return Err(format!(
                    "block ({}, {}) cached by buffers {} and {}",
                    a.dev,
                    a.blockno,
                    i,
                    i + 1 + j
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for BcacheSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lru:")?;
        for &i in &self.lru {
            let b = &self.bufs[i];
            write!(f, " {}({}:{} rc {})", i, b.dev, b.blockno, b.refcnt)?;
        }
        for (id, chain) in self.buckets.iter().enumerate() {
            write!(f, "\nbucket {}:", id)?;
            for &i in chain {
                write!(f, " {}({})", i, self.bufs[i].blockno)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(blockno: u32, used: bool) -> BufState {
        BufState {
            dev: 1,
            blockno,
            used,
            refcnt: 0,
            valid: used,
        }
    }

    fn good() -> BcacheSnapshot {
        BcacheSnapshot {
            lru: vec![1, 0, 2],
            buckets: vec![vec![2, 0], vec![1]],
            bufs: vec![state(4, true), state(3, true), state(0, false)],
        }
    }

    #[test]
    fn accepts_consistent_snapshot() {
        let snap = good();
        assert_eq!(snap.verify(), Ok(()));
        assert_eq!(snap.find(1, 3), Some(1));
        assert_eq!(snap.find(1, 0), None);
    }

    #[test]
    fn flags_wrong_bucket() {
        let mut snap = good();
        snap.buckets = vec![vec![2], vec![1, 0]];
        assert!(snap.verify().unwrap_err().contains("bucket 1"));
    }

    #[test]
    fn flags_duplicate_identity() {
        let mut snap = good();
        snap.bufs[1].blockno = 4;
        snap.buckets = vec![vec![2, 0, 1], vec![]];
        assert!(snap.verify().unwrap_err().contains("cached by buffers 0 and 1"));
    }

    #[test]
    fn flags_missing_buffer() {
        let mut snap = good();
        snap.buckets[0].pop();
        assert!(snap.verify().unwrap_err().contains("buffer 0 appears in 0"));
    }
}
