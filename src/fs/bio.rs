//! 缓存层
//!
//! 缓冲块按块号散列到若干个桶中，每个桶有自己的自旋锁，命中时只需要锁住一个桶。
//! 未命中时才取全局锁，按最近使用顺序从最久未用的一端挑选可回收的缓冲块。
//!
//! 锁的获取顺序：
//! 1. 全局锁 `lru`；
//! 2. 桶锁，按桶编号从小到大，同一时刻至多两把，且只经由 [`Bcache::lock_pair`] 同时获取；
//! 3. 释放计数锁 `freed`。
//!
//! 缓冲块的睡眠锁只在不持有任何自旋锁时获取。

use core::sync::atomic::Ordering;
use std::sync::OnceLock;

use log::{debug, info, trace, warn};

use crate::driver::Disk;
use crate::error::{BioError, Result};
use crate::process::PROC_MANAGER;
use crate::sleeplock::SleepLockGuard;
use crate::spinlock::{SpinLock, SpinLockGuard};

use super::buf::{BufCtrl, BufData, BufFlags, BufInner};
use super::bucket::Bucket;
use super::config::BcacheConfig;
use super::lru::BufLru;
use super::stats::{bump, BcacheSnapshot, BcacheStats, BufState, Counters};

static BCACHE: OnceLock<Bcache> = OnceLock::new();

/// 初始化全局缓冲区缓存，只能成功一次。
///
/// # 可能的错误
/// - 参数非法时返回 `BioError::Config`；
/// - 重复初始化时返回 `BioError::Config`，已有的实例保持不变。
pub fn binit(config: BcacheConfig, disk: impl Disk + 'static) -> Result<&'static Bcache> {
    let bcache = Bcache::new(config, disk)?;
    BCACHE
        .set(bcache)
        .map_err(|_| BioError::Config("buffer cache already initialized"))?;
    Ok(bcache_ref())
}

/// 全局缓冲区缓存。
///
/// # Panics
/// 在 [`binit`] 之前调用会 panic。
pub fn bcache() -> &'static Bcache {
    bcache_ref()
}

fn bcache_ref() -> &'static Bcache {
    match BCACHE.get() {
        Some(bcache) => bcache,
        None => panic!("bcache: not initialized"),
    }
}

#[cfg(test)]
type RaceHook = Box<dyn FnMut(&Bcache, usize) + Send>;

/// 缓冲区缓存（Buffer Cache），块设备与文件系统之间的缓存层。
///
/// 固定数量的缓冲块在构造时一次性分配，之后只改换它们承载的 `(dev, blockno)`。
/// 每个缓冲块同时处在某一个桶的链表与全局的最近使用链表中。
pub struct Bcache {
    config: BcacheConfig,

    /// 最近使用顺序，同时串行化所有的淘汰操作。
    lru: SpinLock<BufLru>,

    /// 散列桶，第 `i` 个桶容纳 `blockno % nbuc == i` 的缓冲块。
    buckets: Box<[SpinLock<Bucket>]>,

    /// 缓冲块的身份、引用计数与桶内链接，与 `bufs` 按下标一一对应。
    ctrl: Box<[BufCtrl]>,

    /// 缓冲块的数据区，由各自的睡眠锁保护。
    bufs: Box<[BufInner]>,

    /// 引用计数归零的累计次数。
    ///
    /// 耗尽时的等待者先记下这个值再扫描，睡眠前若发现它已改变就直接重试。
    freed: SpinLock<u64>,

    disk: Box<dyn Disk>,

    stats: Counters,

    /// 淘汰扫描选中候选之后、获取桶锁之前调用，用来稳定地复现竞争。
    #[cfg(test)]
    race_hook: SpinLock<Option<RaceHook>>,
}

impl Bcache {
    /// 创建一个缓冲区缓存。
    ///
    /// # 功能说明
    /// 按 `config` 分配缓冲块。所有缓冲块起初都未承载任何块，全部挂在 0 号桶中，
    /// 最近使用顺序为 0 号最久未用。
    ///
    /// # 参数
    /// - `config`: 缓冲块数量、桶数量与块大小；
    /// - `disk`: 块设备驱动，缓存未命中时从它读取数据。
    ///
    /// # 可能的错误
    /// - 参数非法时返回 `BioError::Config`。
    pub fn new(config: BcacheConfig, disk: impl Disk + 'static) -> Result<Self> {
        config.validate()?;
        let BcacheConfig { nbuf, nbuc, bsize } = config;

        let ctrl: Box<[BufCtrl]> = (0..nbuf).map(|_| BufCtrl::new()).collect();
        let bufs = (0..nbuf).map(|_| BufInner::new(bsize)).collect();

        let mut buckets: Vec<Bucket> = (0..nbuc).map(Bucket::new).collect();
        for i in 0..nbuf {
            buckets[0].insert(&ctrl, i);
        }
        let buckets = buckets
            .into_iter()
            .map(|b| SpinLock::new(b, "bcache.bucket"))
            .collect();

        info!("bcache: {} buffers in {} buckets", nbuf, nbuc);
        #[cfg(feature = "verbose_init_info")]
        info!(
            "bcache: block size {} bytes, data area {} bytes",
            bsize,
            nbuf * bsize
        );

        Ok(Self {
            config,
            lru: SpinLock::new(BufLru::new(nbuf), "bcache"),
            buckets,
            ctrl,
            bufs,
            freed: SpinLock::new(0, "bcache.freed"),
            disk: Box::new(disk),
            stats: Counters::default(),
            #[cfg(test)]
            race_hook: SpinLock::new(None, "bcache.race_hook"),
        })
    }

    /// 构造时使用的参数。
    ///
    /// # 返回值
    /// - 经过校验的 [`BcacheConfig`] 副本。
    pub fn config(&self) -> BcacheConfig {
        self.config
    }

    #[inline]
    fn bucket_of(&self, blockno: u32) -> usize {
        blockno as usize % self.config.nbuc
    }

    /// 耗尽时的睡眠通道。
    fn free_channel(&self) -> usize {
        &self.freed as *const _ as usize
    }

    /// 获取指定设备与块号对应的缓冲块，不读盘。
    ///
    /// # 功能说明
    /// 若目标块已被缓存则返回承载它的缓冲块，否则回收一个最久未用且无人引用的缓冲块。
    /// 返回时已持有缓冲块的睡眠锁，调用者通过 [`Buf::is_valid`] 判断是否需要读盘。
    ///
    /// # 流程解释
    /// - 快速路径：只锁目标桶查找，命中则引用计数加一后放开桶锁；
    ///   随后获取睡眠锁（可能阻塞），再短暂地取全局锁把它移到最近使用端；
    /// - 未命中则进入 [`Bcache::recycle`]，在全局锁下复查或淘汰；
    /// - 所有缓冲块都被引用时，睡眠等待直到有缓冲块被释放。
    ///
    /// # 参数
    /// - `dev`: 块所属的设备编号；
    /// - `blockno`: 块在设备中的逻辑块号。
    ///
    /// # 返回值
    /// - 持有睡眠锁的 [`Buf`]，离开作用域时自动释放。
    pub fn bget(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let id = self.bucket_of(blockno);

        let cached = self.buckets[id].lock().lookup(&self.ctrl, dev, blockno);
        let index = match cached {
            Some(index) => {
                bump(&self.stats.hits);
                let data = self.bufs[index].data.lock();
                self.lru.lock().touch(index);
                return Buf::new(self, index, dev, blockno, data);
            }
            None => {
                bump(&self.stats.misses);
                self.recycle(dev, blockno, id)
            }
        };

        #[cfg(feature = "trace_lru")]
        {
            self.dump_lru();
            self.dump_buckets();
        }

        let data = self.bufs[index].data.lock();
        Buf::new(self, index, dev, blockno, data)
    }

    /// 与 [`Bcache::bget`] 相同。
    pub fn get(&self, dev: u32, blockno: u32) -> Buf<'_> {
        self.bget(dev, blockno)
    }

    /// 未命中时在全局锁下取得一个承载 `(dev, blockno)` 的缓冲块。
    ///
    /// # 流程解释
    /// 1. 复查目标桶：快速路径与取得全局锁之间，其他线程可能已经缓存了该块；
    /// 2. 从最久未用端扫描，跳过引用计数不为零的缓冲块；
    /// 3. 对候选者经由 [`Bcache::lock_pair`] 锁住其所在桶与目标桶，
    ///    在桶锁下重新确认引用计数为零，否则放开桶锁继续扫描下一个；
    /// 4. 确认后改换身份：迁移桶、清除有效位、引用计数置 1、移到最近使用端；
    /// 5. 扫描不到可用的缓冲块时，放开全局锁在释放通道上睡眠，醒来后重来。
    ///
    /// # 返回值
    /// - 缓冲块下标，此时引用计数已为调用者加一，睡眠锁尚未获取。
    fn recycle(&self, dev: u32, blockno: u32, target: usize) -> usize {
        let mut lru = self.lru.lock();
        loop {
            let cached = self.buckets[target].lock().lookup(&self.ctrl, dev, blockno);
            if let Some(index) = cached {
                bump(&self.stats.hits);
                lru.touch(index);
                return index;
            }

            let seen = *self.freed.lock();
            let mut victim = None;
            for index in lru.scan_from_tail() {
                let ctrl = &self.ctrl[index];
                if ctrl.refcnt() != 0 {
                    continue;
                }

                #[cfg(test)]
                self.before_validate(index);

                let old = self.bucket_of(ctrl.identity().1);
                let mut pair = self.lock_pair(&lru, old, target);
                if ctrl.refcnt() != 0 {
                    bump(&self.stats.eviction_races);
                    debug!("bcache: buffer {} pinned during eviction scan", index);
                    continue;
                }

                let (old_dev, old_blockno) = ctrl.identity();
                if old != target {
                    pair.bucket(old).remove(&self.ctrl, index);
                    pair.bucket(target).insert(&self.ctrl, index);
                }
                self.swap_identity(index, dev, blockno);
                debug!(
                    "bcache: evict buffer {} ({}, {}) for ({}, {})",
                    index, old_dev, old_blockno, dev, blockno
                );
                victim = Some((index, pair));
                break;
            }

            if let Some((index, pair)) = victim {
                lru.touch(index);
                drop(pair);
                drop(lru);
                return index;
            }

            let freed = self.freed.lock();
            if *freed == seen {
                bump(&self.stats.exhaustion_sleeps);
                debug!("bcache: all buffers pinned, waiting for ({}, {})", dev, blockno);
                drop(lru);
                PROC_MANAGER.sleep(self.free_channel(), freed);
            } else {
                drop(freed);
                drop(lru);
            }
            lru = self.lru.lock();
        }
    }

    /// 改换缓冲块的身份，调用者持有全局锁与新旧两个桶的锁。
    fn swap_identity(&self, index: usize, dev: u32, blockno: u32) {
        let ctrl = &self.ctrl[index];
        if ctrl.refcnt.swap(1, Ordering::Relaxed) != 0 {
            bump(&self.stats.pinned_swaps);
            warn!("bcache: buffer {} swapped while pinned", index);
        }
        ctrl.dev.store(dev, Ordering::Relaxed);
        ctrl.blockno.store(blockno, Ordering::Relaxed);
        ctrl.used.store(true, Ordering::Relaxed);
        self.bufs[index].clear(BufFlags::VALID);
        bump(&self.stats.evictions);
    }

    /// 同时锁住两个桶。
    ///
    /// 传入全局锁的守卫作为已持有全局锁的凭证。两个桶按编号从小到大加锁，
    /// 编号相同时只加一把锁。
    fn lock_pair<'a>(
        &'a self,
        _lru: &SpinLockGuard<'_, BufLru>,
        a: usize,
        b: usize,
    ) -> BucketPair<'a> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let lo_guard = self.buckets[lo].lock();
        let hi_guard = if hi != lo {
            Some(self.buckets[hi].lock())
        } else {
            None
        };
        BucketPair {
            hi: hi_guard,
            lo: lo_guard,
            lo_id: lo,
        }
    }

    /// 读取指定块，必要时从磁盘加载。
    ///
    /// # 功能说明
    /// 先调用 [`Bcache::bget`]，若缓冲块数据无效则从磁盘读入并置有效位。
    ///
    /// # 返回值
    /// - 持有睡眠锁且数据有效的 [`Buf`]。
    ///
    /// # 可能的错误
    /// - 磁盘读失败时返回 `BioError::Read`，缓冲块保持无效并已被释放。
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        let mut b = self.bget(dev, blockno);
        if !b.is_valid() {
            b.load()?;
        }
        Ok(b)
    }

    /// 显式释放缓冲块，与直接 `drop` 等价。
    pub fn brelse(&self, b: Buf<'_>) {
        if !core::ptr::eq(b.cache, self) {
            panic!("brelse");
        }
        drop(b);
    }

    /// 引用计数减一，归零时唤醒等待可用缓冲块的线程。
    ///
    /// 调用者仍持有该缓冲块的引用，身份不会改变，因此可以直接由块号定位所在的桶。
    fn release_ref(&self, index: usize, blockno: u32) -> bool {
        let bucket = self.buckets[self.bucket_of(blockno)].lock();
        let rc = self.ctrl[index]
            .refcnt
            .fetch_sub(1, Ordering::Relaxed);
        drop(bucket);
        rc == 1
    }

    fn notify_free(&self) {
        let mut freed = self.freed.lock();
        *freed = freed.wrapping_add(1);
        PROC_MANAGER.wakeup(self.free_channel());
        drop(freed);
    }

    /// 累计的事件计数。
    pub fn stats(&self) -> BcacheStats {
        self.stats.load()
    }

    /// 取得一份一致的结构视图。
    ///
    /// 持有全局锁并按编号从小到大锁住全部的桶，期间所有的未命中与释放都会等待。
    pub fn snapshot(&self) -> BcacheSnapshot {
        let lru = self.lru.lock();
        let buckets: Vec<_> = self.buckets.iter().map(|b| b.lock()).collect();

        let chains: Vec<Vec<usize>> = buckets
            .iter()
            .map(|b| b.iter(&self.ctrl).collect())
            .collect();
        let bufs: Vec<BufState> = self
            .ctrl
            .iter()
            .zip(self.bufs.iter())
            .map(|(ctrl, inner)| {
                let (dev, blockno) = ctrl.identity();
                BufState {
                    dev,
                    blockno,
                    used: ctrl.used.load(Ordering::Relaxed),
                    refcnt: ctrl.refcnt(),
                    valid: inner.flags().contains(BufFlags::VALID),
                }
            })
            .collect();
        let snapshot = BcacheSnapshot {
            lru: lru.order(),
            buckets: chains,
            bufs,
        };

        for guard in buckets.into_iter().rev() {
            drop(guard);
        }
        drop(lru);
        snapshot
    }

    /// 按由近到远的顺序输出最近使用链表。
    pub fn dump_lru(&self) {
        let snapshot = self.snapshot();
        trace!("bcache lru:");
        for &i in &snapshot.lru {
            let b = &snapshot.bufs[i];
            trace!(
                "  buf {} dev {} blockno {} refcnt {} valid {}",
                i,
                b.dev,
                b.blockno,
                b.refcnt,
                b.valid
            );
        }
    }

    /// 输出每个桶的链表。
    pub fn dump_buckets(&self) {
        let snapshot = self.snapshot();
        for (id, chain) in snapshot.buckets.iter().enumerate() {
            let blocks: Vec<_> = chain
                .iter()
                .map(|&i| (i, snapshot.bufs[i].blockno))
                .collect();
            trace!("bcache bucket {}: {:?}", id, blocks);
        }
    }

    #[cfg(test)]
    fn before_validate(&self, index: usize) {
        let mut hook = self.race_hook.lock();
        if let Some(f) = hook.as_mut() {
            f(self, index);
        }
    }

    #[cfg(test)]
    fn set_race_hook(&self, hook: Option<RaceHook>) {
        *self.race_hook.lock() = hook;
    }
}

/// 经由 [`Bcache::lock_pair`] 同时持有的一到两把桶锁。
struct BucketPair<'a> {
    // 字段按声明顺序析构，先放开编号大的桶
    hi: Option<SpinLockGuard<'a, Bucket>>,
    lo: SpinLockGuard<'a, Bucket>,
    lo_id: usize,
}

impl<'a> BucketPair<'a> {
    fn bucket(&mut self, id: usize) -> &mut Bucket {
        match self.hi.as_mut() {
            Some(hi) if id != self.lo_id => &mut **hi,
            _ => &mut *self.lo,
        }
    }
}

/// 一个已取得的缓冲块，代表对 `(dev, blockno)` 数据的独占访问。
///
/// 由 [`Bcache::bget`] / [`Bcache::bread`] 创建，持有缓冲块的睡眠锁与一份引用计数。
/// 离开作用域时先减少引用计数，再放开睡眠锁。
pub struct Buf<'a> {
    cache: &'a Bcache,

    /// 缓冲块在缓存中的下标。
    index: usize,

    dev: u32,
    blockno: u32,

    /// 缓冲数据的睡眠锁守卫。
    ///
    /// 在 `Buf` 生命周期内始终为 `Some`，析构时取出，以便控制放锁的时机。
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> Buf<'a> {
    fn new(
        cache: &'a Bcache,
        index: usize,
        dev: u32,
        blockno: u32,
        data: SleepLockGuard<'a, BufData>,
    ) -> Self {
        Self {
            cache,
            index,
            dev,
            blockno,
            data: Some(data),
        }
    }

    /// 缓冲块承载的设备编号。
    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// 缓冲块承载的逻辑块号。
    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    /// 缓冲块在缓存中的下标，在 [`Bcache::snapshot`] 中用来对照。
    pub fn index(&self) -> usize {
        self.index
    }

    /// 当前的状态位。
    pub fn flags(&self) -> BufFlags {
        self.inner().flags()
    }

    /// 数据是否已与磁盘一致。
    pub fn is_valid(&self) -> bool {
        self.flags().contains(BufFlags::VALID)
    }

    /// 缓冲数据。
    ///
    /// # 返回值
    /// - 长度为块大小的只读切片，未调用 [`Bcache::bread`] 读盘时内容无意义。
    pub fn data(&self) -> &[u8] {
        match self.data.as_ref() {
            Some(guard) => &guard[..],
            None => unreachable!("buf data taken before drop"),
        }
    }

    /// 可写的缓冲数据，修改只有经 [`Buf::bwrite`] 才会落盘。
    pub fn data_mut(&mut self) -> &mut [u8] {
        match self.data.as_mut() {
            Some(guard) => &mut guard[..],
            None => unreachable!("buf data taken before drop"),
        }
    }

    /// 当前 hart 是否持有缓冲块的睡眠锁。
    pub fn holding(&self) -> bool {
        self.data.as_ref().map_or(false, |guard| guard.holding())
    }

    fn inner(&self) -> &'a BufInner {
        &self.cache.bufs[self.index]
    }

    /// 从磁盘读入数据并置有效位。
    fn load(&mut self) -> Result<()> {
        let (dev, blockno) = (self.dev, self.blockno);
        let cache = self.cache;
        let inner = self.inner();

        inner.set(BufFlags::DISK);
        let r = cache.disk.read(dev, blockno, self.data_mut());
        inner.clear(BufFlags::DISK);

        match r {
            Ok(()) => {
                inner.set(BufFlags::VALID);
                bump(&cache.stats.disk_reads);
                Ok(())
            }
            Err(source) => {
                warn!("bcache: read ({}, {}) failed: {}", dev, blockno, source);
                Err(BioError::Read {
                    dev,
                    blockno,
                    source,
                })
            }
        }
    }

    /// 把缓冲块的数据同步写回磁盘。
    ///
    /// # 可能的错误
    /// - 磁盘写失败时返回 `BioError::Write`，缓冲块内容与有效位不变。
    ///
    /// # Panics
    /// 当前 hart 没有持有该缓冲块的睡眠锁时 panic（`"bwrite"`）。
    pub fn bwrite(&mut self) -> Result<()> {
        if !self.holding() {
            panic!("bwrite");
        }
        let (dev, blockno) = (self.dev, self.blockno);
        let cache = self.cache;
        let inner = self.inner();

        inner.set(BufFlags::DISK);
        let r = cache.disk.write(dev, blockno, self.data());
        inner.clear(BufFlags::DISK);

        r.map(|()| bump(&cache.stats.disk_writes)).map_err(|source| {
            warn!("bcache: write ({}, {}) failed: {}", dev, blockno, source);
            BioError::Write {
                dev,
                blockno,
                source,
            }
        })
    }

    /// 引用计数加一，使缓冲块在本守卫释放后也不会被回收。
    ///
    /// 与 [`Buf::unpin`] 配对使用，常见于日志层把块留在缓存中直到提交。
    pub fn pin(&self) {
        let cache = self.cache;
        let _bucket = cache.buckets[cache.bucket_of(self.blockno)].lock();
        cache.ctrl[self.index]
            .refcnt
            .fetch_add(1, Ordering::Relaxed);
    }

    /// 引用计数减一，撤销一次 [`Buf::pin`]。
    ///
    /// 撤销钉住同样要经由一个已取得的 `Buf`，即需要重新取得缓冲块的睡眠锁；
    /// 本守卫自身仍持有一份引用，因此这里不会让引用计数归零，
    /// 缓冲块在本守卫释放之后才可能被回收。
    ///
    /// # Panics
    /// 引用计数不大于本守卫自身持有的那一份时 panic（`"buf unpin not match"`）。
    pub fn unpin(&self) {
        let cache = self.cache;
        let _bucket = cache.buckets[cache.bucket_of(self.blockno)].lock();
        let refcnt = &cache.ctrl[self.index].refcnt;
        let rc = refcnt.load(Ordering::Relaxed);
        if rc <= 1 {
            panic!("buf unpin not match");
        }
        refcnt.store(rc - 1, Ordering::Relaxed);
    }
}

impl<'a> Drop for Buf<'a> {
    fn drop(&mut self) {
        // 展开途中不能再次 panic，照常释放
        if !self.holding() && !std::thread::panicking() {
            panic!("brelse");
        }
        let freed = self.cache.release_ref(self.index, self.blockno);
        drop(self.data.take());
        if freed {
            self.cache.notify_free();
        }
    }
}
