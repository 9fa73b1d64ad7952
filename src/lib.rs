//! xv6 的分桶块缓存
//!
//! 磁盘块的内存缓存：按块号散列到带独立锁的桶中，命中只需锁一个桶；
//! 未命中时在全局锁下按最近使用顺序回收空闲的缓冲块。
//! 内核的自旋锁、睡眠锁与 sleep/wakeup 在宿主线程上复刻，每个线程视作一个 hart。

#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

pub mod consts;
pub mod driver;
pub mod error;
pub mod fs;
pub mod printf;
pub mod process;
pub mod sleeplock;
pub mod spinlock;

pub use driver::{Disk, FileDisk, RamDisk};
pub use error::{BioError, DiskError};
pub use fs::{
    bcache, binit, Bcache, BcacheConfig, BcacheSnapshot, BcacheStats, Buf, BufFlags, BufState,
};
