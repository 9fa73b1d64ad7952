//! 内存盘
//!
//! 用一段内存模拟若干块设备，供块缓存的测试与演示使用。
//! 支持故障注入、读写计数以及人为的访问延迟。

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::DiskError;
use crate::spinlock::SpinLock;
use super::Disk;

/// 一个设备的全部块。
struct Device {
    dev: u32,
    blocks: SpinLock<Vec<u8>>,
}

pub struct RamDisk {
    bsize: usize,
    nblocks: u32,
    devices: Vec<Device>,
    /// 访问时返回 `DiskError::Injected` 的 `(dev, blockno)`。
    faults: SpinLock<Vec<(u32, u32)>>,
    /// 每次传输前睡眠的时长（微秒），0 表示不延迟。
    latency_us: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    /// 创建一个内存盘，`devs` 中每个设备号各拥有 `nblocks` 个大小为 `bsize` 的全零块。
    pub fn new(devs: &[u32], nblocks: u32, bsize: usize) -> Self {
        let devices = devs
            .iter()
            .map(|&dev| Device {
                dev,
                blocks: SpinLock::new(vec![0; nblocks as usize * bsize], "ramdisk"),
            })
            .collect();
        Self {
            bsize,
            nblocks,
            devices,
            faults: SpinLock::new(Vec::new(), "ramdisk faults"),
            latency_us: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// 每块的字节数。
    pub fn block_size(&self) -> usize {
        self.bsize
    }

    /// 每个设备的块数。
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    /// 让之后对 `(dev, blockno)` 的读写都失败，直到调用 [`RamDisk::clear_faults`]。
    pub fn fail_block(&self, dev: u32, blockno: u32) {
        let mut faults = self.faults.lock();
        if !faults.contains(&(dev, blockno)) {
            faults.push((dev, blockno));
        }
    }

    /// 撤销所有注入的故障。
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// 设置每次传输的人为延迟，用来拉长持有睡眠锁的时间窗口。
    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// 累计完成的读次数（失败的不计）。
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// 累计完成的写次数（失败的不计）。
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过块缓存直接查看磁盘上的一块，测试用。
    pub fn peek(&self, dev: u32, blockno: u32) -> Result<Vec<u8>, DiskError> {
        let (device, off) = self.locate(dev, blockno)?;
        let blocks = device.blocks.lock();
        Ok(blocks[off..off + self.bsize].to_vec())
    }

    /// 绕过块缓存直接改写磁盘上的一块，测试用。
    pub fn poke(&self, dev: u32, blockno: u32, data: &[u8]) -> Result<(), DiskError> {
        self.check_len(data.len())?;
        let (device, off) = self.locate(dev, blockno)?;
        device.blocks.lock()[off..off + self.bsize].copy_from_slice(data);
        Ok(())
    }

    /// 找到设备以及块在其中的字节偏移。
    fn locate(&self, dev: u32, blockno: u32) -> Result<(&Device, usize), DiskError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.dev == dev)
            .ok_or(DiskError::NoDevice(dev))?;
        if blockno >= self.nblocks {
            return Err(DiskError::OutOfRange { dev, blockno });
        }
        Ok((device, blockno as usize * self.bsize))
    }

    fn check_len(&self, len: usize) -> Result<(), DiskError> {
        if len != self.bsize {
            return Err(DiskError::BadLength {
                expected: self.bsize,
                actual: len,
            });
        }
        Ok(())
    }

    /// 每次传输前的公共检查：长度、故障注入与延迟。
    fn prepare(&self, dev: u32, blockno: u32, len: usize) -> Result<(&Device, usize), DiskError> {
        self.check_len(len)?;
        let located = self.locate(dev, blockno)?;
        if self.faults.lock().contains(&(dev, blockno)) {
            return Err(DiskError::Injected { dev, blockno });
        }
        let latency = self.latency_us.load(Ordering::Relaxed);
        if latency > 0 {
            thread::sleep(Duration::from_micros(latency));
        }
        Ok(located)
    }
}

impl Disk for RamDisk {
    fn read(&self, dev: u32, blockno: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let (device, off) = self.prepare(dev, blockno, buf.len())?;
        buf.copy_from_slice(&device.blocks.lock()[off..off + self.bsize]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, dev: u32, blockno: u32, buf: &[u8]) -> Result<(), DiskError> {
        let (device, off) = self.prepare(dev, blockno, buf.len())?;
        device.blocks.lock()[off..off + self.bsize].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
