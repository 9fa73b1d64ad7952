//! 磁盘镜像文件驱动
//!
//! 与 `mkfs` 生成的镜像布局一致：第 `b` 块位于字节偏移 `b * bsize` 处。
//! 一个镜像只服务一个设备号。

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::info;

use crate::error::DiskError;
use crate::sleeplock::SleepLock;
use super::Disk;

pub struct FileDisk {
    dev: u32,
    bsize: usize,
    nblocks: u32,
    /// 读写跨越真实的文件 I/O，用睡眠锁而不是自旋锁保护。
    file: SleepLock<File>,
}

impl FileDisk {
    /// 打开一个已有的镜像，块数由文件长度决定（不足一块的尾部被忽略）。
    pub fn open(path: impl AsRef<Path>, dev: u32, bsize: usize) -> Result<Self, DiskError> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        let nblocks = (len / bsize as u64) as u32;
        info!(
            "filedisk: dev {} opened {} ({} blocks of {} bytes)",
            dev,
            path.as_ref().display(),
            nblocks,
            bsize
        );
        Ok(Self {
            dev,
            bsize,
            nblocks,
            file: SleepLock::new(file, "filedisk"),
        })
    }

    /// 新建（或截断）一个 `nblocks` 块的全零镜像。
    pub fn create(
        path: impl AsRef<Path>,
        dev: u32,
        bsize: usize,
        nblocks: u32,
    ) -> Result<Self, DiskError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(nblocks as u64 * bsize as u64)?;
        info!(
            "filedisk: dev {} created {} ({} blocks of {} bytes)",
            dev,
            path.as_ref().display(),
            nblocks,
            bsize
        );
        Ok(Self {
            dev,
            bsize,
            nblocks,
            file: SleepLock::new(file, "filedisk"),
        })
    }

    /// 镜像包含的块数。
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    /// 把缓冲的写入刷到宿主文件系统。
    pub fn sync(&self) -> Result<(), DiskError> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn offset(&self, dev: u32, blockno: u32, len: usize) -> Result<u64, DiskError> {
        if dev != self.dev {
            return Err(DiskError::NoDevice(dev));
        }
        if blockno >= self.nblocks {
            return Err(DiskError::OutOfRange { dev, blockno });
        }
        if len != self.bsize {
            return Err(DiskError::BadLength {
                expected: self.bsize,
                actual: len,
            });
        }
        Ok(blockno as u64 * self.bsize as u64)
    }
}

impl Disk for FileDisk {
    fn read(&self, dev: u32, blockno: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let off = self.offset(dev, blockno, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(off))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, dev: u32, blockno: u32, buf: &[u8]) -> Result<(), DiskError> {
        let off = self.offset(dev, blockno, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(off))?;
        file.write_all(buf)?;
        Ok(())
    }
}
