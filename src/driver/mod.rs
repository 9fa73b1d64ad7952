//! 设备驱动模块，提供块缓存所依赖的磁盘接口
//!
//! 块缓存只通过 [`Disk`] 与磁盘打交道：读写都是同步的，
//! 调用时调用者持有对应缓冲块的睡眠锁。

use std::sync::Arc;

use crate::error::DiskError;

pub mod filedisk;
pub mod ramdisk;

pub use filedisk::FileDisk;
pub use ramdisk::RamDisk;

/// 同步块设备。
///
/// `buf` 的长度总是等于块缓存配置的块大小；实现应在长度不符时返回
/// [`DiskError::BadLength`]。失败会原样交给块缓存的调用者，块缓存本身不重试。
pub trait Disk: Send + Sync {
    /// 把 `(dev, blockno)` 的内容读入 `buf`，直到整块传输完成才返回。
    fn read(&self, dev: u32, blockno: u32, buf: &mut [u8]) -> Result<(), DiskError>;

    /// 把 `buf` 写到 `(dev, blockno)`，直到整块传输完成才返回。
    fn write(&self, dev: u32, blockno: u32, buf: &[u8]) -> Result<(), DiskError>;
}

impl<D: Disk + ?Sized> Disk for Arc<D> {
    fn read(&self, dev: u32, blockno: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        (**self).read(dev, blockno, buf)
    }

    fn write(&self, dev: u32, blockno: u32, buf: &[u8]) -> Result<(), DiskError> {
        (**self).write(dev, blockno, buf)
    }
}
