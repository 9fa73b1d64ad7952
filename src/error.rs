//! 块缓存与磁盘驱动的错误类型
//!
//! 锁使用错误（未持有睡眠锁就写回或释放）属于编程错误，直接 panic，不在这里建模。
//! 缓冲块耗尽也不是错误：调用者会睡眠等待。

use thiserror::Error;

/// 磁盘驱动返回的错误。
#[derive(Debug, Error)]
pub enum DiskError {
    /// 宿主文件读写失败。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 块号超出设备容量。
    #[error("block {blockno} out of range on device {dev}")]
    OutOfRange { dev: u32, blockno: u32 },

    /// 设备号没有对应的磁盘。
    #[error("no such device {0}")]
    NoDevice(u32),

    /// 传入的数据长度与块大小不符。
    #[error("buffer length {actual} does not match block size {expected}")]
    BadLength { expected: usize, actual: usize },

    /// 通过故障注入人为制造的失败。
    #[error("injected fault on device {dev} block {blockno}")]
    Injected { dev: u32, blockno: u32 },
}

/// 块缓存对外暴露的错误。
#[derive(Debug, Error)]
pub enum BioError {
    #[error("disk read failed for device {dev} block {blockno}")]
    Read {
        dev: u32,
        blockno: u32,
        #[source]
        source: DiskError,
    },

    #[error("disk write failed for device {dev} block {blockno}")]
    Write {
        dev: u32,
        blockno: u32,
        #[source]
        source: DiskError,
    },

    #[error("invalid buffer cache configuration: {0}")]
    Config(&'static str),
}

pub type Result<T, E = BioError> = core::result::Result<T, E>;
