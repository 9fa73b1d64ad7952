//! 块缓存的几何参数

use crate::consts::fs::{BSIZE, NBUC, NBUF, SECTOR_SIZE};
use crate::error::{BioError, Result};

/// 块缓存的容量、散列桶数量与块大小。
///
/// 三者在构造 [`Bcache`](super::Bcache) 时确定，之后不再改变。
/// 桶的数量在性能上权衡锁竞争与链表扫描长度，但不影响正确性：
/// 所有地方都使用同一个 `blockno % nbuc` 取模。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcacheConfig {
    /// 缓冲块数量
    pub nbuf: usize,
    /// 散列桶数量
    pub nbuc: usize,
    /// 块大小（字节）
    pub bsize: usize,
}

impl Default for BcacheConfig {
    fn default() -> Self {
        Self::new(NBUF, NBUC, BSIZE)
    }
}

impl BcacheConfig {
    /// 以给定的缓冲块数、桶数与块大小构造，不做校验。
    pub const fn new(nbuf: usize, nbuc: usize, bsize: usize) -> Self {
        Self { nbuf, nbuc, bsize }
    }

    pub const fn with_nbuf(mut self, nbuf: usize) -> Self {
        self.nbuf = nbuf;
        self
    }

    pub const fn with_nbuc(mut self, nbuc: usize) -> Self {
        self.nbuc = nbuc;
        self
    }

    pub const fn with_bsize(mut self, bsize: usize) -> Self {
        self.bsize = bsize;
        self
    }

    /// 检查参数是否可用。
    ///
    /// # 可能的错误
    /// - 缓冲块数或桶数为 0；
    /// - 缓冲块数过大，索引与链表的空值标记冲突；
    /// - 块大小为 0 或不是扇区大小的整数倍。
    pub fn validate(&self) -> Result<()> {
        if self.nbuf == 0 {
            return Err(BioError::Config("buffer count must be positive"));
        }
        if self.nbuf >= u32::MAX as usize {
            return Err(BioError::Config("buffer count too large"));
        }
        if self.nbuc == 0 {
            return Err(BioError::Config("bucket count must be positive"));
        }
        if self.bsize == 0 || self.bsize % SECTOR_SIZE != 0 {
            return Err(BioError::Config("block size must be a positive multiple of the sector size"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_kernel_params() {
        let config = BcacheConfig::default();
        assert_eq!(config, BcacheConfig::new(30, 13, 1024));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = BcacheConfig::default().with_nbuf(8).with_nbuc(3).with_bsize(512);
        assert_eq!(config, BcacheConfig::new(8, 3, 512));
    }

    #[test]
    fn rejects_degenerate_geometry() {
        for bad in [
            BcacheConfig::new(0, 3, 512),
            BcacheConfig::new(8, 0, 512),
            BcacheConfig::new(8, 3, 0),
            BcacheConfig::new(8, 3, 1000),
        ] {
            assert!(matches!(bad.validate(), Err(BioError::Config(_))), "{:?}", bad);
        }
    }
}
