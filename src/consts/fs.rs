//! 文件系统与块缓存相关常量（对应 xv6 的 `param.h` / `fs.h`）

/// 单个文件系统操作最多写入的块数
pub const MAXOPBLOCKS: usize = 10;

/// 块缓存中的缓冲块数量
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// 块缓存散列桶的数量，取素数以分散连续块号
pub const NBUC: usize = 13;

/// 块大小（字节）
pub const BSIZE: usize = 1024;

/// 磁盘扇区大小，块大小必须是它的整数倍
pub const SECTOR_SIZE: usize = 512;

/// 根文件系统所在的设备号
pub const ROOTDEV: u32 = 1;
