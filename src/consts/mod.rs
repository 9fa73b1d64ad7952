//! 内核常量

pub mod fs;

/// 最多支持的 hart 数量，测试中用作默认并发线程数
pub const NCPU: usize = 8;
