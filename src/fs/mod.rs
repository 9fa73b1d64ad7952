//! 文件系统的块缓存层

mod bio;
mod bucket;
mod buf;
mod config;
mod lru;
mod stats;

pub use bio::{bcache, binit, Bcache, Buf};
pub use buf::BufFlags;
pub use config::BcacheConfig;
pub use stats::{BcacheSnapshot, BcacheStats, BufState};
