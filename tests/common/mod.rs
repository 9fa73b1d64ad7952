#![allow(dead_code)]

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;
use xv6_bcache::{printf, Bcache, BcacheConfig, RamDisk};

pub const DEV: u32 = 1;
pub const BSIZE: usize = 512;
pub const NBLOCKS: u32 = 64;

pub fn setup_log() {
    // 同一个测试进程里只有第一次安装会成功
    let _ = printf::init(LevelFilter::Warn);
}

/// 以块号填充的内存盘：每块的前 4 字节是块号，其余字节是块号的低 8 位。
pub fn stamped_disk() -> Arc<RamDisk> {
    let disk = Arc::new(RamDisk::new(&[DEV], NBLOCKS, BSIZE));
    for blockno in 0..NBLOCKS {
        disk.poke(DEV, blockno, &stamp(blockno)).unwrap();
    }
    disk
}

pub fn stamp(blockno: u32) -> Vec<u8> {
    let mut data = vec![blockno as u8; BSIZE];
    data[..4].copy_from_slice(&blockno.to_le_bytes());
    data
}

pub fn cache(nbuf: usize, nbuc: usize) -> (Bcache, Arc<RamDisk>) {
    setup_log();
    let disk = stamped_disk();
    let cache = Bcache::new(BcacheConfig::new(nbuf, nbuc, BSIZE), Arc::clone(&disk)).unwrap();
    (cache, disk)
}

/// 轮询直到条件成立，超时则 panic。
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// 在限定时间内运行 `f`，超时视为死锁；`f` 中的 panic 原样传出。
pub fn within(limit: Duration, f: impl FnOnce() + Send + 'static) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    match rx.recv_timeout(limit) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => handle.join().unwrap(),
        Err(RecvTimeoutError::Timeout) => panic!("deadlock: workers still running after {:?}", limit),
    }
}
