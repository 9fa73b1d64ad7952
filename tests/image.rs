mod common;

use std::sync::Arc;

use xv6_bcache::consts::fs::{BSIZE, NBUF, ROOTDEV};
use xv6_bcache::{Bcache, BcacheConfig, Disk, FileDisk};

const NBLOCKS: u32 = 40;

#[test]
fn cache_over_image_file() {
    common::setup_log();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fs.img");

    let disk = Arc::new(FileDisk::create(&path, ROOTDEV, BSIZE, NBLOCKS).unwrap());
    let cache = Bcache::new(BcacheConfig::default(), Arc::clone(&disk)).unwrap();

    let mut b = cache.bread(ROOTDEV, 5).unwrap();
    assert!(b.data().iter().all(|&x| x == 0));
    b.data_mut()[..5].copy_from_slice(b"xv6fs");
    b.bwrite().unwrap();
    drop(b);

    // 读满其余的块，把块 5 挤出缓存
    for blockno in (0..NBLOCKS).filter(|&b| b != 5) {
        drop(cache.bread(ROOTDEV, blockno).unwrap());
    }
    assert!(NBLOCKS as usize - 1 > NBUF);
    assert_eq!(cache.snapshot().find(ROOTDEV, 5), None);

    let b = cache.bread(ROOTDEV, 5).unwrap();
    assert_eq!(&b.data()[..5], b"xv6fs");
    drop(b);
    disk.sync().unwrap();
    drop(cache);
    drop(disk);

    let disk = FileDisk::open(&path, ROOTDEV, BSIZE).unwrap();
    assert_eq!(disk.nblocks(), NBLOCKS);
    let mut raw = vec![0; BSIZE];
    disk.read(ROOTDEV, 5, &mut raw).unwrap();
    assert_eq!(&raw[..5], b"xv6fs");
}

#[test]
fn global_cache_over_image_file() {
    common::setup_log();
    let file = tempfile::NamedTempFile::new().unwrap();
    let disk = FileDisk::create(file.path(), ROOTDEV, BSIZE, 8).unwrap();

    let cache = xv6_bcache::binit(BcacheConfig::default().with_nbuf(4), disk).unwrap();
    assert!(std::ptr::eq(cache, xv6_bcache::bcache()));
    assert_eq!(cache.config().nbuf, 4);

    let mut b = xv6_bcache::bcache().bread(ROOTDEV, 1).unwrap();
    b.data_mut().fill(1);
    b.bwrite().unwrap();
    drop(b);
    assert_eq!(cache.stats().disk_writes, 1);
}
