//! 内存盘

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::consts::fs::BSIZE;
use crate::error::{FsError, Result};
use crate::fs::BufData;
use crate::spinlock::SpinLock;

use super::BlockDevice;

/// 以内存数组作为存储的块设备，主要用于测试和 mkfs。
///
/// 记录读写请求的次数，便于观察块缓存是否命中。
pub struct RamDisk {
    image: SpinLock<Vec<u8>>,
    num_blocks: u32,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// 创建一个 `num_blocks` 块、内容全零的内存盘
    pub fn new(num_blocks: u32) -> Self {
        Self::from_image(vec![0; num_blocks as usize * BSIZE])
    }

    /// 用已有的磁盘映像创建内存盘，映像长度必须是块大小的整数倍
    pub fn from_image(image: Vec<u8>) -> Self {
        assert_eq!(image.len() % BSIZE, 0, "ramdisk: image is not block aligned");
        let num_blocks = (image.len() / BSIZE) as u32;
        Self {
            image: SpinLock::new(image, "ramdisk"),
            num_blocks,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 复制当前的磁盘映像
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.lock().clone()
    }

    /// 设备收到的读请求数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 设备收到的写请求数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn range(&self, blockno: u32) -> Result<core::ops::Range<usize>> {
        if blockno >= self.num_blocks {
            return Err(FsError::Io);
        }
        let start = blockno as usize * BSIZE;
        Ok(start..start + BSIZE)
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read_block(&self, blockno: u32, data: &mut BufData) -> Result<()> {
        let range = self.range(blockno)?;
        data.copy_from_slice(&self.image.lock()[range]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, blockno: u32, data: &BufData) -> Result<()> {
        let range = self.range(blockno)?;
        self.image.lock()[range].copy_from_slice(&data[..]);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
