//! 设备驱动模块：块设备接口与字符设备表

use alloc::sync::Arc;

use array_macro::array;

use crate::consts::driver::NDEV;
use crate::error::Result;
use crate::fs::BufData;
use crate::spinlock::SpinLock;

mod ramdisk;
mod file_disk;

pub use ramdisk::RamDisk;
pub use file_disk::FileDisk;

/// 块设备驱动。
///
/// 读写都是同步的：调用返回时请求已经完成。同一设备上的请求由实现者串行化，
/// 文件系统只会通过块缓存访问它，不会越过缓存直接读写。
pub trait BlockDevice: Send + Sync {
    /// 设备上的总块数
    fn num_blocks(&self) -> u32;

    /// 将第 `blockno` 块读入 `data`
    fn read_block(&self, blockno: u32, data: &mut BufData) -> Result<()>;

    /// 将 `data` 写入第 `blockno` 块，返回时数据已持久化
    fn write_block(&self, blockno: u32, data: &BufData) -> Result<()>;
}

/// 字符设备，按主设备号注册到 [`Devices`] 表中。
///
/// 类型为设备的 inode 的读写不经过块存储，而是转发到这里。
pub trait Device: Send + Sync {
    fn read(&self, minor: u16, dst: &mut [u8]) -> Result<usize>;

    fn write(&self, minor: u16, src: &[u8]) -> Result<usize>;
}

/// 设备表，主设备号 -> 设备驱动
pub struct Devices {
    table: SpinLock<[Option<Arc<dyn Device>>; NDEV]>,
}

impl Devices {
    pub fn new() -> Self {
        Self {
            table: SpinLock::new(array![_ => None; NDEV], "devsw"),
        }
    }

    /// 注册主设备号 `major` 对应的驱动，返回之前注册的驱动（如果有）
    ///
    /// # Panics
    /// `major` 不小于 `NDEV` 时 panic。
    pub fn register(&self, major: u16, dev: Arc<dyn Device>) -> Option<Arc<dyn Device>> {
        let major = major as usize;
        if major >= NDEV {
            panic!("devsw: major {} out of range", major);
        }
        self.table.lock()[major].replace(dev)
    }

    /// 查找主设备号对应的驱动
    pub fn get(&self, major: u16) -> Option<Arc<dyn Device>> {
        self.table.lock().get(major as usize)?.clone()
    }
}

impl Default for Devices {
    fn default() -> Self {
        Self::new()
    }
}
