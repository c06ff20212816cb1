//! 文件系统模块
//!
//! 自下而上分为块缓存（`bio`）、日志（`log`）、块分配（`block`）、
//! 索引节点（`inode`）与路径（`path`）几层，上面是打开文件（`file`）。
//! 所有层的状态都属于一个显式创建的 [`FileSystem`]。

use alloc::sync::Arc;

use crate::consts::fs::ROOTINUM;
use crate::driver::{BlockDevice, Device, Devices};
use crate::error::{FsError, Result};
use crate::spinlock::SpinLock;

mod file;
mod inode;
mod log;
mod bio;
mod block;
mod mkfs;
mod path;
mod superblock;

pub use bio::{Buf, BufData};
pub use inode::{dir_name, DirName, FileStat, Inode, InodeGuard, InodeType};
pub use file::{File, OpenFlags};
pub use mkfs::{mkfs, MkfsParams};
pub use superblock::SuperBlock;

use self::bio::Bcache;
use self::inode::InodeCache;
use self::log::Log;

/// 一个已挂载的文件系统。
///
/// 持有块缓存、日志、inode 缓存与设备表，替代内核中的全局单例；
/// 不同实例之间互不影响。所有 [`Inode`] 与 [`File`] 句柄都借用它。
pub struct FileSystem {
    dev: u32,
    sb: SuperBlock,
    bcache: Bcache,
    log: SpinLock<Log>,
    icache: InodeCache,
    devices: Devices,
}

impl FileSystem {
    /// 挂载设备 `dev` 上的文件系统：读取并检查超级块，必要时从日志恢复。
    ///
    /// # 可能的错误
    /// - 超级块魔数错误或布局与设备不符：[`FsError::BadSuperBlock`]；
    /// - 读盘失败：[`FsError::Io`]。
    pub fn mount(dev: u32, disk: Arc<dyn BlockDevice>) -> Result<Self> {
        let num_blocks = disk.num_blocks();
        let bcache = Bcache::new(dev, disk);
        let sb = SuperBlock::read(&bcache, dev)?;
        if sb.size() > num_blocks {
            ::log::warn!("file system: image has {} blocks but device only {}", sb.size(), num_blocks);
            return Err(FsError::BadSuperBlock)
        }

        let (logstart, nlog) = sb.read_log();
        let log = Log::init(&bcache, logstart, nlog);
        ::log::info!("file system: setup done");

        #[cfg(feature = "verbose_init_info")]
        ::log::info!(
            "file system: {} inode per block with size {}",
            inode::IPB,
            crate::consts::fs::BSIZE
        );

        Ok(Self {
            dev,
            sb,
            bcache,
            log: SpinLock::new(log, "log"),
            icache: InodeCache::new(),
            devices: Devices::new(),
        })
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    /// 开始一个文件系统操作，日志空间不足或正在提交时阻塞
    pub fn begin_op(&self) {
        self.log.begin_op();
    }

    /// 结束一个文件系统操作，最后一个结束的操作负责提交
    pub fn end_op(&self) {
        self.log.end_op(&self.bcache);
    }

    /// 根目录
    pub fn root(&self) -> Result<Inode<'_>> {
        self.iget(self.dev, ROOTINUM)
    }

    /// 获取 `(dev, inum)` 的句柄，不读盘
    pub fn iget(&self, dev: u32, inum: u32) -> Result<Inode<'_>> {
        let index = self.icache.get(dev, inum)?;
        Ok(Inode::new(self, dev, inum, index))
    }

    /// 在磁盘上分配一个类型为 `itype` 的 inode，必须在事务中调用。
    ///
    /// 新 inode 的链接数为 0：调用者在释放句柄前没有给它链接，它就会被回收。
    /// 返回的句柄已经持有有效内容，之后的 `lock` 不再读盘。
    ///
    /// # 可能的错误
    /// - inode 表已满：[`FsError::NoFreeInode`]；
    /// - inode 缓存已满：[`FsError::InodeCacheFull`]，此时磁盘 inode 被标回空闲。
    pub fn ialloc(&self, dev: u32, itype: InodeType) -> Result<Inode<'_>> {
        let inum = block::inode_alloc(self, dev, itype)?;
        let inode = match self.iget(dev, inum) {
            Ok(inode) => inode,
            Err(e) => {
                if let Err(undo) = block::inode_unalloc(self, dev, inum) {
                    ::log::warn!("file system: inode {} leaked: {}", inum, undo);
                }
                return Err(e)
            }
        };
        inode.fill(itype);
        Ok(inode)
    }

    /// 注册主设备号 `major` 的设备驱动，返回之前注册的驱动
    pub fn register_device(&self, major: u16, dev: Arc<dyn Device>) -> Option<Arc<dyn Device>> {
        self.devices.register(major, dev)
    }

    fn device(&self, major: u16) -> Result<Arc<dyn Device>> {
        self.devices.get(major).ok_or(FsError::NoDevice)
    }
}

/// 一个格式化好、已挂载的内存盘文件系统
#[cfg(test)]
pub(crate) fn test_fs() -> (Arc<crate::driver::RamDisk>, FileSystem) {
    use crate::consts::fs::{FSSIZE, ROOTDEV};
    use crate::driver::RamDisk;

    let disk = Arc::new(RamDisk::new(FSSIZE));
    mkfs(disk.as_ref(), &MkfsParams::default()).unwrap();
    let fs = FileSystem::mount(ROOTDEV, disk.clone()).unwrap();
    (disk, fs)
}
