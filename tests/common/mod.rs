//! 集成测试共用的工具
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use xv6_fs::consts::fs::{BSIZE, FSSIZE, ROOTDEV};
use xv6_fs::driver::{BlockDevice, RamDisk};
use xv6_fs::fs::BufData;
use xv6_fs::{mkfs, FileSystem, FsError, Inode, InodeType, MkfsParams};

/// 按默认参数格式化好的内存盘
pub fn formatted_disk() -> Arc<RamDisk> {
    let disk = Arc::new(RamDisk::new(FSSIZE));
    mkfs(disk.as_ref(), &MkfsParams::default()).unwrap();
    disk
}

pub fn mount(disk: Arc<dyn BlockDevice>) -> FileSystem {
    FileSystem::mount(ROOTDEV, disk).unwrap()
}

/// 挂载 `image` 的副本，相当于带着这块盘重启
pub fn reboot(image: Vec<u8>) -> (Arc<RamDisk>, FileSystem) {
    let disk = Arc::new(RamDisk::from_image(image));
    let fs = mount(disk.clone());
    (disk, fs)
}

/// 创建普通文件 `path` 并写入 `data`，按需拆成多个事务
pub fn write_file(fs: &FileSystem, path: &str, data: &[u8]) {
    fs.begin_op();
    let inode = fs.create(path, None, InodeType::File, 0, 0).unwrap();
    fs.end_op();
    write_at(fs, &inode, 0, data);
    fs.begin_op();
    drop(inode);
    fs.end_op();
}

/// 从 `offset` 写入 `data`，每个事务最多三个块
pub fn write_at(fs: &FileSystem, inode: &Inode<'_>, offset: u32, data: &[u8]) {
    for (i, chunk) in data.chunks(3 * BSIZE).enumerate() {
        fs.begin_op();
        let mut idata = inode.lock().unwrap();
        idata.iwrite(chunk, offset + (i * 3 * BSIZE) as u32).unwrap();
        drop(idata);
        fs.end_op();
    }
}

pub fn read_file(fs: &FileSystem, path: &str) -> Result<Vec<u8>, FsError> {
    let inode = fs.namei(path, None)?;
    let mut idata = inode.lock()?;
    let mut data = vec![0; idata.size() as usize];
    idata.iread(&mut data, 0)?;
    Ok(data)
}

/// 每块内容都不同的数据，块写错位置时能被发现
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed ^ (i / BSIZE) as u8).collect()
}

/// 提交在何处中断
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrashPoint {
    /// 日志块已写入，日志头未写
    BeforeHeader,
    /// 日志头已写入，尚未安装
    AfterHeader,
    /// 已全部安装，日志头未清除
    BeforeClear,
}

/// 在下一次提交的指定位置之后丢弃所有写入的内存盘。
///
/// 调用 [`arm`](CrashDisk::arm) 之前行为与普通内存盘相同。崩溃后文件系统仍在缓存上运行，
/// 只是磁盘镜像不再变化。
pub struct CrashDisk {
    inner: RamDisk,
    logstart: u32,
    point: CrashPoint,
    armed: AtomicBool,
    crashed: AtomicBool,
}

impl CrashDisk {
    pub fn new(image: Vec<u8>, logstart: u32, point: CrashPoint) -> Self {
        Self {
            inner: RamDisk::from_image(image),
            logstart,
            point,
            armed: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.snapshot()
    }

    fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }
}

impl BlockDevice for CrashDisk {
    fn num_blocks(&self) -> u32 {
        self.inner.num_blocks()
    }

    fn read_block(&self, blockno: u32, data: &mut BufData) -> xv6_fs::Result<()> {
        self.inner.read_block(blockno, data)
    }

    fn write_block(&self, blockno: u32, data: &BufData) -> xv6_fs::Result<()> {
        if self.crashed() {
            return Ok(())
        }
        if self.armed.load(Ordering::SeqCst) && blockno == self.logstart {
            let committing = data[..4] != [0; 4];
            match (self.point, committing) {
                (CrashPoint::BeforeHeader, true) => {
                    self.crash();
                    return Ok(())
                }
                (CrashPoint::AfterHeader, true) => {
                    self.inner.write_block(blockno, data)?;
                    self.crash();
                    return Ok(())
                }
                (CrashPoint::BeforeClear, false) => {
                    self.crash();
                    return Ok(())
                }
                _ => {}
            }
        }
        self.inner.write_block(blockno, data)
    }
}
