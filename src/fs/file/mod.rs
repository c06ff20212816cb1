//! 打开文件相关的操作

use core::cmp::min;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::consts::driver::NDEV;
use crate::consts::fs::{BSIZE, MAXOPBLOCKS};
use crate::error::{FsError, Result};

use super::{FileSystem, FileStat, Inode, InodeType};

bitflags! {
    /// 打开文件的方式
    pub struct OpenFlags: u32 {
        const RDONLY = 0x000;
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
        const TRUNC = 0x400;
    }
}

/// 单个事务最多写入的字节数。
///
/// 一次写入除了数据块，还可能修改 inode 块、间接块以及最多两个位图块（非对齐写入），
/// 剩下的日志预算平分给新数据块及其分配。
const WRITE_BATCH: usize = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;

/// 一个打开的文件，记录打开方式与读写偏移。
///
/// 普通文件与目录的读写经由 inode 层，设备文件转发给按主设备号注册的设备。
/// 被丢弃时在一个事务中释放 inode：这可能是文件的最后一个引用。
pub struct File<'a> {
    fs: &'a FileSystem,

    inner: FileInner<'a>,

    readable: bool,

    writable: bool,
}

impl<'a> File<'a> {
    /// 按 `flags` 打开 `path`，相对路径从 `cwd` 解析。
    ///
    /// # 功能说明
    /// - 带 `CREATE` 时不存在则创建普通文件；已存在的普通文件或设备文件直接打开；
    /// - 带 `TRUNC` 时清空普通文件；
    /// - 目录只能以只读方式打开。
    ///
    /// 自行开启并结束一个事务。
    pub fn open(fs: &'a FileSystem, path: &str, cwd: Option<&Inode<'a>>, flags: OpenFlags) -> Result<Self> {
        fs.begin_op();
        let ret = Self::open_in_op(fs, path, cwd, flags);
        fs.end_op();
        ret
    }

    fn open_in_op(fs: &'a FileSystem, path: &str, cwd: Option<&Inode<'a>>, flags: OpenFlags) -> Result<Self> {
        let inode = if flags.contains(OpenFlags::CREATE) {
            fs.create(path, cwd, InodeType::File, 0, 0)?
        } else {
            fs.namei(path, cwd)?
        };

        let mut idata = inode.lock()?;
        let readable = !flags.contains(OpenFlags::WRONLY);
        let writable = flags.intersects(OpenFlags::WRONLY | OpenFlags::RDWR);
        let inner = match idata.get_itype() {
            InodeType::Empty => panic!("file: open an empty inode"),
            InodeType::Directory => {
                if flags != OpenFlags::RDONLY {
                    return Err(FsError::IsDirectory)
                }
                drop(idata);
                FileInner::Regular(FileRegular { offset: AtomicU32::new(0), inode: Some(inode) })
            }
            InodeType::File => {
                if flags.contains(OpenFlags::TRUNC) {
                    idata.truncate()?;
                }
                drop(idata);
                FileInner::Regular(FileRegular { offset: AtomicU32::new(0), inode: Some(inode) })
            }
            InodeType::Device => {
                let (major, minor) = idata.get_devnum();
                if major as usize >= NDEV {
                    return Err(FsError::NoDevice)
                }
                drop(idata);
                FileInner::Device(FileDevice { major, minor, inode: Some(inode) })
            }
        };

        Ok(File {
            fs,
            inner,
            readable,
            writable,
        })
    }

    /// 从当前偏移读取至多 `dst.len()` 个字节，返回实际读取的字节数
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        if !self.readable {
            return Err(FsError::BadFileMode)
        }

        match self.inner {
            FileInner::Regular(ref file) => {
                let mut idata = file.inode().lock()?;
                let offset = file.offset.load(Ordering::Relaxed);
                let read_count = idata.try_iread(dst, offset)?;
                file.offset.store(offset + read_count as u32, Ordering::Relaxed);
                drop(idata);
                Ok(read_count)
            }
            FileInner::Device(ref dev) => self.fs.device(dev.major)?.read(dev.minor, dst),
        }
    }

    /// 在当前偏移写入 `src`，返回实际写入的字节数。
    ///
    /// 普通文件的写入被拆成若干个事务，每个事务不超过 `WRITE_BATCH` 字节，
    /// 因此一次大的写入不是原子的。中途失败时返回已写入的字节数；
    /// 第一批就失败时返回错误。
    pub fn write(&self, src: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(FsError::BadFileMode)
        }

        match self.inner {
            FileInner::Regular(ref file) => {
                let mut written = 0;
                while written < src.len() {
                    let write_count = min(WRITE_BATCH, src.len() - written);
                    self.fs.begin_op();
                    let ret = file.inode().lock().and_then(|mut idata| {
                        let offset = file.offset.load(Ordering::Relaxed);
                        let actual_count = idata.try_iwrite(&src[written..written + write_count], offset)?;
                        file.offset.store(offset + actual_count as u32, Ordering::Relaxed);
                        Ok(actual_count)
                    });
                    self.fs.end_op();

                    match ret {
                        Ok(actual_count) => {
                            written += actual_count;
                            if actual_count != write_count {
                                return Ok(written)
                            }
                        }
                        Err(e) if written == 0 => return Err(e),
                        Err(_) => return Ok(written),
                    }
                }
                Ok(written)
            }
            FileInner::Device(ref dev) => self.fs.device(dev.major)?.write(dev.minor, src),
        }
    }

    pub fn stat(&self) -> Result<FileStat> {
        let inode = match self.inner {
            FileInner::Regular(ref file) => file.inode(),
            FileInner::Device(ref dev) => dev.inode(),
        };
        let idata = inode.lock()?;
        Ok(idata.stat())
    }

    /// 当前读写偏移，设备文件为 0
    pub fn offset(&self) -> u32 {
        match self.inner {
            FileInner::Regular(ref file) => file.offset.load(Ordering::Relaxed),
            FileInner::Device(_) => 0,
        }
    }
}

impl<'a> Drop for File<'a> {
    fn drop(&mut self) {
        let inode = match self.inner {
            FileInner::Regular(ref mut file) => file.inode.take(),
            FileInner::Device(ref mut dev) => dev.inode.take(),
        };
        self.fs.begin_op();
        drop(inode);
        self.fs.end_op();
    }
}

enum FileInner<'a> {
    Regular(FileRegular<'a>),

    Device(FileDevice<'a>),
}

struct FileRegular<'a> {
    /// 读写偏移，只在持有 inode 锁时修改
    offset: AtomicU32,

    /// 仅在 Drop 时被取走
    inode: Option<Inode<'a>>,
}

impl<'a> FileRegular<'a> {
    fn inode(&self) -> &Inode<'a> {
        match self.inode {
            Some(ref inode) => inode,
            None => panic!("file: inode already released"),
        }
    }
}

struct FileDevice<'a> {
    major: u16,

    minor: u16,

    inode: Option<Inode<'a>>,
}

impl<'a> FileDevice<'a> {
    fn inode(&self) -> &Inode<'a> {
        match self.inode {
            Some(ref inode) => inode,
            None => panic!("file: inode already released"),
        }
    }
}
