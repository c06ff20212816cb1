//! 路径解析，以及按路径创建、链接、删除文件

use crate::consts::fs::MAX_DIR_SIZE;
use crate::error::{FsError, Result};

use super::FileSystem;
use super::inode::{DirName, Inode, InodeType, DOT, DOTDOT};

impl FileSystem {
    /// 路径解析的核心，为 `namei` 和 `namei_parent` 提供通用的遍历逻辑。
    ///
    /// # 流程解释
    /// 1. 绝对路径从根目录出发，相对路径从 `cwd` 出发（没有 `cwd` 时从根目录出发）；
    /// 2. 利用 `skip_path` 逐级取出路径分量写入 `name`；
    /// 3. 每一步锁住当前 inode，要求它是目录，查找下一级后解锁并释放当前 inode；
    /// 4. 若查找父目录，则在最后一个分量处提前返回当前目录，不消耗最后一个分量。
    ///
    /// 途中获得的每个 inode 都是局部句柄，任何一条失败路径上都会恰好释放一次。
    ///
    /// # 可能的错误
    /// - 路径中没有任何分量（空串或全是 `/`）：[`FsError::NotFound`]；
    /// - 中间某一级不是目录：[`FsError::NotDirectory`]；
    /// - 某一级目录项不存在：[`FsError::NotFound`]。
    fn namex<'a>(
        &'a self,
        path: &str,
        cwd: Option<&Inode<'a>>,
        name: &mut DirName,
        is_parent: bool,
    ) -> Result<Inode<'a>> {
        let path = path.as_bytes();
        let mut cur = match skip_path(path, 0, name) {
            Some(cur) => cur,
            None => {
                if is_parent {
                    log::warn!("namex: querying root inode's parent");
                }
                return Err(FsError::NotFound)
            }
        };

        let mut inode = match cwd {
            Some(cwd) if path[0] != b'/' => cwd.clone(),
            _ => self.root()?,
        };

        loop {
            let mut data_guard = inode.lock()?;
            if data_guard.get_itype() != InodeType::Directory {
                return Err(FsError::NotDirectory)
            }
            if is_parent && cur == path.len() {
                drop(data_guard);
                return Ok(inode)
            }
            let next = match data_guard.dir_lookup(name)? {
                Some((next, _)) => next,
                None => return Err(FsError::NotFound),
            };
            drop(data_guard);
            inode = next;

            cur = match skip_path(path, cur, name) {
                Some(cur) => cur,
                None => return Ok(inode),
            };
        }
    }

    /// 解析路径，返回其末尾对应的 inode。
    ///
    /// 只读取目录，本身不修改磁盘；但返回的句柄被丢弃时可能释放 inode，
    /// 所以在可能与删除并发时应处于事务中。
    pub fn namei<'a>(&'a self, path: &str, cwd: Option<&Inode<'a>>) -> Result<Inode<'a>> {
        let mut name: DirName = [0; MAX_DIR_SIZE];
        self.namex(path, cwd, &mut name, false)
    }

    /// 与 `namei` 相同，但返回父目录的 inode 以及路径的最后一个分量
    pub fn namei_parent<'a>(&'a self, path: &str, cwd: Option<&Inode<'a>>) -> Result<(Inode<'a>, DirName)> {
        let mut name: DirName = [0; MAX_DIR_SIZE];
        let parent = self.namex(path, cwd, &mut name, true)?;
        Ok((parent, name))
    }

    /// 在给定路径上创建一个新的 inode。
    ///
    /// # 功能说明
    /// 若路径已存在：创建普通文件且已有的是普通文件或设备时返回已有的 inode，
    /// 否则返回 [`FsError::AlreadyExists`]。
    /// 若不存在，则分配新 inode，链接数置 1；新目录还要写入 `.` 和 `..`，
    /// 父目录因 `..` 多一个链接。
    ///
    /// 分配之后的任何失败都会把新 inode 的链接数置 0，
    /// 句柄释放时它随之被回收。必须在事务中调用。
    pub fn create<'a>(
        &'a self,
        path: &str,
        cwd: Option<&Inode<'a>>,
        itype: InodeType,
        major: u16,
        minor: u16,
    ) -> Result<Inode<'a>> {
        let (dir_inode, name) = self.namei_parent(path, cwd)?;
        let mut dir_idata = dir_inode.lock()?;

        // 先查找
        let existing = dir_idata.dir_lookup(&name)?;
        if let Some((inode, _)) = existing {
            drop(dir_idata);
            let idata = inode.lock()?;
            let found = idata.get_itype();
            drop(idata);
            if itype == InodeType::File && (found == InodeType::File || found == InodeType::Device) {
                return Ok(inode)
            }
            return Err(FsError::AlreadyExists)
        }

        // 未找到，创建
        let (dev, dir_inum) = dir_idata.get_dev_inum();
        let inode = self.ialloc(dev, itype)?;
        let mut idata = inode.lock()?;
        idata.set_devnum(major, minor);
        idata.set_nlink(1);

        let linked = idata.update().and_then(|_| {
            if itype == InodeType::Directory {
                // . -> 自身，.. -> 父目录
                idata.dir_link(&DOT, inode.inum())?;
                idata.dir_link(&DOTDOT, dir_inum)?;
            }
            dir_idata.dir_link(&name, inode.inum())
        });
        if let Err(e) = linked {
            // 内存中的链接数为 0，句柄释放时回收 inode
            idata.set_nlink(0);
            if let Err(undo) = idata.update() {
                log::warn!("path: inode {} keeps a stale link count: {}", inode.inum(), undo);
            }
            return Err(e)
        }

        if itype == InodeType::Directory {
            dir_idata.link();
            dir_idata.update()?;
        }

        drop(idata);
        drop(dir_idata);
        Ok(inode)
    }

    /// 创建目录，必须在事务中调用
    pub fn mkdir<'a>(&'a self, path: &str, cwd: Option<&Inode<'a>>) -> Result<()> {
        self.create(path, cwd, InodeType::Directory, 0, 0).map(drop)
    }

    /// 创建设备文件，必须在事务中调用
    pub fn mknod<'a>(&'a self, path: &str, cwd: Option<&Inode<'a>>, major: u16, minor: u16) -> Result<()> {
        self.create(path, cwd, InodeType::Device, major, minor).map(drop)
    }

    /// 为 `old` 建立新的名字 `new`（硬链接），必须在事务中调用。
    ///
    /// # 可能的错误
    /// - `old` 是目录：[`FsError::IsDirectory`]；
    /// - `new` 的父目录与 `old` 不在同一设备：[`FsError::CrossDevice`]；
    /// - `new` 已存在：[`FsError::AlreadyExists`]。
    ///
    /// 链接失败时回滚 `old` 的链接数。
    pub fn link<'a>(&'a self, old: &str, new: &str, cwd: Option<&Inode<'a>>) -> Result<()> {
        let inode = self.namei(old, cwd)?;
        let mut idata = inode.lock()?;
        if idata.get_itype() == InodeType::Directory {
            return Err(FsError::IsDirectory)
        }
        idata.link();
        idata.update()?;
        drop(idata);

        let linked = self.namei_parent(new, cwd).and_then(|(dir_inode, name)| {
            let mut dir_idata = dir_inode.lock()?;
            if dir_inode.dev() != inode.dev() {
                return Err(FsError::CrossDevice)
            }
            dir_idata.dir_link(&name, inode.inum())
        });

        if let Err(e) = linked {
            // 仍持有引用，内容有效，这里的加锁不会读盘
            let undo = inode.lock().and_then(|mut idata| {
                idata.unlink();
                idata.update()
            });
            if let Err(undo) = undo {
                log::warn!("path: link count of inode {} not rolled back: {}", inode.inum(), undo);
            }
            return Err(e)
        }
        Ok(())
    }

    /// 删除路径对应的目录项，必须在事务中调用。
    ///
    /// 拒绝 `.` 与 `..` 以及非空目录，细节见 [`InodeGuard::dir_unlink`]。
    ///
    /// [`InodeGuard::dir_unlink`]: super::InodeGuard::dir_unlink
    pub fn unlink<'a>(&'a self, path: &str, cwd: Option<&Inode<'a>>) -> Result<()> {
        let (dir_inode, name) = self.namei_parent(path, cwd)?;
        let mut dir_idata = dir_inode.lock()?;
        dir_idata.dir_unlink(&name)
    }
}

/// 跳过路径中的一个路径分量，并将其拷贝到 `name` 中。
///
/// 从 `cur` 开始跳过前导的 `/`，取出下一个分量（过长则截断为 `MAX_DIR_SIZE` 字节，
/// 不足部分以 0 填充），再跳过其后的 `/`，返回下一个未处理字符的位置。
/// 没有更多分量时返回 `None`，`name` 保持不变。
fn skip_path(path: &[u8], mut cur: usize, name: &mut DirName) -> Option<usize> {
    // 跳过前面的 b'/'
    while cur < path.len() && path[cur] == b'/' {
        cur += 1;
    }
    if cur == path.len() {
        return None
    }

    let start = cur;
    while cur < path.len() && path[cur] != b'/' {
        cur += 1;
    }
    *name = super::inode::dir_name(&path[start..cur]);

    // 跳过后续的 b'/'
    while cur < path.len() && path[cur] == b'/' {
        cur += 1;
    }
    Some(cur)
}
