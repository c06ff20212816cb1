//! 索引节点层

use array_macro::array;

use core::cmp::min;
use core::fmt;
use core::mem;

use crate::consts::fs::{BSIZE, MAX_DIR_SIZE, MAX_FILE_BLOCKS, MAX_FILE_SIZE, NDIRECT, NINDIRECT, NINODE};
use crate::error::{FsError, Result};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::SpinLock;
use super::FileSystem;
use super::bio::BufData;
use super::block::{bm_alloc, bm_free};

/// 内存中的 inode 缓存池，维护所有活跃 inode 的元数据与内容数据。
///
/// # 结构体用途
/// `InodeCache` 统一管理所有正在使用或被引用的 inode 实例，避免重复从磁盘读取，
/// 并提供线程安全的 inode 生命周期控制机制。
///
/// - 两个数组下标一一对应：
///   - `meta` 包含设备号、inode 号、引用计数，用于判重与生命周期管理；
///   - `data` 包含实际的 `DiskInode` 内容和有效性信息，按需从磁盘加载；
///
/// 外部通过 [`Inode`] 句柄使用缓存：句柄的 `Clone` 与 `Drop` 维护引用计数，
/// `lock` 获取内容。
pub struct InodeCache {
    /// Inode 元信息数组，受自旋锁保护，用于分配、查找、释放缓存条目。
    meta: SpinLock<[InodeMeta; NINODE]>,

    /// Inode 实际内容数组，每个元素由独立的睡眠锁保护，持锁期间可能读写磁盘。
    data: [SleepLock<InodeData>; NINODE],
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            meta: SpinLock::new(array![_ => InodeMeta::new(); NINODE], "InodeMeta"),
            data: array![_ => SleepLock::new(InodeData::new(), "InodeData"); NINODE],
        }
    }

    /// 在 inode 缓存中查找指定编号的 inode，返回条目下标。
    ///
    /// # 功能说明
    /// 若已有匹配 `(dev, inum)` 且引用计数大于 0 的条目，则增加其引用计数；
    /// 否则占用第一个引用计数为 0 的条目，此时条目内容无效，
    /// 第一次 `lock` 时才从磁盘读入。
    ///
    /// # 可能的错误
    /// - 没有空闲条目时返回 [`FsError::InodeCacheFull`]。
    pub(super) fn get(&self, dev: u32, inum: u32) -> Result<usize> {
        let mut guard = self.meta.lock();

        // 在缓存中查找
        let mut empty_i: Option<usize> = None;
        for (i, imeta) in guard.iter_mut().enumerate() {
            if imeta.inum == inum && imeta.refs > 0 && imeta.dev == dev {
                imeta.refs += 1;
                return Ok(i)
            }
            if empty_i.is_none() && imeta.refs == 0 {
                empty_i = Some(i);
            }
        }

        // 未找到
        let empty_i = match empty_i {
            Some(i) => i,
            None => {
                drop(guard);
                log::warn!("inode: not enough cache entries for inode {}", inum);
                return Err(FsError::InodeCacheFull)
            }
        };
        guard[empty_i] = InodeMeta { dev, inum, refs: 1 };
        Ok(empty_i)
    }

    /// 为已被引用的条目增加一次引用
    fn dup(&self, index: usize) {
        let mut guard = self.meta.lock();
        guard[index].refs += 1;
    }

    /// `(dev, inum)` 在缓存中的引用计数
    #[cfg(test)]
    pub(crate) fn refs(&self, dev: u32, inum: u32) -> usize {
        self.meta
            .lock()
            .iter()
            .find(|m| m.refs > 0 && m.dev == dev && m.inum == inum)
            .map_or(0, |m| m.refs)
    }
}

impl Default for InodeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 表示一个活动的 inode 句柄，由 inode 缓存统一分配和管理。
///
/// `Inode` 并不直接包含 inode 的数据，而是索引缓存池中的一个条目，
/// 并通过引用计数实现共享与回收：`clone` 增加引用，`drop` 释放引用。
/// 最后一个引用释放且链接数为 0 时，inode 的内容会被截断并释放，
/// 因此这种句柄必须在事务中被丢弃，除非调用者确定它仍有链接。
///
/// 实际数据访问需通过 [`lock`](Inode::lock) 获取 [`InodeGuard`]。
pub struct Inode<'a> {
    fs: &'a FileSystem,

    dev: u32,

    inum: u32,

    /// 在 inode 缓存中的下标
    index: usize,
}

impl<'a> Inode<'a> {
    pub(super) fn new(fs: &'a FileSystem, dev: u32, inum: u32, index: usize) -> Self {
        Self { fs, dev, inum, index }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    /// 获取 inode 的睡眠锁，内容无效时从磁盘读入。
    ///
    /// # Panics
    /// 读入的磁盘 inode 类型为空时 panic：该 inode 已被释放，却仍有句柄引用它。
    pub fn lock(&self) -> Result<InodeGuard<'_, 'a>> {
        let fs: &'a FileSystem = self.fs;
        let mut data = fs.icache.data[self.index].lock();

        if data.valid.is_none() {
            let buf = fs.bcache.bread(self.dev, fs.sb.locate_inode(self.inum))?;
            data.dinode = DiskInode::decode(buf.data(), locate_inode_offset(self.inum));
            drop(buf);
            data.valid = Some((self.dev, self.inum));
            if data.dinode.itype == InodeType::Empty {
                panic!("inode: lock an empty inode {}", self.inum);
            }
        }

        Ok(InodeGuard { inode: self, data })
    }

    /// 以刚分配的磁盘 inode 填充缓存内容，与 [`DiskInode::try_alloc`] 写入磁盘的一致
    pub(super) fn fill(&self, itype: InodeType) {
        let mut data = self.fs.icache.data[self.index].lock();
        data.dinode = DiskInode::new();
        data.dinode.itype = itype;
        data.valid = Some((self.dev, self.inum));
    }

    /// 释放对 inode 的一次引用。
    ///
    /// # 流程解释
    /// 1. 若引用计数大于 1，仅减少计数；
    /// 2. 若这是最后一个引用：
    ///     - 内容无效或仍有链接时，清除有效标志并归还条目；
    ///     - 否则 inode 已无名字也无持有者：截断全部数据块，再写入空类型，
    ///       之后才归还条目。过早归还会让别的身份占用该条目，
    ///       在截断的写入完成前覆盖缓存内容。
    ///
    /// 释放途中资源耗尽时不会 panic：截断保证磁盘上不留下指向已释放块的地址，
    /// 没能释放的块与 inode 只是泄漏，记录一条警告。
    fn put(&mut self) {
        let fs: &'a FileSystem = self.fs;
        let icache = &fs.icache;
        let i = self.index;
        let mut guard = icache.meta.lock();

        if guard[i].refs > 1 {
            guard[i].refs -= 1;
            return
        }

        // 引用计数为 1，这个锁不会阻塞
        let mut data = icache.data[i].lock();
        if data.valid.is_none() || data.dinode.nlink > 0 {
            data.valid.take();
            drop(data);
            guard[i].refs -= 1;
            return
        }
        drop(guard);

        let mut idata = InodeGuard { inode: &*self, data };
        let result = idata.truncate().and_then(|_| {
            idata.data.dinode.itype = InodeType::Empty;
            idata.update()
        });
        idata.data.valid.take();
        drop(idata);

        match result {
            Ok(()) => log::debug!("inode: free inode {}", self.inum),
            Err(e) => log::warn!("inode: inode {} left allocated on disk: {}", self.inum, e),
        }
        icache.meta.lock()[i].refs -= 1;
    }
}

impl<'a> Clone for Inode<'a> {
    fn clone(&self) -> Self {
        self.fs.icache.dup(self.index);
        Self::new(self.fs, self.dev, self.inum, self.index)
    }
}

impl<'a> Drop for Inode<'a> {
    fn drop(&mut self) {
        self.put();
    }
}

impl<'a> fmt::Debug for Inode<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.dev)
            .field("inum", &self.inum)
            .field("index", &self.index)
            .finish()
    }
}

struct InodeMeta {
    dev: u32,

    inum: u32,

    /// 句柄数量，为 0 时条目可以被任意身份占用
    refs: usize,
}

impl InodeMeta {
    const fn new() -> Self {
        Self {
            dev: 0,
            inum: 0,
            refs: 0,
        }
    }
}

/// inode 缓存条目的内容：是否有效，以及磁盘 inode 的副本
#[derive(Debug)]
pub struct InodeData {
    valid: Option<(u32, u32)>,

    dinode: DiskInode,
}

impl InodeData {
    const fn new() -> Self {
        Self {
            valid: None,
            dinode: DiskInode::new(),
        }
    }
}

/// 已上锁的 inode，持有期间独占该 inode 的内容。
///
/// 所有修改 inode 内容的方法都经由日志写入，调用者必须处于事务中。
pub struct InodeGuard<'i, 'a> {
    inode: &'i Inode<'a>,
    data: SleepLockGuard<'a, InodeData>,
}

impl<'i, 'a> InodeGuard<'i, 'a> {
    #[inline]
    pub fn get_dev_inum(&self) -> (u32, u32) {
        (self.inode.dev, self.inode.inum)
    }

    #[inline]
    pub fn get_itype(&self) -> InodeType {
        self.data.dinode.itype
    }

    #[inline]
    pub fn get_devnum(&self) -> (u16, u16) {
        (self.data.dinode.major, self.data.dinode.minor)
    }

    pub(super) fn set_devnum(&mut self, major: u16, minor: u16) {
        self.data.dinode.major = major;
        self.data.dinode.minor = minor;
    }

    #[inline]
    pub fn nlink(&self) -> u16 {
        self.data.dinode.nlink
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.data.dinode.size
    }

    pub(super) fn set_nlink(&mut self, nlink: u16) {
        self.data.dinode.nlink = nlink;
    }

    #[inline]
    pub fn link(&mut self) {
        self.data.dinode.nlink += 1;
    }

    pub fn unlink(&mut self) {
        if self.data.dinode.nlink == 0 {
            panic!("inode: unlink inode {} without links", self.inode.inum);
        }
        self.data.dinode.nlink -= 1;
    }

    /// 释放 inode 的全部数据块，大小清零。
    ///
    /// # 流程解释
    /// 1. 先把大小清零并写回，此后残留的地址仍在位图中占用，不会被别人分配；
    /// 2. 直接块：清空地址并写回 inode，再释放这些块；
    /// 3. 间接块：先清空其中的地址再释放它们，最后摘下并释放间接块本身。
    ///
    /// 每个块都是先不再被引用、后在位图中释放。中途失败时文件仍然一致，
    /// 最多泄漏已摘下但未释放的块。
    pub fn truncate(&mut self) -> Result<()> {
        let fs = self.inode.fs;
        let dev = self.inode.dev;

        let size = self.data.dinode.size;
        self.data.dinode.size = 0;
        if let Err(e) = self.update() {
            self.data.dinode.size = size;
            return Err(e)
        }

        // 直接块
        let direct = self.data.dinode.addrs;
        if direct[..NDIRECT].iter().any(|&bn| bn > 0) {
            self.data.dinode.addrs[..NDIRECT].fill(0);
            if let Err(e) = self.update() {
                self.data.dinode.addrs = direct;
                return Err(e)
            }
            free_all(fs, dev, direct[..NDIRECT].iter().copied())?;
        }

        // 间接块
        let indirect = self.data.dinode.addrs[NDIRECT];
        if indirect > 0 {
            let mut buf = fs.bcache.bread(dev, indirect)?;
            let entries: Vec<u32> = (0..NINDIRECT).map(|i| block_addr(buf.data(), i)).collect();
            if entries.iter().any(|&bn| bn > 0) {
                buf.data_mut()[..NINDIRECT * 4].fill(0);
                fs.log.write(buf);
            } else {
                drop(buf);
            }
            free_all(fs, dev, entries.into_iter())?;

            self.data.dinode.addrs[NDIRECT] = 0;
            if let Err(e) = self.update() {
                self.data.dinode.addrs[NDIRECT] = indirect;
                return Err(e)
            }
            free_all(fs, dev, core::iter::once(indirect))?;
        }

        Ok(())
    }

    /// 将内存中的 inode 写回磁盘 inode 表（经由日志）
    pub fn update(&mut self) -> Result<()> {
        let fs = self.inode.fs;
        let (dev, inum) = self.get_dev_inum();

        let mut buf = fs.bcache.bread(dev, fs.sb.locate_inode(inum))?;
        self.data.dinode.encode(buf.data_mut(), locate_inode_offset(inum));
        fs.log.write(buf);
        Ok(())
    }

    /// 从 `offset` 开始读满 `dst`，范围必须完全落在文件内。
    ///
    /// 只访问块存储，不转发设备读。
    pub fn iread(&mut self, dst: &mut [u8], offset: u32) -> Result<()> {
        // 检查读取的内容是否在范围内
        let count = u32::try_from(dst.len()).map_err(|_| FsError::OutOfRange)?;
        let end = offset.checked_add(count).ok_or(FsError::OutOfRange)?;
        if end > self.data.dinode.size {
            return Err(FsError::OutOfRange)
        }

        let fs = self.inode.fs;
        let dev = self.inode.dev;
        let mut done = 0;
        let mut pos = offset as usize;
        while done < dst.len() {
            let buf = fs.bcache.bread(dev, self.map_blockno(pos / BSIZE)?)?;
            let block_offset = pos % BSIZE;
            let read_count = min(BSIZE - block_offset, dst.len() - done);
            dst[done..done + read_count].copy_from_slice(&buf.data()[block_offset..block_offset + read_count]);
            drop(buf);

            done += read_count;
            pos += read_count;
        }
        Ok(())
    }

    /// 从 `offset` 开始读取至多 `dst.len()` 个字节，返回实际读取的字节数。
    ///
    /// 读取范围被截断到文件大小，`offset` 越过文件末尾时读到 0 字节。
    /// 设备 inode 转发给按主设备号注册的设备。
    pub fn try_iread(&mut self, dst: &mut [u8], offset: u32) -> Result<usize> {
        if self.data.dinode.itype == InodeType::Device {
            let (major, minor) = self.get_devnum();
            return self.inode.fs.device(major)?.read(minor, dst)
        }

        let size = self.data.dinode.size;
        if offset > size {
            return Ok(0)
        }
        let actual_count = min(dst.len(), (size - offset) as usize);
        self.iread(&mut dst[..actual_count], offset)?;
        Ok(actual_count)
    }

    /// 将 `src` 全部写到 `offset` 处，写不完整即视为失败。
    pub fn iwrite(&mut self, src: &[u8], offset: u32) -> Result<()> {
        match self.write_blocks(src, offset)? {
            (_, Some(e)) => Err(e),
            (count, None) => {
                debug_assert_eq!(count, src.len());
                Ok(())
            }
        }
    }

    /// 将 `src` 写到 `offset` 处，返回实际写入的字节数。
    ///
    /// 中途磁盘空间耗尽时返回已写入的部分；一个字节都没写入时返回错误。
    /// 文件变大时更新大小，无论如何都会写回 inode（块地址可能已改变）。
    /// 设备 inode 转发给按主设备号注册的设备。
    ///
    /// # 可能的错误
    /// - `offset` 超过文件大小：[`FsError::OutOfRange`]；
    /// - 写入后将超过最大文件大小：[`FsError::FileTooLarge`]。
    pub fn try_iwrite(&mut self, src: &[u8], offset: u32) -> Result<usize> {
        if self.data.dinode.itype == InodeType::Device {
            let (major, minor) = self.get_devnum();
            return self.inode.fs.device(major)?.write(minor, src)
        }

        match self.write_blocks(src, offset)? {
            (0, Some(e)) if !src.is_empty() => Err(e),
            (count, _) => Ok(count),
        }
    }

    fn write_blocks(&mut self, src: &[u8], offset: u32) -> Result<(usize, Option<FsError>)> {
        // 检查写入的内容是否在范围内
        if offset > self.data.dinode.size {
            return Err(FsError::OutOfRange)
        }
        let count = u32::try_from(src.len()).map_err(|_| FsError::FileTooLarge)?;
        let end = offset.checked_add(count).ok_or(FsError::FileTooLarge)? as usize;
        if end > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge)
        }

        let fs = self.inode.fs;
        let dev = self.inode.dev;
        let mut done = 0;
        let mut pos = offset as usize;
        let mut failure = None;
        while done < src.len() {
            let mut buf = match self.map_blockno(pos / BSIZE).and_then(|bn| fs.bcache.bread(dev, bn)) {
                Ok(buf) => buf,
                Err(e) => {
                    failure = Some(e);
                    break
                }
            };
            let block_offset = pos % BSIZE;
            let write_count = min(BSIZE - block_offset, src.len() - done);
            buf.data_mut()[block_offset..block_offset + write_count].copy_from_slice(&src[done..done + write_count]);
            fs.log.write(buf);

            done += write_count;
            pos += write_count;
        }

        // pos <= MAX_FILE_SIZE <= u32::MAX
        if pos as u32 > self.data.dinode.size {
            self.data.dinode.size = pos as u32;
        }
        self.update()?;
        Ok((done, failure))
    }

    pub fn stat(&self) -> FileStat {
        let (dev, inum) = self.get_dev_inum();
        FileStat {
            dev,
            inum,
            itype: self.data.dinode.itype,
            nlink: self.data.dinode.nlink,
            size: self.data.dinode.size as u64,
        }
    }

    /// 将文件内第 `offset_bn` 块映射到磁盘块号，第一次访问时分配。
    ///
    /// 前 `NDIRECT` 块记录在 inode 中，其余经由一个间接块。
    /// 新分配的地址只修改了内存中的 inode，由调用者负责 `update`。
    ///
    /// # Panics
    /// `offset_bn` 超出间接块的范围。
    fn map_blockno(&mut self, offset_bn: usize) -> Result<u32> {
        let fs = self.inode.fs;
        let dev = self.inode.dev;
        let addrs = &mut self.data.dinode.addrs;
        if offset_bn < NDIRECT {
            // 处理直接块
            if addrs[offset_bn] == 0 {
                addrs[offset_bn] = bm_alloc(fs, dev)?;
            }
            Ok(addrs[offset_bn])
        } else if offset_bn < MAX_FILE_BLOCKS {
            // 处理间接块
            let count = offset_bn - NDIRECT;
            if addrs[NDIRECT] == 0 {
                addrs[NDIRECT] = bm_alloc(fs, dev)?;
            }
            let mut indirect_buf = fs.bcache.bread(dev, addrs[NDIRECT])?;
            let bn = block_addr(indirect_buf.data(), count);
            if bn == 0 {
                let free_bn = bm_alloc(fs, dev)?;
                set_block_addr(indirect_buf.data_mut(), count, free_bn);
                fs.log.write(indirect_buf);
                Ok(free_bn)
            } else {
                Ok(bn)
            }
        } else {
            panic!("inode: queried block {} out of range", offset_bn);
        }
    }

    fn expect_dir(&self) {
        if self.data.dinode.itype != InodeType::Directory {
            panic!("inode: inode {} is not a directory", self.inode.inum);
        }
    }

    /// 在目录中查找名为 `name` 的目录项，返回其 inode 与目录项的字节偏移。
    ///
    /// 线性扫描，跳过 inum 为 0 的空目录项；名称按固定宽度整体比较。
    ///
    /// # Panics
    /// 当前 inode 不是目录。
    pub fn dir_lookup(&mut self, name: &DirName) -> Result<Option<(Inode<'a>, u32)>> {
        self.expect_dir();
        let (dev, _) = self.get_dev_inum();

        let mut raw = [0u8; DIRENT_SIZE];
        for offset in (0..self.data.dinode.size).step_by(DIRENT_SIZE) {
            self.iread(&mut raw, offset)?;
            let dir_entry = DirEntry::decode(&raw);
            if dir_entry.inum == 0 {
                continue;
            }
            if dir_entry.name == *name {
                let inode = self.inode.fs.iget(dev, dir_entry.inum as u32)?;
                return Ok(Some((inode, offset)))
            }
        }

        Ok(None)
    }

    /// 在目录中加入目录项 `name -> inum`，写入第一个空目录项或追加到末尾。
    ///
    /// # 可能的错误
    /// - 名称已存在时返回 [`FsError::AlreadyExists`]；
    /// - 追加时目录无法再增长，返回写入的错误。
    pub fn dir_link(&mut self, name: &DirName, inum: u32) -> Result<()> {
        let inum = match u16::try_from(inum) {
            Ok(inum) => inum,
            Err(_) => panic!("inode: inum {} too large for a dir entry", inum),
        };

        // 该条目不应已存在，返回的 inode 在这里被释放
        if self.dir_lookup(name)?.is_some() {
            return Err(FsError::AlreadyExists)
        }

        // 分配一个目录条目
        let size = self.data.dinode.size;
        let mut raw = [0u8; DIRENT_SIZE];
        let mut offset = size;
        for off in (0..size).step_by(DIRENT_SIZE) {
            self.iread(&mut raw, off)?;
            if DirEntry::decode(&raw).inum == 0 {
                offset = off;
                break
            }
        }

        let raw = DirEntry { inum, name: *name }.encode();
        if offset < size {
            if let Err(e) = self.iwrite(&raw, offset) {
                panic!("inode: rewrite dir entry at {}: {}", offset, e);
            }
            Ok(())
        } else {
            self.iwrite(&raw, offset)
        }
    }

    /// 删除目录中的 `name`，对应 inode 的链接数减一。
    ///
    /// 目录项只被清零，目录文件的大小不变。被删除的是目录时，
    /// 它的 `..` 不再指向当前目录，当前目录的链接数也减一。
    ///
    /// # 可能的错误
    /// - `name` 为 `.` 或 `..`：[`FsError::InvalidName`]；
    /// - 名称不存在：[`FsError::NotFound`]；
    /// - 要删除的目录非空：[`FsError::NotEmpty`]。
    pub fn dir_unlink(&mut self, name: &DirName) -> Result<()> {
        // 名称不能是 . 和 ..
        if *name == DOT || *name == DOTDOT {
            return Err(FsError::InvalidName)
        }

        // 查找与该名称对应的条目
        let (inode, offset) = self.dir_lookup(name)?.ok_or(FsError::NotFound)?;

        // 检查该条目
        let mut idata = inode.lock()?;
        if idata.data.dinode.nlink < 1 {
            panic!("inode: entry {} has no link", inode.inum);
        }
        if idata.get_itype() == InodeType::Directory && !idata.dir_is_empty()? {
            return Err(FsError::NotEmpty)
        }

        // 清空该条目
        if let Err(e) = self.iwrite(&[0; DIRENT_SIZE], offset) {
            panic!("inode: cannot clear dir entry previously read: {}", e);
        }

        // 减少链接数
        if idata.get_itype() == InodeType::Directory {
            self.unlink();
            self.update()?;
        }
        idata.unlink();
        idata.update()
    }

    /// 目录中除 `.` 与 `..` 之外是否没有其他目录项
    pub fn dir_is_empty(&mut self) -> Result<bool> {
        self.expect_dir();
        let mut raw = [0u8; DIRENT_SIZE];
        for offset in ((2 * DIRENT_SIZE as u32)..self.data.dinode.size).step_by(DIRENT_SIZE) {
            self.iread(&mut raw, offset)?;
            if DirEntry::decode(&raw).inum != 0 {
                return Ok(false)
            }
        }

        Ok(true)
    }
}

/// 每个块中的磁盘 inode 数量
pub const IPB: usize = BSIZE / mem::size_of::<DiskInode>();

static_assertions::const_assert_eq!(mem::size_of::<DiskInode>(), 64);
static_assertions::const_assert!(MAX_FILE_SIZE <= u32::MAX as usize);

/// 第 `inum` 个 inode 在其所在块中的序号
#[inline]
pub fn locate_inode_offset(inum: u32) -> usize {
    inum as usize % IPB
}

/// 释放已经不再被引用的块，失败时剩下的块就此泄漏
fn free_all(fs: &FileSystem, dev: u32, blocknos: impl Iterator<Item = u32>) -> Result<()> {
    for bn in blocknos.filter(|&bn| bn > 0) {
        if let Err(e) = bm_free(fs, dev, bn) {
            log::warn!("inode: block {} leaked: {}", bn, e);
            return Err(e)
        }
    }
    Ok(())
}

fn block_addr(data: &BufData, i: usize) -> u32 {
    u32::from_le_bytes([data[4 * i], data[4 * i + 1], data[4 * i + 2], data[4 * i + 3]])
}

fn set_block_addr(data: &mut BufData, i: usize, bn: u32) {
    data[4 * i..4 * i + 4].copy_from_slice(&bn.to_le_bytes());
}

/// `stat` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u32,

    pub inum: u32,

    pub itype: InodeType,

    pub nlink: u16,

    pub size: u64,
}

/// 磁盘上的 inode，所有整数以小端序存放
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DiskInode {
    pub(super) itype: InodeType,

    /// 主设备号（仅设备文件）
    pub(super) major: u16,

    /// 次设备号（仅设备文件）
    pub(super) minor: u16,

    /// 指向该 inode 的目录项数量
    pub(super) nlink: u16,

    pub(super) size: u32,

    pub(super) addrs: [u32; NDIRECT + 1],
}

impl DiskInode {
    pub(super) const fn new() -> Self {
        Self {
            itype: InodeType::Empty,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        }
    }

    // 如果 [DiskInode] 是空闲的（即其类型为 [InodeType::Empty]），则清零后设置其 itype 来分配它。
    pub(super) fn try_alloc(&mut self, itype: InodeType) -> core::result::Result<(), ()> {
        if self.itype == InodeType::Empty {
            *self = Self::new();
            self.itype = itype;
            Ok(())
        } else {
            Err(())
        }
    }

    /// 从块中解析第 `index` 个磁盘 inode
    pub(super) fn decode(data: &BufData, index: usize) -> Self {
        let raw = &data[index * mem::size_of::<Self>()..(index + 1) * mem::size_of::<Self>()];
        let half = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        let mut addrs = [0; NDIRECT + 1];
        for (k, addr) in addrs.iter_mut().enumerate() {
            *addr = word(12 + 4 * k);
        }
        Self {
            itype: InodeType::from_raw(half(0)),
            major: half(2),
            minor: half(4),
            nlink: half(6),
            size: word(8),
            addrs,
        }
    }

    /// 写入块中的第 `index` 个磁盘 inode
    pub(super) fn encode(&self, data: &mut BufData, index: usize) {
        let raw = &mut data[index * mem::size_of::<Self>()..(index + 1) * mem::size_of::<Self>()];
        raw[0..2].copy_from_slice(&(self.itype as u16).to_le_bytes());
        raw[2..4].copy_from_slice(&self.major.to_le_bytes());
        raw[4..6].copy_from_slice(&self.minor.to_le_bytes());
        raw[6..8].copy_from_slice(&self.nlink.to_le_bytes());
        raw[8..12].copy_from_slice(&self.size.to_le_bytes());
        for (k, addr) in self.addrs.iter().enumerate() {
            raw[12 + 4 * k..16 + 4 * k].copy_from_slice(&addr.to_le_bytes());
        }
    }
}

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InodeType {
    Empty = 0,
    Directory = 1,
    File = 2,
    Device = 3,
}

impl InodeType {
    fn from_raw(raw: u16) -> Self {
        match raw {
            0 => InodeType::Empty,
            1 => InodeType::Directory,
            2 => InodeType::File,
            3 => InodeType::Device,
            _ => panic!("inode: corrupt type tag {}", raw),
        }
    }
}

/// 目录项中的名称，不足部分以 0 填充
pub type DirName = [u8; MAX_DIR_SIZE];

pub(super) const DOT: DirName = *b".\0\0\0\0\0\0\0\0\0\0\0\0\0";
pub(super) const DOTDOT: DirName = *b"..\0\0\0\0\0\0\0\0\0\0\0\0";

/// 将名称转换为目录项中的固定宽度形式，过长的名称被截断
pub fn dir_name(name: &[u8]) -> DirName {
    let mut buf = [0; MAX_DIR_SIZE];
    let count = min(name.len(), MAX_DIR_SIZE);
    buf[..count].copy_from_slice(&name[..count]);
    buf
}

/// 目录项在磁盘上的大小
pub(super) const DIRENT_SIZE: usize = 2 + MAX_DIR_SIZE;

static_assertions::const_assert_eq!(BSIZE % DIRENT_SIZE, 0);

pub(super) struct DirEntry {
    pub(super) inum: u16,

    pub(super) name: DirName,
}

impl DirEntry {
    pub(super) fn decode(raw: &[u8; DIRENT_SIZE]) -> Self {
        let mut name = [0; MAX_DIR_SIZE];
        name.copy_from_slice(&raw[2..]);
        Self {
            inum: u16::from_le_bytes([raw[0], raw[1]]),
            name,
        }
    }

    pub(super) fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut raw = [0; DIRENT_SIZE];
        raw[..2].copy_from_slice(&self.inum.to_le_bytes());
        raw[2..].copy_from_slice(&self.name);
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::fs::{NBUF, ROOTDEV};
    use crate::fs::test_fs;

    fn free_blocks(fs: &FileSystem) -> u32 {
        let size = fs.sb.size();
        let mut free = 0;
        for bn in 0..size {
            let buf = fs.bcache.bread(ROOTDEV, fs.sb.bitmap_blockno(bn)).unwrap();
            let off = bn % crate::consts::fs::BPB;
            if buf.data()[(off / 8) as usize] & (1 << (off % 8)) == 0 {
                free += 1;
            }
        }
        free
    }

    fn disk_type(fs: &FileSystem, inum: u32) -> InodeType {
        let buf = fs.bcache.bread(ROOTDEV, fs.sb.locate_inode(inum)).unwrap();
        DiskInode::decode(buf.data(), locate_inode_offset(inum)).itype
    }

    #[test]
    fn handles_share_one_entry() {
        let (_disk, fs) = test_fs();
        let a = fs.iget(ROOTDEV, 7).unwrap();
        let b = fs.iget(ROOTDEV, 7).unwrap();
        let c = a.clone();
        assert_eq!(fs.icache.refs(ROOTDEV, 7), 3);
        drop(a);
        drop(b);
        assert_eq!(fs.icache.refs(ROOTDEV, 7), 1);
        drop(c);
        assert_eq!(fs.icache.refs(ROOTDEV, 7), 0);
    }

    #[test]
    fn full_cache_is_an_error() {
        let (_disk, fs) = test_fs();
        let held: Vec<_> = (1..=NINODE as u32).map(|inum| fs.iget(ROOTDEV, inum).unwrap()).collect();
        assert_eq!(fs.iget(ROOTDEV, 100).unwrap_err(), FsError::InodeCacheFull);
        // 已缓存的 inode 仍可获取
        assert!(fs.iget(ROOTDEV, 1).is_ok());
        drop(held);
        assert!(fs.iget(ROOTDEV, 100).is_ok());
    }

    #[test]
    fn last_put_frees_unlinked_inode() {
        let (_disk, fs) = test_fs();
        let before = free_blocks(&fs);

        fs.begin_op();
        let inode = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
        let inum = inode.inum();
        let mut idata = inode.lock().unwrap();
        idata.iwrite(&[7; 3 * BSIZE], 0).unwrap();
        drop(idata);
        fs.end_op();
        assert_eq!(free_blocks(&fs), before - 3);

        // 还有别的引用，不释放
        let other = inode.clone();
        fs.begin_op();
        drop(inode);
        fs.end_op();
        assert_eq!(disk_type(&fs, inum), InodeType::File);
        assert_eq!(free_blocks(&fs), before - 3);

        fs.begin_op();
        drop(other);
        fs.end_op();
        assert_eq!(disk_type(&fs, inum), InodeType::Empty);
        assert_eq!(free_blocks(&fs), before);
    }

    #[test]
    fn failed_release_leaks_without_dangling_blocks() {
        let (_disk, fs) = test_fs();
        let before = free_blocks(&fs);

        fs.begin_op();
        let inode = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
        let inum = inode.inum();
        let mut idata = inode.lock().unwrap();
        idata.iwrite(&[3; 2 * BSIZE], 0).unwrap();
        drop(idata);
        fs.end_op();

        // 占满块缓存，释放时读不到 inode 块
        fs.begin_op();
        let far = fs.sb.size() - NBUF as u32;
        let held: Vec<_> = (far..fs.sb.size())
            .map(|bn| fs.bcache.bread(ROOTDEV, bn).unwrap())
            .collect();
        assert_eq!(fs.bcache.bread(ROOTDEV, 0).err(), Some(FsError::NoFreeBuffer));
        drop(inode);
        assert_eq!(fs.icache.refs(ROOTDEV, inum), 0);
        drop(held);
        fs.end_op();

        // inode 与数据块都还占用着，重新加载后内容完整
        assert_eq!(disk_type(&fs, inum), InodeType::File);
        assert_eq!(free_blocks(&fs), before - 2);
        fs.begin_op();
        let inode = fs.iget(ROOTDEV, inum).unwrap();
        let mut idata = inode.lock().unwrap();
        assert_eq!(idata.size(), 2 * BSIZE as u32);
        let mut buf = [0; 2 * BSIZE];
        idata.iread(&mut buf, 0).unwrap();
        assert!(buf.iter().all(|&b| b == 3));
        drop(idata);

        // 缓冲块充足时，再次释放成功
        drop(inode);
        fs.end_op();
        assert_eq!(disk_type(&fs, inum), InodeType::Empty);
        assert_eq!(free_blocks(&fs), before);
    }

    #[test]
    fn new_inode_dropped_unlocked_is_reclaimed() {
        let (_disk, fs) = test_fs();
        fs.begin_op();
        let inode = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
        let inum = inode.inum();
        drop(inode);
        fs.end_op();
        assert_eq!(disk_type(&fs, inum), InodeType::Empty);
        assert_eq!(fs.icache.refs(ROOTDEV, inum), 0);
    }

    #[test]
    fn linked_inode_survives_last_put() {
        let (_disk, fs) = test_fs();
        fs.begin_op();
        let inode = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
        let inum = inode.inum();
        let mut idata = inode.lock().unwrap();
        idata.set_nlink(1);
        idata.iwrite(b"keep", 0).unwrap();
        drop(idata);
        drop(inode);
        fs.end_op();

        assert_eq!(disk_type(&fs, inum), InodeType::File);
        let inode = fs.iget(ROOTDEV, inum).unwrap();
        let mut idata = inode.lock().unwrap();
        let mut back = [0; 4];
        idata.iread(&mut back, 0).unwrap();
        assert_eq!(&back, b"keep");
    }

    #[test]
    fn reads_clamp_and_writes_check_bounds() {
        let (_disk, fs) = test_fs();
        fs.begin_op();
        let inode = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
        let mut idata = inode.lock().unwrap();
        idata.set_nlink(1);
        idata.iwrite(&[1; 100], 0).unwrap();

        let mut dst = [0; 200];
        assert_eq!(idata.try_iread(&mut dst, 50).unwrap(), 50);
        assert_eq!(idata.try_iread(&mut dst, 100).unwrap(), 0);
        assert_eq!(idata.try_iread(&mut dst, 101).unwrap(), 0);
        assert_eq!(idata.iread(&mut dst, 0), Err(FsError::OutOfRange));

        assert_eq!(idata.try_iwrite(&[1], 101), Err(FsError::OutOfRange));
        assert_eq!(idata.try_iwrite(&[1; 2], (MAX_FILE_SIZE - 1) as u32), Err(FsError::OutOfRange));
        drop(idata);
        drop(inode);
        fs.end_op();
    }

    #[test]
    fn write_past_max_file_size_is_rejected() {
        let (_disk, fs) = test_fs();
        let before = free_blocks(&fs);
        fs.begin_op();
        let inode = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
        let mut idata = inode.lock().unwrap();
        idata.set_nlink(1);
        idata.update().unwrap();
        drop(idata);
        fs.end_op();

        // 每个事务最多写 3 个块，逐步写满文件
        let chunk = [0x5a; 3 * BSIZE];
        let mut offset = 0;
        while offset < MAX_FILE_SIZE {
            let n = min(chunk.len(), MAX_FILE_SIZE - offset);
            fs.begin_op();
            let mut idata = inode.lock().unwrap();
            assert_eq!(idata.try_iwrite(&chunk[..n], offset as u32).unwrap(), n);
            drop(idata);
            fs.end_op();
            offset += n;
        }

        fs.begin_op();
        let mut idata = inode.lock().unwrap();
        assert_eq!(idata.size() as usize, MAX_FILE_SIZE);
        assert_eq!(idata.try_iwrite(&[1], MAX_FILE_SIZE as u32), Err(FsError::FileTooLarge));
        idata.truncate().unwrap();
        assert_eq!(idata.size(), 0);
        assert!(idata.data.dinode.addrs.iter().all(|&bn| bn == 0));
        drop(idata);
        drop(inode);
        fs.end_op();
        // 直接块、间接块及其引用的块全部归还
        assert_eq!(free_blocks(&fs), before);
    }

    #[test]
    fn dir_link_refuses_duplicates_and_reuses_slots() {
        let (_disk, fs) = test_fs();
        let root = fs.root().unwrap();
        fs.begin_op();
        let mut dir = root.lock().unwrap();
        let size = dir.size();
        dir.dir_link(&dir_name(b"a"), 5).unwrap();
        dir.dir_link(&dir_name(b"b"), 6).unwrap();
        assert_eq!(dir.dir_link(&dir_name(b"a"), 9), Err(FsError::AlreadyExists));
        assert_eq!(dir.size(), size + 2 * DIRENT_SIZE as u32);

        // 清零 "a" 后，新名字复用它的位置
        dir.iwrite(&[0; DIRENT_SIZE], size).unwrap();
        assert!(dir.dir_lookup(&dir_name(b"a")).unwrap().is_none());
        dir.dir_link(&dir_name(b"c"), 7).unwrap();
        assert_eq!(dir.size(), size + 2 * DIRENT_SIZE as u32);
        let (c, off) = dir.dir_lookup(&dir_name(b"c")).unwrap().unwrap();
        assert_eq!((c.inum(), off), (7, size));
        drop(c);
        drop(dir);
        fs.end_op();
    }

    #[test]
    fn names_compare_over_full_width() {
        assert_eq!(dir_name(b"."), DOT);
        assert_eq!(dir_name(b".."), DOTDOT);
        assert_ne!(dir_name(b"abc"), dir_name(b"abcd"));
        // 超过 14 字节的名称被截断后比较
        assert_eq!(dir_name(b"abcdefghijklmnop"), dir_name(b"abcdefghijklmnXY"));
    }
}
