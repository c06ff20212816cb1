//! 格式化：在块设备上写出一个只有根目录的空文件系统
//!
//! 直接写设备而不经过缓存与日志，只能用于尚未挂载的设备。

use bit_field::BitField;

use crate::consts::fs::{BPB, FSMAGIC, FSSIZE, LOGSIZE, NINODES, ROOTINUM};
use crate::driver::BlockDevice;
use crate::error::{FsError, Result};

use super::bio::BufData;
use super::inode::{DirEntry, DiskInode, InodeType, DIRENT_SIZE, DOT, DOTDOT, IPB, locate_inode_offset};
use super::superblock::{SuperBlock, SUPER_BLOCK_NO};

/// 映像的几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkfsParams {
    /// 文件系统总块数
    pub size: u32,
    /// inode 数量
    pub ninodes: u32,
    /// 日志区块数（含日志头）
    pub nlog: u32,
}

impl Default for MkfsParams {
    fn default() -> Self {
        Self {
            size: FSSIZE,
            ninodes: NINODES,
            nlog: LOGSIZE as u32,
        }
    }
}

impl MkfsParams {
    /// 按参数计算各区域的位置
    pub fn layout(&self) -> SuperBlock {
        let ninodeblocks = self.ninodes / IPB as u32 + 1;
        let nbitmap = self.size / BPB + 1;
        let nmeta = 2 + self.nlog + ninodeblocks + nbitmap;
        SuperBlock {
            magic: FSMAGIC,
            size: self.size,
            nblocks: self.size.saturating_sub(nmeta),
            ninodes: self.ninodes,
            nlog: self.nlog,
            logstart: 2,
            inodestart: 2 + self.nlog,
            bmapstart: 2 + self.nlog + ninodeblocks,
        }
    }
}

/// 在 `disk` 上创建文件系统，返回写入的超级块。
///
/// # 流程解释
/// 1. 按参数计算布局：引导块、超级块、日志、inode 表、位图，其余为数据块；
/// 2. 将前 `size` 块全部清零；
/// 3. 写入超级块；
/// 4. 分配第一个数据块作为根目录的内容，写入 `.` 与 `..`（都指向根目录）；
/// 5. 在位图中标记所有元数据块与根目录的数据块为已用。
///
/// # 可能的错误
/// - 设备容量不足或布局不合法：[`FsError::NoSpace`] / [`FsError::BadSuperBlock`]；
/// - 设备写失败：[`FsError::Io`]。
pub fn mkfs(disk: &dyn BlockDevice, params: &MkfsParams) -> Result<SuperBlock> {
    let sb = params.layout();
    let nmeta = sb.size - sb.nblocks;
    if params.size > disk.num_blocks() || sb.nblocks == 0 {
        log::warn!("mkfs: {} blocks do not fit a file system on a {} block device", params.size, disk.num_blocks());
        return Err(FsError::NoSpace)
    }
    if params.ninodes > u16::MAX as u32 + 1 {
        log::warn!("mkfs: {} inodes cannot be named by a dir entry", params.ninodes);
        return Err(FsError::BadSuperBlock)
    }
    sb.check()?;

    let zeroes = BufData::new();
    for bn in 0..sb.size {
        disk.write_block(bn, &zeroes)?;
    }

    let mut buf = BufData::new();
    sb.encode(&mut buf);
    disk.write_block(SUPER_BLOCK_NO, &buf)?;

    // 根目录
    let root_block = nmeta;
    let mut dir = BufData::new();
    for (i, name) in [DOT, DOTDOT].iter().enumerate() {
        let raw = DirEntry { inum: ROOTINUM as u16, name: *name }.encode();
        dir[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE].copy_from_slice(&raw);
    }
    disk.write_block(root_block, &dir)?;

    let mut root = DiskInode::new();
    root.itype = InodeType::Directory;
    root.nlink = 1;
    root.size = 2 * DIRENT_SIZE as u32;
    root.addrs[0] = root_block;
    let mut buf = BufData::new();
    root.encode(&mut buf, locate_inode_offset(ROOTINUM));
    disk.write_block(sb.locate_inode(ROOTINUM), &buf)?;

    // 位图：元数据块与根目录的数据块
    let used = root_block + 1;
    for base in (0..used).step_by(BPB as usize) {
        let mut buf = BufData::new();
        for bn in base..core::cmp::min(base + BPB, used) {
            let offset = bn - base;
            buf[(offset / 8) as usize].set_bit((offset % 8) as usize, true);
        }
        disk.write_block(sb.bitmap_blockno(base), &buf)?;
    }

    log::info!(
        "mkfs: nmeta {} (boot, super, log blocks {} inode blocks {}, bitmap blocks {}) blocks {} total {}",
        nmeta,
        sb.nlog,
        sb.bmapstart - sb.inodestart,
        nmeta - sb.bmapstart,
        sb.nblocks,
        sb.size
    );
    Ok(sb)
}
