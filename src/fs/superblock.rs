//! 超级块操作

use crate::consts::fs::{BPB, BSIZE, FSMAGIC, MAXOPBLOCKS};
use crate::error::{FsError, Result};
use super::bio::{Bcache, BufData};
use super::inode::IPB;

/// 超级块在磁盘上的块号
pub const SUPER_BLOCK_NO: u32 = 1;

/// 内存中的超级块，挂载时读入一次，此后只读。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,      // 文件系统魔数，必须为`FSMAGIC`
    pub size: u32,       // 文件系统映像总块数
    pub nblocks: u32,    // 数据块数量（不含元数据）
    pub ninodes: u32,    // 索引节点总数
    pub nlog: u32,       // 日志块数量
    pub logstart: u32,   // 第一个日志块的块号
    pub inodestart: u32, // 第一个索引节点块的块号
    pub bmapstart: u32,  // 第一个位图块的块号
}

static_assertions::const_assert!(8 * 4 <= BSIZE);

impl SuperBlock {
    /// 从块缓存读入超级块并检查其合法性
    pub fn read(bcache: &Bcache, dev: u32) -> Result<Self> {
        let buf = bcache.bread(dev, SUPER_BLOCK_NO)?;
        let sb = Self::decode(buf.data());
        drop(buf);

        if sb.magic != FSMAGIC {
            log::warn!("superblock: invalid file system magic {:#x}", sb.magic);
            return Err(FsError::BadSuperBlock);
        }
        sb.check()?;

        #[cfg(feature = "verbose_init_info")]
        log::info!("superblock: {:?}", sb);

        Ok(sb)
    }

    /// 检查各区域的位置与大小是否自洽
    pub(super) fn check(&self) -> Result<()> {
        let inode_blocks = self.ninodes / IPB as u32 + 1;
        let bmap_blocks = self.size / BPB + 1;
        let ok = self.nlog as usize > MAXOPBLOCKS
            && self.logstart >= 2
            && self.inodestart >= self.logstart + self.nlog
            && self.bmapstart >= self.inodestart + inode_blocks
            && self.bmapstart + bmap_blocks <= self.size
            && self.nblocks <= self.size;
        if ok {
            Ok(())
        } else {
            log::warn!("superblock: inconsistent layout {:?}", self);
            Err(FsError::BadSuperBlock)
        }
    }

    pub fn decode(data: &BufData) -> Self {
        let word = |i: usize| u32::from_le_bytes([data[4 * i], data[4 * i + 1], data[4 * i + 2], data[4 * i + 3]]);
        Self {
            magic: word(0),
            size: word(1),
            nblocks: word(2),
            ninodes: word(3),
            nlog: word(4),
            logstart: word(5),
            inodestart: word(6),
            bmapstart: word(7),
        }
    }

    pub fn encode(&self, data: &mut BufData) {
        let words = [
            self.magic, self.size, self.nblocks, self.ninodes,
            self.nlog, self.logstart, self.inodestart, self.bmapstart,
        ];
        for (i, w) in words.iter().enumerate() {
            data[4 * i..4 * i + 4].copy_from_slice(&w.to_le_bytes());
        }
    }

    pub fn read_log(&self) -> (u32, u32) {
        (self.logstart, self.nlog)
    }

    /// 返回第 `inum` 个 inode 所在的块号
    pub fn locate_inode(&self, inum: u32) -> u32 {
        if inum >= self.ninodes {
            panic!("query inum {} larger than maximum inode nums {}", inum, self.ninodes);
        }
        (inum / (IPB as u32)) + self.inodestart
    }

    pub fn inode_size(&self) -> u32 {
        self.ninodes
    }

    /// 返回记录第 `blockno` 块空闲状态的位图块号
    pub fn bitmap_blockno(&self, blockno: u32) -> u32 {
        (blockno / BPB) + self.bmapstart
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}
