//! 文件系统常量，与 mkfs 共享，决定磁盘格式

use core::mem;

/// 块大小
pub const BSIZE: usize = 512;

/// 超级块魔数
pub const FSMAGIC: u32 = 0x10203040;

/// 根磁盘的设备号
pub const ROOTDEV: u32 = 1;

/// 根目录的 inode 编号
pub const ROOTINUM: u32 = 1;

/// 每个 inode 中直接块地址的数量
pub const NDIRECT: usize = 12;

/// 间接块中块地址的数量
pub const NINDIRECT: usize = BSIZE / mem::size_of::<u32>();

/// 单个文件最多占用的数据块数
pub const MAX_FILE_BLOCKS: usize = NDIRECT + NINDIRECT;

/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BSIZE;

/// 目录项中名称的固定宽度
pub const MAX_DIR_SIZE: usize = 14;

/// 单个文件系统操作最多写入的块数
pub const MAXOPBLOCKS: usize = 10;

/// 日志区的块数（含日志头）
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// 块缓存的槽位数
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// 内存中 inode 缓存的条目数
pub const NINODE: usize = 50;

/// 每个位图块包含的位数
pub const BPB: u32 = (BSIZE * 8) as u32;

/// mkfs 默认的文件系统总块数
pub const FSSIZE: u32 = 1000;

/// mkfs 默认的 inode 数量
pub const NINODES: u32 = 200;
