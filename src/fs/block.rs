//! 磁盘块操作，包括位映射与索引节点

use bit_field::BitField;

use crate::consts::fs::BPB;
use crate::error::{FsError, Result};

use super::FileSystem;
use super::inode::{DiskInode, InodeType, locate_inode_offset};

/// 从位图中分配一个空闲的磁盘块，清零后返回其块号。
///
/// # 流程解释
/// 1. 按位图块迭代整个文件系统，在每个位图块中逐位查找第一个为 0 的位；
/// 2. 先读入并清零该数据块，再将位置 1，两次修改都经由日志记录；
/// 3. 所有位图块检查完仍未找到空闲块，返回 [`FsError::NoSpace`]。
///
/// 调用者必须处于事务中。
pub fn bm_alloc(fs: &FileSystem, dev: u32) -> Result<u32> {
    let total_block = fs.sb.size();
    for base in (0..total_block).step_by(BPB as usize) {
        let mut buf = fs.bcache.bread(dev, fs.sb.bitmap_blockno(base))?;
        let free = (0..BPB)
            .take_while(|offset| base + offset < total_block)
            .find(|&offset| !buf.data()[(offset / 8) as usize].get_bit((offset % 8) as usize));
        let offset = match free {
            Some(offset) => offset,
            None => continue,
        };

        // 清零空闲块，读失败时位图保持原样
        let free_bn = base + offset;
        let mut free_buf = fs.bcache.bread(dev, free_bn)?;
        free_buf.data_mut().fill(0);
        fs.log.write(free_buf);

        buf.data_mut()[(offset / 8) as usize].set_bit((offset % 8) as usize, true);
        fs.log.write(buf);
        log::debug!("bitmap: allocate block {}", free_bn);
        return Ok(free_bn)
    }

    log::warn!("bitmap: cannot alloc any free block");
    Err(FsError::NoSpace)
}

/// 释放一个磁盘块，将位图中对应的位清 0。
///
/// # Panics
/// 该块本来就空闲时 panic：重复释放说明上层的块地址已经损坏。
pub fn bm_free(fs: &FileSystem, dev: u32, blockno: u32) -> Result<()> {
    let bm_blockno = fs.sb.bitmap_blockno(blockno);
    let bm_offset = blockno % BPB;
    let index = (bm_offset / 8) as usize;
    let bit = (bm_offset % 8) as usize;
    let mut buf = fs.bcache.bread(dev, bm_blockno)?;

    let byte = &mut buf.data_mut()[index];
    if !byte.get_bit(bit) {
        panic!("bitmap: double freeing a block");
    }
    byte.set_bit(bit, false);
    fs.log.write(buf);
    Ok(())
}

/// 在磁盘 inode 表中分配一个空闲的 inode，写入类型后返回其编号。
///
/// 从编号 1 开始线性扫描，编号 0 保留不用。类型为 [`InodeType::Empty`] 的即为空闲，
/// 分配时整个磁盘 inode 被清零再写入新类型，修改经由日志记录。
///
/// # 可能的错误
/// - inode 表已满时返回 [`FsError::NoFreeInode`]。
pub fn inode_alloc(fs: &FileSystem, dev: u32, itype: InodeType) -> Result<u32> {
    let size = fs.sb.inode_size();
    for inum in 1..size {
        let blockno = fs.sb.locate_inode(inum);
        let offset = locate_inode_offset(inum);
        let mut buf = fs.bcache.bread(dev, blockno)?;
        let mut dinode = DiskInode::decode(buf.data(), offset);
        if dinode.try_alloc(itype).is_ok() {
            dinode.encode(buf.data_mut(), offset);
            fs.log.write(buf);
            return Ok(inum)
        }
    }

    log::warn!("inode: not enough inode to alloc");
    Err(FsError::NoFreeInode)
}

/// 把刚分配、尚无句柄的磁盘 inode 标回空闲
pub fn inode_unalloc(fs: &FileSystem, dev: u32, inum: u32) -> Result<()> {
    let offset = locate_inode_offset(inum);
    let mut buf = fs.bcache.bread(dev, fs.sb.locate_inode(inum))?;
    DiskInode::new().encode(buf.data_mut(), offset);
    fs.log.write(buf);
    Ok(())
}
