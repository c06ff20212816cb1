//! 以宿主机上的映像文件作为磁盘

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::consts::fs::BSIZE;
use crate::error::{FsError, Result};
use crate::fs::BufData;
use crate::spinlock::SpinLock;

use super::BlockDevice;

pub struct FileDisk {
    file: SpinLock<File>,
    num_blocks: u32,
}

impl FileDisk {
    /// 打开已有的映像文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| FsError::Io)?;
        let len = file.metadata().map_err(|_| FsError::Io)?.len();
        Ok(Self {
            file: SpinLock::new(file, "filedisk"),
            num_blocks: (len / BSIZE as u64) as u32,
        })
    }

    /// 创建（或截断）一个 `num_blocks` 块、内容全零的映像文件
    pub fn create<P: AsRef<Path>>(path: P, num_blocks: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|_| FsError::Io)?;
        file.set_len(num_blocks as u64 * BSIZE as u64).map_err(|_| FsError::Io)?;
        Ok(Self {
            file: SpinLock::new(file, "filedisk"),
            num_blocks,
        })
    }

    fn offset(&self, blockno: u32) -> Result<u64> {
        if blockno >= self.num_blocks {
            return Err(FsError::Io);
        }
        Ok(blockno as u64 * BSIZE as u64)
    }
}

impl BlockDevice for FileDisk {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read_block(&self, blockno: u32, data: &mut BufData) -> Result<()> {
        let offset = self.offset(blockno)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(|_| FsError::Io)?;
        file.read_exact(&mut data[..]).map_err(|_| FsError::Io)
    }

    fn write_block(&self, blockno: u32, data: &BufData) -> Result<()> {
        let offset = self.offset(blockno)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(|_| FsError::Io)?;
        file.write_all(&data[..]).map_err(|_| FsError::Io)?;
        file.sync_data().map_err(|_| FsError::Io)
    }
}
