//! 文件系统错误类型
//!
//! 只包含调用者可以处理的失败：资源耗尽与调用约定违例。
//! 内部不变量被破坏时直接 panic，不经过这里。

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 块设备读写失败
    Io,
    /// 超级块魔数错误或布局不合法
    BadSuperBlock,
    /// 块缓存中所有槽位都被占用或尚未提交
    NoFreeBuffer,
    /// 内存中的 inode 缓存已满
    InodeCacheFull,
    /// 磁盘上的 inode 表已满
    NoFreeInode,
    /// 没有空闲的数据块
    NoSpace,
    /// 写入将超过最大文件大小
    FileTooLarge,
    /// 偏移量越过文件末尾
    OutOfRange,
    NotFound,
    AlreadyExists,
    NotDirectory,
    IsDirectory,
    NotEmpty,
    /// 主设备号没有注册对应的设备
    NoDevice,
    /// 打开方式不允许该操作
    BadFileMode,
    /// 不能跨设备建立硬链接
    CrossDevice,
    /// 不能对 `.` 或 `..` 执行该操作
    InvalidName,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::Io => "block device i/o error",
            FsError::BadSuperBlock => "bad super block",
            FsError::NoFreeBuffer => "no free buffer in block cache",
            FsError::InodeCacheFull => "inode cache is full",
            FsError::NoFreeInode => "no free inode on disk",
            FsError::NoSpace => "no space left on device",
            FsError::FileTooLarge => "file too large",
            FsError::OutOfRange => "offset out of range",
            FsError::NotFound => "no such file or directory",
            FsError::AlreadyExists => "file exists",
            FsError::NotDirectory => "not a directory",
            FsError::IsDirectory => "is a directory",
            FsError::NotEmpty => "directory not empty",
            FsError::NoDevice => "no such device",
            FsError::BadFileMode => "bad file mode",
            FsError::CrossDevice => "cross-device link",
            FsError::InvalidName => "invalid file name",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}

pub type Result<T> = core::result::Result<T, FsError>;
