//! xv6 风格的崩溃一致文件系统
//!
//! 在一个块设备之上提供块缓存、预写日志、inode 与目录层，
//! 以及按路径操作与打开文件的接口。调度器的睡眠/唤醒与块设备驱动
//! 在宿主机上由线程与 [`driver`] 中的实现代替。

#![allow(dead_code)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

extern crate alloc;

pub mod consts;
pub mod driver;
pub mod error;
pub mod fs;
mod process;
mod sleeplock;
mod spinlock;

pub use error::{FsError, Result};
pub use fs::{File, FileStat, FileSystem, Inode, InodeGuard, InodeType, MkfsParams, OpenFlags, mkfs};
