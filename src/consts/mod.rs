//! 全局常量

pub mod fs;
pub mod driver;
