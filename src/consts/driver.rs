/// 设备表（devsw）的大小，主设备号必须小于该值
pub const NDEV: usize = 10;
