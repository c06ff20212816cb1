//! 缓存层

use alloc::sync::Arc;

use array_macro::array;

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::consts::fs::{BSIZE, NBUF};
use crate::driver::BlockDevice;
use crate::error::{FsError, Result};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::SpinLock;

/// 缓冲区缓存（Buffer Cache），块设备与文件系统之间的缓冲层。
///
/// `Bcache` 提供了一个固定大小的缓冲区池，用于缓存磁盘块数据，
/// 以减少重复的磁盘访问。它结合 LRU（最近最少使用）替换策略维护块缓冲的使用顺序，
/// 通过自旋锁保护元信息，通过睡眠锁保证同一块在任一时刻最多只有一个持有者。
///
/// 上层对块内容的持久修改只能经由日志（[`Log::write`]）完成，
/// 缓存本身只在日志提交时被写回。
///
/// [`Log::write`]: super::log::Log
pub struct Bcache {
    /// 缓存所服务的设备号
    dev: u32,

    /// 底层块设备驱动
    disk: Arc<dyn BlockDevice>,

    /// 控制 LRU 缓存元信息的自旋锁。
    ///
    /// 该字段保护 `BufLru`：块号与设备号、引用计数、脏标志以及 LRU 链表。
    ctrl: SpinLock<BufLru>,

    /// 缓冲块数组，长度为固定值 `NBUF`，下标与 `BufLru` 中的控制块一一对应。
    bufs: [BufInner; NBUF],
}

impl Bcache {
    pub fn new(dev: u32, disk: Arc<dyn BlockDevice>) -> Self {
        Self {
            dev,
            disk,
            ctrl: SpinLock::new(BufLru::new(), "BufLru"),
            bufs: array![_ => BufInner::new(); NBUF],
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// 获取指定设备与块号对应的缓冲块，返回时调用者已独占该块。
    ///
    /// # 流程解释
    /// - 锁住 `BufLru`，查找是否已有缓存块命中；命中则增加引用计数；
    /// - 未命中则从 LRU 尾部回收一个既未被引用、也不脏的块，
    ///   重置其 `valid` 标志并换上新的 `(dev, blockno)`；
    /// - 释放自旋锁后再获取该块的睡眠锁。若另一持有者正占用该块，当前线程在此睡眠，
    ///   被唤醒后重新检查。引用计数包含了等待者，因此等待期间该块不会被回收。
    ///
    /// 该函数不涉及磁盘读写，调用者需通过 `valid` 判断是否需要从磁盘加载数据。
    ///
    /// # 可能的错误
    /// - 所有缓冲块都在使用中或尚未提交时返回 [`FsError::NoFreeBuffer`]。
    pub fn bget(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        if dev != self.dev {
            panic!("bcache: device {} is not attached (attached: {})", dev, self.dev);
        }

        let mut ctrl = self.ctrl.lock();
        let index = match ctrl.find_cached(dev, blockno) {
            Some(index) => index,
            None => match ctrl.recycle(dev, blockno) {
                Some(index) => {
                    self.bufs[index].valid.store(false, Ordering::Relaxed);
                    index
                }
                None => {
                    drop(ctrl);
                    log::warn!("bcache: no usable buffer for block {}", blockno);
                    return Err(FsError::NoFreeBuffer);
                }
            },
        };
        drop(ctrl);

        Ok(Buf {
            bcache: self,
            index,
            dev,
            blockno,
            data: Some(self.bufs[index].data.lock()),
        })
    }

    /// 读取指定块，块内容尚未加载时先从磁盘读入。
    ///
    /// 第一次访问某个块需要付出一次磁盘读，此后命中缓存不再访问磁盘。
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        let mut b = self.bget(dev, blockno)?;
        if !self.bufs[b.index].valid.load(Ordering::Relaxed) {
            self.disk.read_block(blockno, b.data_mut())?;
            self.bufs[b.index].valid.store(true, Ordering::Relaxed);
        }
        Ok(b)
    }

    /// 释放缓冲块的引用，引用计数归零时将其移到 LRU 首部。
    fn brelse(&self, index: usize) {
        self.ctrl.lock().move_if_no_ref(index);
    }

    /// 将块标记为脏，在提交前不会被回收
    fn pin(&self, index: usize) {
        self.ctrl.lock().inner[index].dirty = true;
    }

    /// 清除脏标志，块已经写回原位置
    fn unpin(&self, index: usize) {
        let mut ctrl = self.ctrl.lock();
        if !ctrl.inner[index].dirty {
            panic!("bcache: unpin a clean buffer");
        }
        ctrl.inner[index].dirty = false;
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        let ctrl = self.ctrl.lock();
        ctrl.inner.iter().enumerate().any(|(i, b)| {
            b.dev == dev && b.blockno == blockno && self.bufs[i].valid.load(Ordering::Relaxed)
        })
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self, dev: u32, blockno: u32) -> bool {
        let ctrl = self.ctrl.lock();
        ctrl.inner.iter().any(|b| b.dev == dev && b.blockno == blockno && b.dirty)
    }
}

/// 一个已被独占的缓冲块。
///
/// 由 `bread` / `bget` 创建，持有该块的睡眠锁；
/// 生命周期结束时释放睡眠锁、唤醒等待者并更新 LRU 状态。释放之后不能再访问该块。
pub struct Buf<'a> {
    bcache: &'a Bcache,

    /// 缓冲块在缓存数组中的下标
    index: usize,

    dev: u32,

    blockno: u32,

    /// 在 `Buf` 生命周期内始终为 `Some`，
    /// Drop 时先取出它释放睡眠锁，再更新 LRU。
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> Buf<'a> {
    pub fn read_blockno(&self) -> u32 {
        self.blockno
    }

    pub fn read_dev(&self) -> u32 {
        self.dev
    }

    /// 直接写回磁盘，只有日志层会调用
    pub(super) fn bwrite(&mut self) -> Result<()> {
        let data = self.data.as_ref().expect("buf: data guard taken");
        self.bcache.disk.write_block(self.blockno, data)
    }

    pub fn data(&self) -> &BufData {
        self.data.as_ref().expect("buf: data guard taken")
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        self.data.as_mut().expect("buf: data guard taken")
    }

    /// 钉住该块：在日志提交之前它不会被 LRU 回收
    pub(super) fn pin(&self) {
        self.bcache.pin(self.index);
    }

    /// 解除钉住，与 `pin` 配对使用
    pub(super) fn unpin(&self) {
        self.bcache.unpin(self.index);
    }
}

impl<'a> Drop for Buf<'a> {
    fn drop(&mut self) {
        drop(self.data.take());
        self.bcache.brelse(self.index);
    }
}

/// 缓冲区缓存的 LRU 控制结构。
///
/// 用下标构成的双向链表维护使用顺序：`head` 是最近释放的块，`tail` 是最久未用的块。
struct BufLru {
    inner: [BufCtrl; NBUF],
    head: Option<usize>,
    tail: Option<usize>,
}

impl BufLru {
    fn new() -> Self {
        Self {
            inner: array![i => BufCtrl::new(i); NBUF],
            head: Some(0),
            tail: Some(NBUF - 1),
        }
    }

    /// 从头部开始查找 `(dev, blockno)`，命中则增加引用计数并返回下标。
    fn find_cached(&mut self, dev: u32, blockno: u32) -> Option<usize> {
        let mut b = self.head;
        while let Some(i) = b {
            let bref = &mut self.inner[i];
            if bref.dev == dev && bref.blockno == blockno {
                bref.refcnt += 1;
                return Some(i);
            }
            b = bref.next;
        }
        None
    }

    /// 从尾部开始寻找一个既未被引用、也不脏的块，换上新的身份。
    ///
    /// 脏块属于尚未提交的事务，回收它会丢失修改。
    fn recycle(&mut self, dev: u32, blockno: u32) -> Option<usize> {
        let mut b = self.tail;
        while let Some(i) = b {
            let bref = &mut self.inner[i];
            if bref.refcnt == 0 && !bref.dirty {
                bref.dev = dev;
                bref.blockno = blockno;
                bref.refcnt = 1;
                return Some(i);
            }
            b = bref.prev;
        }
        None
    }

    /// 引用计数减一，归零时将该块移到链表头部。
    fn move_if_no_ref(&mut self, index: usize) {
        let b = &mut self.inner[index];
        if b.refcnt == 0 {
            panic!("bcache: release a buffer that is not held");
        }
        b.refcnt -= 1;
        if b.refcnt > 0 || self.head == Some(index) {
            return;
        }

        // 分离
        let (prev, next) = (b.prev, b.next);
        match prev {
            Some(p) => self.inner[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.inner[n].prev = prev,
            None => self.tail = prev,
        }

        // 附加到头部
        let old_head = self.head;
        self.inner[index].prev = None;
        self.inner[index].next = old_head;
        if let Some(h) = old_head {
            self.inner[h].prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }
}

/// 缓冲块控制结构，记录缓冲块的身份、引用计数、脏标志与 LRU 链表位置。
struct BufCtrl {
    dev: u32,
    blockno: u32,
    prev: Option<usize>,
    next: Option<usize>,

    /// 持有者与等待者的数量，大于 0 时不能被替换
    refcnt: usize,

    /// 属于尚未提交的事务，提交前不能被替换
    dirty: bool,
}

impl BufCtrl {
    fn new(index: usize) -> Self {
        Self {
            dev: 0,
            blockno: 0,
            prev: index.checked_sub(1),
            next: if index + 1 < NBUF { Some(index + 1) } else { None },
            refcnt: 0,
            dirty: false,
        }
    }
}

/// 缓冲块的数据部分及其有效性标志。
///
/// `valid` 只在持有 `ctrl` 自旋锁（回收时）或持有 `data` 睡眠锁（读盘时）时修改。
struct BufInner {
    valid: AtomicBool,
    data: SleepLock<BufData>,
}

impl BufInner {
    fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "BufData"),
        }
    }
}

/// 一个块的数据。对齐方式满足从中解析出的各种磁盘结构。
#[repr(C, align(8))]
#[derive(Clone)]
pub struct BufData([u8; BSIZE]);

impl BufData {
    pub const fn new() -> Self {
        Self([0; BSIZE])
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::fs::ROOTDEV;
    use crate::driver::RamDisk;
    use std::thread;

    fn cache(blocks: u32) -> (Arc<RamDisk>, Bcache) {
        let disk = Arc::new(RamDisk::new(blocks));
        let bcache = Bcache::new(ROOTDEV, disk.clone());
        (disk, bcache)
    }

    #[test]
    fn second_read_hits_cache() {
        let (disk, bcache) = cache(64);
        drop(bcache.bread(ROOTDEV, 7).unwrap());
        assert_eq!(disk.reads(), 1);
        drop(bcache.bread(ROOTDEV, 7).unwrap());
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn evicts_least_recently_released() {
        let (_disk, bcache) = cache(256);
        // 按 0..NBUF 的顺序读入并释放，块 0 最久未用
        for bn in 0..NBUF as u32 {
            drop(bcache.bread(ROOTDEV, bn).unwrap());
        }
        // 再次访问块 0，块 1 成为最久未用
        drop(bcache.bread(ROOTDEV, 0).unwrap());

        drop(bcache.bread(ROOTDEV, 100).unwrap());
        assert!(bcache.is_cached(ROOTDEV, 0));
        assert!(!bcache.is_cached(ROOTDEV, 1));
        assert!(bcache.is_cached(ROOTDEV, 2));
    }

    #[test]
    fn dirty_and_held_buffers_are_not_evicted() {
        let (_disk, bcache) = cache(256);
        for bn in 0..NBUF as u32 {
            drop(bcache.bread(ROOTDEV, bn).unwrap());
        }
        // 块 0 被钉住，块 1 正被持有：都不能被替换
        bcache.bread(ROOTDEV, 0).unwrap().pin();
        let held = bcache.bread(ROOTDEV, 1).unwrap();
        for bn in 2..NBUF as u32 {
            drop(bcache.bread(ROOTDEV, bn).unwrap());
        }

        // 此时从尾部看依次是 1、0、2
        drop(bcache.bread(ROOTDEV, 200).unwrap());
        assert!(bcache.is_cached(ROOTDEV, 0));
        assert!(bcache.is_cached(ROOTDEV, 1));
        assert!(!bcache.is_cached(ROOTDEV, 2));
        drop(held);
    }

    #[test]
    fn exhausted_pool_reports_error() {
        let (_disk, bcache) = cache(256);
        let held: Vec<_> = (0..NBUF as u32)
            .map(|bn| bcache.bread(ROOTDEV, bn).unwrap())
            .collect();
        assert!(matches!(bcache.bread(ROOTDEV, 100), Err(FsError::NoFreeBuffer)));
        drop(held);
        assert!(bcache.bread(ROOTDEV, 100).is_ok());
    }

    #[test]
    fn one_holder_per_block() {
        let (_disk, bcache) = cache(64);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let mut buf = bcache.bread(ROOTDEV, 5).unwrap();
                        let v = u32::from_le_bytes(buf.data()[..4].try_into().unwrap());
                        thread::yield_now();
                        buf.data_mut()[..4].copy_from_slice(&(v + 1).to_le_bytes());
                    }
                });
            }
        });
        let buf = bcache.bread(ROOTDEV, 5).unwrap();
        assert_eq!(u32::from_le_bytes(buf.data()[..4].try_into().unwrap()), 400);
    }

    #[test]
    #[should_panic(expected = "unpin a clean buffer")]
    fn unpin_clean_buffer_panics() {
        let (_disk, bcache) = cache(16);
        bcache.bread(ROOTDEV, 3).unwrap().unpin();
    }
}
