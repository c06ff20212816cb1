//! 日志层
//!
//! 一个事务包含若干个并发文件系统操作的更新。日志只在没有活跃操作时提交，
//! 因此不必考虑提交会不会把某个尚未结束的操作的更新写入磁盘。
//!
//! 磁盘上的日志格式：
//!   日志头块，记录块 A、B、C……的目标块号
//!   块 A
//!   块 B
//!   块 C
//!   ……
//! 日志追加是同步的。

use core::cmp::min;

use crate::consts::fs::{LOGSIZE, MAXOPBLOCKS};
use crate::process::PROC_MANAGER;
use crate::spinlock::SpinLock;
use super::bio::{Bcache, Buf, BufData};

/// 用于记录和管理文件系统日志的核心结构体。
///
/// 它记录了日志区域的位置、事务状态以及当前事务中涉及的块号，
/// 由 [`FileSystem`](super::FileSystem) 以 `SpinLock<Log>` 的形式持有。
/// 事务边界由 [`begin_op`](SpinLock::begin_op) 与 [`end_op`](SpinLock::end_op) 管理，
/// 最后一个结束的操作负责组提交。
pub struct Log {
    /// 日志区的位置
    area: LogArea,
    /// 日志区域中块的数量（包括日志头块和数据块）
    size: u32,
    /// 当前正在进行的文件系统操作数
    outstanding: u32,
    /// 指示日志系统是否正在提交事务，为 true 时禁止新的文件系统操作进入
    committing: bool,
    /// 当前事务的日志头，记录了修改的块号及数量
    lh: LogHeader,
}

impl Log {
    /// 初始化日志系统并在必要时执行崩溃恢复。
    ///
    /// `start` 与 `size` 来自超级块。若日志头中仍有记录，
    /// 说明上一次提交已经写下提交点但未必完成安装，此时重放日志。
    pub fn init(bcache: &Bcache, start: u32, size: u32) -> Self {
        let mut log = Self {
            area: LogArea { dev: bcache.dev(), start },
            size,
            outstanding: 0,
            committing: false,
            lh: LogHeader::empty(),
        };
        log.recover(bcache);
        log
    }

    /// 日志头能容纳的块数
    fn capacity(&self) -> usize {
        min(LOGSIZE - 1, self.size as usize - 1)
    }

    fn recover(&mut self, bcache: &Bcache) {
        log::info!("file system: checking logs");
        let lh = self.area.read_head(bcache);
        if lh.len > 0 {
            log::info!("file system: recovering {} blocks from logs", lh.len);
            self.area.install_trans(bcache, &lh, true);
            self.area.empty_head(bcache);
        } else {
            log::info!("file system: no need to recover");
        }
    }

    /// 提交当前事务。
    ///
    /// # 流程解释
    /// 1. 将缓存中被修改的块复制到日志区；
    /// 2. 写入日志头，这是唯一的提交点：此后崩溃，恢复时会重放全部日志块；
    /// 3. 将日志块安装到它们的原位置；
    /// 4. 清空日志头。
    ///
    /// 调用时不持有日志锁，`committing` 标志保证此期间没有别的操作修改日志。
    fn commit(area: LogArea, bcache: &Bcache, lh: &LogHeader) {
        if lh.len > 0 {
            log::debug!("log: committing {} blocks", lh.len);
            area.write_log(bcache, lh);
            area.write_head(bcache, lh);
            area.install_trans(bcache, lh, false);
            area.empty_head(bcache);
        }
    }
}

impl SpinLock<Log> {
    /// 开始一个文件系统操作。
    ///
    /// 若日志正在提交，或者接纳本操作后所有未结束操作的最坏情况可能超出日志容量，
    /// 则睡眠等待，醒来后重新检查。只会延迟，不会失败。
    pub fn begin_op(&self) {
        let mut guard = self.lock();
        loop {
            if guard.committing
                || guard.lh.len as usize + (guard.outstanding as usize + 1) * MAXOPBLOCKS > guard.capacity()
            {
                PROC_MANAGER.sleep(self.channel(), guard);
                guard = self.lock();
            } else {
                guard.outstanding += 1;
                drop(guard);
                break;
            }
        }
    }

    /// 将缓冲块记入当前事务，代替直接写盘。
    ///
    /// 同一事务中重复写同一个块只占用一个日志位置（日志吸收）。
    /// 块会被钉在缓存中直到提交完成。
    pub fn write(&self, buf: Buf<'_>) {
        let mut guard = self.lock();

        if guard.outstanding < 1 {
            panic!("log: this log write is out of recording");
        }

        let blockno = buf.read_blockno();
        if !guard.lh.contains(blockno) {
            if guard.lh.len as usize >= guard.capacity() {
                panic!("log: not enough space for this transaction");
            }
            guard.lh.push(blockno);
        }
        buf.pin();
        drop(guard);
        drop(buf);
    }

    /// 结束一个文件系统操作，最后一个结束的操作负责提交。
    pub fn end_op(&self, bcache: &Bcache) {
        let mut guard = self.lock();
        if guard.committing {
            panic!("log: end fs op while the log is committing");
        }
        if guard.outstanding < 1 {
            panic!("log: end fs op without begin");
        }
        guard.outstanding -= 1;

        let pending = if guard.outstanding == 0 {
            guard.committing = true;
            Some((guard.area, guard.lh.clone()))
        } else {
            // begin_op 可能在等待日志空间，而本操作的预留已经释放
            PROC_MANAGER.wakeup(self.channel());
            None
        };
        drop(guard);

        if let Some((area, lh)) = pending {
            Log::commit(area, bcache, &lh);
            let mut guard = self.lock();
            guard.lh.len = 0;
            guard.committing = false;
            PROC_MANAGER.wakeup(self.channel());
            drop(guard);
        }
    }

    #[inline]
    fn channel(&self) -> usize {
        self as *const SpinLock<Log> as usize
    }
}

/// 日志区在磁盘上的位置
#[derive(Clone, Copy, Debug)]
struct LogArea {
    dev: u32,
    /// 日志头所在块号，日志数据块紧随其后
    start: u32,
}

impl LogArea {
    fn read_head(&self, bcache: &Bcache) -> LogHeader {
        let buf = bread(bcache, self.dev, self.start);
        LogHeader::decode(buf.data())
    }

    /// 将日志头写入磁盘
    fn write_head(&self, bcache: &Bcache, lh: &LogHeader) {
        let mut buf = bread(bcache, self.dev, self.start);
        lh.encode(buf.data_mut());
        bwrite(&mut buf);
    }

    fn empty_head(&self, bcache: &Bcache) {
        self.write_head(bcache, &LogHeader::empty());
    }

    /// 将已提交的日志块复制到它们的原位置
    fn install_trans(&self, bcache: &Bcache, lh: &LogHeader, recovering: bool) {
        for (i, &blockno) in lh.blocknos().iter().enumerate() {
            let log_buf = bread(bcache, self.dev, self.start + 1 + i as u32);
            let mut disk_buf = bread(bcache, self.dev, blockno);
            disk_buf.data_mut().copy_from_slice(&log_buf.data()[..]);
            bwrite(&mut disk_buf);
            if !recovering {
                disk_buf.unpin();
            }
            drop(log_buf);
            drop(disk_buf);
        }
    }

    /// 将缓存中被修改的块复制到日志区
    fn write_log(&self, bcache: &Bcache, lh: &LogHeader) {
        for (i, &blockno) in lh.blocknos().iter().enumerate() {
            let mut log_buf = bread(bcache, self.dev, self.start + 1 + i as u32);
            let cache_buf = bread(bcache, self.dev, blockno);
            log_buf.data_mut().copy_from_slice(&cache_buf.data()[..]);
            bwrite(&mut log_buf);
            drop(cache_buf);
            drop(log_buf);
        }
    }
}

// 提交与恢复过程中不能半途而废，读写失败都是致命的

fn bread(bcache: &Bcache, dev: u32, blockno: u32) -> Buf<'_> {
    match bcache.bread(dev, blockno) {
        Ok(buf) => buf,
        Err(e) => panic!("log: read block {}: {}", blockno, e),
    }
}

fn bwrite(buf: &mut Buf<'_>) {
    if let Err(e) = buf.bwrite() {
        panic!("log: write block {}: {}", buf.read_blockno(), e);
    }
}

/// 日志头，既是磁盘上日志头块的格式，也是提交前内存中的记录。
#[derive(Clone)]
struct LogHeader {
    len: u32,
    blocknos: [u32; LOGSIZE - 1],
}

static_assertions::const_assert!(4 * LOGSIZE <= crate::consts::fs::BSIZE);

impl LogHeader {
    const fn empty() -> Self {
        Self { len: 0, blocknos: [0; LOGSIZE - 1] }
    }

    fn blocknos(&self) -> &[u32] {
        &self.blocknos[..self.len as usize]
    }

    fn contains(&self, blockno: u32) -> bool {
        self.blocknos().contains(&blockno)
    }

    fn push(&mut self, blockno: u32) {
        self.blocknos[self.len as usize] = blockno;
        self.len += 1;
    }

    fn decode(data: &BufData) -> Self {
        let word = |i: usize| u32::from_le_bytes([data[4 * i], data[4 * i + 1], data[4 * i + 2], data[4 * i + 3]]);
        let mut lh = Self::empty();
        lh.len = word(0);
        if lh.len as usize > LOGSIZE - 1 {
            panic!("log: corrupt log header with {} blocks", lh.len);
        }
        for i in 0..lh.len as usize {
            lh.blocknos[i] = word(i + 1);
        }
        lh
    }

    fn encode(&self, data: &mut BufData) {
        data[..4].copy_from_slice(&self.len.to_le_bytes());
        for (i, bn) in self.blocknos.iter().enumerate() {
            data[4 * (i + 1)..4 * (i + 2)].copy_from_slice(&bn.to_le_bytes());
        }
    }
}
