//! 进程调度器提供给文件系统的睡眠/唤醒原语
//!
//! 内核中的 `sleep(channel, lock)` 会在释放 `lock` 的同时让出 CPU，
//! `wakeup(channel)` 则唤醒所有在该通道上睡眠的进程。这里在宿主线程上实现同样的语义：
//! 通道是被等待对象的地址，唤醒是广播式的，被唤醒者必须重新检查等待条件。

use alloc::collections::BTreeMap;

use parking_lot::{Condvar, Mutex};

use crate::spinlock::SpinLockGuard;

/// 全局唯一的睡眠/唤醒管理器。
///
/// 通道以对象地址区分，不同的 `FileSystem` 实例之间互不干扰。
pub static PROC_MANAGER: ProcManager = ProcManager::new();

pub struct ProcManager {
    /// 通道 -> 该通道上的睡眠者信息
    table: Mutex<BTreeMap<usize, Channel>>,
    cond: Condvar,
}

struct Channel {
    /// 仍在该通道上睡眠的线程数，为 0 时移除该条目
    sleepers: usize,
    /// 每次 wakeup 递增，睡眠者据此判断自己是否已被唤醒
    seq: u64,
}

impl ProcManager {
    const fn new() -> Self {
        Self {
            table: parking_lot::const_mutex(BTreeMap::new()),
            cond: Condvar::new(),
        }
    }

    /// 释放 `guard` 并在 `channel` 上睡眠，直到被 [`wakeup`](Self::wakeup)。
    ///
    /// # 功能说明
    /// 先获取通道表的锁，再释放调用者持有的自旋锁。唤醒者必须先获取同一把
    /// 自旋锁才能调用 `wakeup`，而 `wakeup` 又需要通道表的锁，
    /// 所以在“释放自旋锁”与“开始睡眠”之间不会丢失唤醒。
    ///
    /// 返回时不会重新获取 `guard` 对应的锁，调用者需要自行重新加锁并检查条件。
    pub fn sleep<T>(&self, channel: usize, guard: SpinLockGuard<'_, T>) {
        let mut table = self.table.lock();
        drop(guard);

        let chan = table.entry(channel).or_insert(Channel { sleepers: 0, seq: 0 });
        chan.sleepers += 1;
        let seq = chan.seq;

        loop {
            self.cond.wait(&mut table);
            match table.get(&channel) {
                Some(chan) if chan.seq == seq => continue,
                _ => break,
            }
        }

        if let Some(chan) = table.get_mut(&channel) {
            chan.sleepers -= 1;
            if chan.sleepers == 0 {
                table.remove(&channel);
            }
        }
    }

    /// 唤醒所有在 `channel` 上睡眠的线程。
    pub fn wakeup(&self, channel: usize) {
        let mut table = self.table.lock();
        if let Some(chan) = table.get_mut(&channel) {
            chan.seq = chan.seq.wrapping_add(1);
            self.cond.notify_all();
        }
    }
}
