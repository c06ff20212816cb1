//! 睡眠锁模块
//! 提供基于睡眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的线程会进入睡眠状态，避免忙等待。
//! 块缓存槽位的“忙”标志与 inode 的锁都是睡眠锁：持有者可能在持锁期间读写磁盘。

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};

use crate::process::PROC_MANAGER;
use crate::spinlock::SpinLock;

/// 睡眠锁结构，提供阻塞式同步机制
///
/// # 字段说明
/// - `locked`: 内部自旋锁保护的占用标志
/// - `name`: 锁的标识名称，用于调试
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性
pub struct SleepLock<T> {
    locked: SpinLock<bool>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 数据只会经由守卫被唯一的持有者访问
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            locked: SpinLock::new(false, "sleeplock"),
            name,
            data: UnsafeCell::new(data),
        }
    }

    /// 获取睡眠锁（可能阻塞线程）
    ///
    /// # 流程解释
    /// 1. 获取内部自旋锁保护临界区
    /// 2. 检查占用标志：
    ///   - 如果已锁定：在本锁的通道上睡眠，醒来后重新加锁并再次检查
    ///   - 如果未锁定：设置占用标志并返回守卫
    /// 3. 释放内部自旋锁（因已设置占用标志）
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut guard = self.locked.lock();

        // 唤醒是广播式的，必须循环检查
        while *guard {
            PROC_MANAGER.sleep(self.channel(), guard);
            guard = self.locked.lock();
        }

        *guard = true;
        drop(guard);

        SleepLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 锁是否被某个持有者占用
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 释放锁（由守卫的Drop调用）
    fn unlock(&self) {
        let mut guard = self.locked.lock();
        if !*guard {
            panic!("sleeplock {}: release while not held", self.name);
        }
        *guard = false;
        PROC_MANAGER.wakeup(self.channel());
        drop(guard);
    }

    #[inline]
    fn channel(&self) -> usize {
        &self.locked as *const SpinLock<bool> as usize
    }
}

/// 睡眠锁守卫，提供对受保护数据的访问
///
/// 守卫离开作用域时自动释放锁并唤醒等待者。
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    data: &'a mut T,
}

impl<'a, T> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
