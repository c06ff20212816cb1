//! 自旋锁模块
//! 自旋锁将数据包裹在自身内部以保护这些数据。

use core::fmt;

/// 自旋锁守卫对象，离开作用域时自动释放锁。
pub type SpinLockGuard<'a, T> = spin::MutexGuard<'a, T>;

/// 表示一个自旋锁结构，用于在多核环境下保护共享数据。
///
/// `SpinLock` 只用于保护短小的临界区：持有自旋锁期间不能进行磁盘 I/O，
/// 也不能进入睡眠。需要睡眠时，必须通过 [`ProcManager::sleep`] 在进入睡眠的同时释放它。
///
/// # 字段说明
/// - `name`: 锁的名称，用于调试和标识；
/// - `inner`: 实际的自旋互斥量，内部数据由它保护。
///
/// [`ProcManager::sleep`]: crate::process::ProcManager::sleep
pub struct SpinLock<T> {
    name: &'static str,
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    /// 创建一个新的自旋锁实例。
    ///
    /// # 参数
    /// - `data`: 需要被保护的数据；
    /// - `name`: 锁的标识名称，用于调试。
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            inner: spin::Mutex::new(data),
        }
    }
}

impl<T> SpinLock<T> {
    /// 获取自旋锁并返回一个守卫对象。
    ///
    /// # 示例
    /// ```ignore
    /// let lock = SpinLock::new(0, "test");
    /// {
    ///     let mut guard = lock.lock(); // 获取锁
    ///     *guard = 42; // 修改受保护数据
    /// } // 守卫离开作用域，自动释放锁
    /// ```
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.inner.lock()
    }

    /// 锁当前是否被某个线程持有，仅用于调试断言。
    pub fn holding(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("locked", &self.holding())
            .finish()
    }
}
