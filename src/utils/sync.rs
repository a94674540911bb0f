use std::sync::{Mutex, MutexGuard, PoisonError};

/// 获取互斥锁；锁被毒化时继续使用内部数据
///
/// 调用链里的锁只保护简单的标志位和队列，不会因为 panic 留下半更新的状态。
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
