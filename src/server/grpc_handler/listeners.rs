//! 类型化的监听器注册表
//!
//! 一次性事件（响应已发送、流已结束、已取消）用 [`OnceEvent`]，
//! 可重复事件（消息已写出）用 [`RecurringEvent`]。

use std::sync::{Arc, Mutex};
use crate::utils::sync::lock;

type OnceListener<A> = Box<dyn FnOnce(&A) + Send>;

enum OnceState<A> {
    Waiting(Vec<OnceListener<A>>),
    /// 已触发或已关闭，之后注册的监听器直接丢弃
    Done,
}

/// 至多触发一次的事件
pub struct OnceEvent<A> {
    state: Mutex<OnceState<A>>,
}

impl<A> OnceEvent<A> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OnceState::Waiting(Vec::new())),
        }
    }

    /// 注册监听器，返回是否被接受（事件已结束时返回 false）
    pub fn subscribe(&self, listener: impl FnOnce(&A) + Send + 'static) -> bool {
        let mut state = lock(&self.state);
        match &mut *state {
            OnceState::Waiting(listeners) => {
                listeners.push(Box::new(listener));
                true
            }
            OnceState::Done => false,
        }
    }

    /// 触发事件，返回本次是否真正触发
    ///
    /// 监听器在锁外执行，可以安全地回调到同一个调用上。
    pub fn fire(&self, arg: A) -> bool {
        let listeners = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, OnceState::Done) {
                OnceState::Waiting(listeners) => listeners,
                OnceState::Done => return false,
            }
        };
        for listener in listeners {
            listener(&arg);
        }
        true
    }

    /// 不触发而直接结束（事件已不可能发生），释放所有监听器
    pub fn close(&self) {
        let mut state = lock(&self.state);
        *state = OnceState::Done;
    }

    pub fn is_done(&self) -> bool {
        matches!(*lock(&self.state), OnceState::Done)
    }
}

impl<A> Default for OnceEvent<A> {
    fn default() -> Self {
        Self::new()
    }
}

type RecurringListener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// 可多次触发的事件，按注册顺序通知
pub struct RecurringEvent<A> {
    listeners: Mutex<Option<Vec<RecurringListener<A>>>>,
}

impl<A> RecurringEvent<A> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&A) + Send + Sync + 'static) -> bool {
        match &mut *lock(&self.listeners) {
            Some(listeners) => {
                listeners.push(Arc::new(listener));
                true
            }
            None => false,
        }
    }

    pub fn emit(&self, arg: &A) {
        let listeners = match &*lock(&self.listeners) {
            Some(listeners) => listeners.clone(),
            None => return,
        };
        for listener in listeners {
            listener(arg);
        }
    }

    /// 关闭事件并释放监听器
    pub fn close(&self) {
        *lock(&self.listeners) = None;
    }
}

impl<A> Default for RecurringEvent<A> {
    fn default() -> Self {
        Self::new()
    }
}
