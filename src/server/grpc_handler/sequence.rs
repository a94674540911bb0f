//! 续延驱动器
//!
//! 处理器链、闸门管道和入站消息监听器都是 "每一步必须显式调用续延才能前进" 的模型。
//! 这里用一个显式下标循环驱动各步骤：同步调用的续延只是把值停放下来，由驱动循环继续，
//! 异步调用的续延则在调用者线程上接着驱动，调用栈不会随步骤数增长。

use std::fmt;
use std::sync::{Arc, Mutex};
use crate::utils::sync::lock;

type StepFn<T> = dyn Fn(usize, T, Continuation<T>) + Send + Sync;
type CompleteFn<T> = Box<dyn FnOnce(T) + Send>;

struct SequenceState<T> {
    index: usize,
    driving: bool,
    parked: Option<T>,
    on_complete: Option<CompleteFn<T>>,
}

pub(crate) struct Sequence<T> {
    len: usize,
    step: Box<StepFn<T>>,
    state: Mutex<SequenceState<T>>,
}

/// 某一步的续延，调用 [`Continuation::resume`] 进入下一步
pub(crate) struct Continuation<T> {
    sequence: Arc<Sequence<T>>,
    index: usize,
}

impl<T: Send + 'static> Sequence<T> {
    /// 从第 0 步开始执行，所有步骤都继续后调用 `on_complete`
    pub(crate) fn start<S, C>(len: usize, step: S, on_complete: C, value: T)
    where
        S: Fn(usize, T, Continuation<T>) + Send + Sync + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let sequence = Arc::new(Self {
            len,
            step: Box::new(step),
            state: Mutex::new(SequenceState {
                index: 0,
                driving: false,
                parked: None,
                on_complete: Some(Box::new(on_complete)),
            }),
        });
        sequence.drive(0, value);
    }

    fn drive(self: &Arc<Self>, mut index: usize, mut value: T) {
        loop {
            if index >= self.len {
                let on_complete = lock(&self.state).on_complete.take();
                if let Some(on_complete) = on_complete {
                    on_complete(value);
                }
                return;
            }

            {
                let mut state = lock(&self.state);
                state.index = index;
                state.driving = true;
            }

            (self.step)(index, value, Continuation {
                sequence: Arc::clone(self),
                index,
            });

            let mut state = lock(&self.state);
            state.driving = false;
            match state.parked.take() {
                Some(parked) => {
                    index += 1;
                    value = parked;
                }
                // 续延尚未调用，由它日后接着驱动
                None => return,
            }
        }
    }

    fn resume(self: &Arc<Self>, index: usize, value: T) {
        {
            let mut state = lock(&self.state);
            if state.driving && state.index == index {
                state.parked = Some(value);
                return;
            }
        }
        self.drive(index + 1, value);
    }
}

impl<T: Send + 'static> Continuation<T> {
    pub(crate) fn resume(self, value: T) {
        self.sequence.resume(self.index, value);
    }
}

/// 处理器 / 消息监听器的续延
///
/// 调用 [`Next::run`] 把控制权交给下一个处理器；从不调用则链条就此停止，
/// 这正是拦截器短路的方式（例如鉴权失败时发送错误后直接返回）。
#[must_use = "不调用 `Next::run` 会让处理链停在这里"]
pub struct Next {
    resume: Box<dyn FnOnce() + Send>,
}

impl Next {
    pub(crate) fn new(resume: impl FnOnce() + Send + 'static) -> Self {
        Self {
            resume: Box::new(resume),
        }
    }

    /// 继续执行下一步
    pub fn run(self) {
        (self.resume)()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_sync_steps_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));
        let step_log = log.clone();
        let done_count = done.clone();
        Sequence::start(
            5,
            move |index, value: usize, cont| {
                step_log.lock().unwrap().push(index);
                cont.resume(value + 1);
            },
            move |value| {
                assert_eq!(value, 5);
                done_count.fetch_add(1, Ordering::SeqCst);
            },
            0,
        );
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_long_chain_does_not_grow_stack() {
        let done = Arc::new(AtomicUsize::new(0));
        let done_count = done.clone();
        Sequence::start(
            200_000,
            |_, value: (), cont| cont.resume(value),
            move |_| {
                done_count.fetch_add(1, Ordering::SeqCst);
            },
            (),
        );
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unresumed_step_halts() {
        let reached = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let step_reached = reached.clone();
        let done_count = done.clone();
        Sequence::start(
            3,
            move |index, value: (), cont| {
                step_reached.fetch_add(1, Ordering::SeqCst);
                if index != 1 {
                    cont.resume(value);
                }
            },
            move |_| {
                done_count.fetch_add(1, Ordering::SeqCst);
            },
            (),
        );
        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_async_resume_continues_on_other_thread() {
        let parked = Arc::new(Mutex::new(None));
        let done = Arc::new(AtomicUsize::new(0));
        let slot = parked.clone();
        let done_count = done.clone();
        Sequence::start(
            2,
            move |index, value: (), cont| {
                if index == 0 {
                    *slot.lock().unwrap() = Some(cont);
                } else {
                    cont.resume(value);
                }
            },
            move |_| {
                done_count.fetch_add(1, Ordering::SeqCst);
            },
            (),
        );
        assert_eq!(done.load(Ordering::SeqCst), 0);

        let cont = parked.lock().unwrap().take().unwrap();
        thread::spawn(move || cont.resume(())).join().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
