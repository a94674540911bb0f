//! 闸门管道
//!
//! 把单条消息依次穿过一组转换回调。每个闸门必须调用 [`GateNext::pass`] 才能把消息交给下一个闸门；
//! 一直持有续延就是延后这条消息，直接丢掉续延则丢弃这条消息。

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use crate::utils::logger::{debug, error};
use crate::utils::sync::lock;
use super::sequence::{Continuation, Sequence};

type Gate<T> = Arc<dyn Fn(T, GateNext<T>) + Send + Sync>;
type DiscardSlot = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

/// 闸门的续延
pub struct GateNext<T> {
    cont: Option<Continuation<T>>,
    discard: DiscardSlot,
}

impl<T: Send + 'static> GateNext<T> {
    /// 把（可能已被转换的）消息交给下一个闸门
    pub fn pass(mut self, payload: T) {
        if let Some(cont) = self.cont.take() {
            cont.resume(payload);
        }
    }
}

impl<T> Drop for GateNext<T> {
    fn drop(&mut self) {
        if self.cont.take().is_some() {
            let on_discard = lock(&self.discard).take();
            if let Some(on_discard) = on_discard {
                debug!("🚧 闸门未放行，消息已丢弃");
                on_discard();
            }
        }
    }
}

impl<T> fmt::Debug for GateNext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateNext")
            .field("pending", &self.cont.is_some())
            .finish()
    }
}

/// 单条消息的转换管道
pub struct GatePipeline<T> {
    gates: Mutex<Vec<Gate<T>>>,
}

impl<T: Send + 'static> GatePipeline<T> {
    pub fn new() -> Self {
        Self {
            gates: Mutex::new(Vec::new()),
        }
    }

    /// 追加一个闸门，按注册顺序执行
    pub fn add_gate(&self, gate: impl Fn(T, GateNext<T>) + Send + Sync + 'static) {
        lock(&self.gates).push(Arc::new(gate));
    }

    pub fn len(&self) -> usize {
        lock(&self.gates).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 让消息穿过所有闸门，最后一个闸门放行后调用 `on_complete`
    pub fn pass_payload(&self, payload: T, on_complete: impl FnOnce(T) + Send + 'static) {
        self.pass_payload_or_discard(payload, on_complete, || {});
    }

    /// 同 [`pass_payload`](Self::pass_payload)，消息被某个闸门丢弃时调用 `on_discard`
    pub fn pass_payload_or_discard(
        &self,
        payload: T,
        on_complete: impl FnOnce(T) + Send + 'static,
        on_discard: impl FnOnce() + Send + 'static,
    ) {
        // 快照当前闸门，之后新增的闸门不影响这条在途消息
        let gates: Vec<Gate<T>> = lock(&self.gates).clone();
        let discard: DiscardSlot = Arc::new(Mutex::new(Some(Box::new(on_discard))));

        Sequence::start(
            gates.len(),
            move |index, payload, cont| {
                let next = GateNext {
                    cont: Some(cont),
                    discard: discard.clone(),
                };
                let gate = &gates[index];
                if panic::catch_unwind(AssertUnwindSafe(|| gate(payload, next))).is_err() {
                    error!("❌ 闸门 {} 发生 panic，消息已丢弃", index);
                }
            },
            on_complete,
            payload,
        );
    }

    /// 移除所有闸门
    pub fn clear(&self) {
        lock(&self.gates).clear();
    }
}

impl<T: Send + 'static> Default for GatePipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}
