//! 入站消息流
//!
//! 传输层推来的消息先排队，再逐条穿过入站闸门、依次交给消息监听器。
//! 同一时刻只有一条消息在途：监听器链全部继续（或消息被闸门丢弃）之后才处理下一条。
//! 客户端半关闭在在途消息处理完之前会被延后。

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use crate::utils::logger::{debug, error};
use crate::utils::sync::lock;
use super::call_state::CallState;
use super::gate::{GateNext, GatePipeline};
use super::listeners::OnceEvent;
use super::sequence::{Next, Sequence};
use super::types::{Direction, Message, StreamEnd};

type MessageListener<Req> = Arc<dyn Fn(Req, Next) + Send + Sync>;

struct InboundQueue<Req> {
    pending: VecDeque<Req>,
    /// 处理器链已完成，传输层的消息开始流入
    forwarding: bool,
    pumping: bool,
    in_flight: bool,
    end_pending: bool,
    closed: bool,
}

impl<Req> InboundQueue<Req> {
    fn busy(&self) -> bool {
        self.pumping || self.in_flight || !self.pending.is_empty()
    }
}

pub(crate) struct InboundStream<Req> {
    state: Arc<CallState>,
    gates: GatePipeline<Req>,
    listeners: Mutex<Vec<MessageListener<Req>>>,
    queue: Mutex<InboundQueue<Req>>,
    pub(crate) ended: OnceEvent<StreamEnd>,
}

impl<Req: Message> InboundStream<Req> {
    pub(crate) fn new(state: Arc<CallState>) -> Self {
        Self {
            state,
            gates: GatePipeline::new(),
            listeners: Mutex::new(Vec::new()),
            queue: Mutex::new(InboundQueue {
                pending: VecDeque::new(),
                forwarding: false,
                pumping: false,
                in_flight: false,
                end_pending: false,
                closed: false,
            }),
            ended: OnceEvent::new(),
        }
    }

    pub(crate) fn add_gate(&self, gate: impl Fn(Req, GateNext<Req>) + Send + Sync + 'static) {
        if self.is_ended() {
            return;
        }
        self.gates.add_gate(gate);
    }

    pub(crate) fn add_listener(&self, listener: impl Fn(Req, Next) + Send + Sync + 'static) {
        if self.is_ended() {
            return;
        }
        lock(&self.listeners).push(Arc::new(listener));
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.is_stream_ended(Direction::Inbound)
    }

    pub(crate) fn start_forwarding(&self) {
        lock(&self.queue).forwarding = true;
    }

    /// 传输层推来一条消息
    pub(crate) fn push(self: &Arc<Self>, message: Req) {
        {
            let mut queue = lock(&self.queue);
            if queue.closed {
                debug!("🚫 入站流已结束，丢弃消息");
                return;
            }
            queue.pending.push_back(message);
            if queue.pumping || queue.in_flight {
                return;
            }
            queue.pumping = true;
        }
        self.pump();
    }

    /// 客户端半关闭；有消息在途时延后到处理完
    pub(crate) fn end_from_transport(self: &Arc<Self>) {
        {
            let mut queue = lock(&self.queue);
            if queue.closed {
                return;
            }
            if queue.forwarding && queue.busy() {
                debug!("⏳ 入站消息仍在处理，延后结束入站流");
                queue.end_pending = true;
                return;
            }
        }
        self.finish();
    }

    /// 结束入站流并通知监听器，返回本次是否发生了状态迁移
    pub(crate) fn finish(&self) -> bool {
        {
            let mut queue = lock(&self.queue);
            queue.closed = true;
            queue.end_pending = false;
            queue.pending.clear();
        }
        if !self.state.record_stream_ended(Direction::Inbound) {
            return false;
        }
        let end = self.state.snapshot().stream_end();
        self.gates.clear();
        lock(&self.listeners).clear();
        self.ended.fire(end);
        true
    }

    fn pump(self: &Arc<Self>) {
        loop {
            let message = {
                let mut queue = lock(&self.queue);
                if queue.in_flight {
                    queue.pumping = false;
                    return;
                }
                match queue.pending.pop_front() {
                    Some(message) => {
                        queue.in_flight = true;
                        message
                    }
                    None => {
                        queue.pumping = false;
                        let end = std::mem::take(&mut queue.end_pending);
                        drop(queue);
                        if end {
                            self.finish();
                        }
                        return;
                    }
                }
            };
            self.deliver(message);
        }
    }

    fn deliver(self: &Arc<Self>, message: Req) {
        let on_pass = self.clone();
        let on_discard = self.clone();
        self.gates.pass_payload_or_discard(
            message,
            move |message| on_pass.dispatch(message),
            move || on_discard.delivered(),
        );
    }

    fn dispatch(self: &Arc<Self>, message: Req) {
        let listeners: Vec<MessageListener<Req>> = lock(&self.listeners).clone();
        let done = self.clone();
        Sequence::start(
            listeners.len(),
            move |index, message: Req, cont| {
                let forward = message.clone();
                let next = Next::new(move || cont.resume(forward));
                let listener = &listeners[index];
                if panic::catch_unwind(AssertUnwindSafe(|| listener(message, next))).is_err() {
                    error!("❌ 消息监听器 {} 发生 panic，入站流停止", index);
                }
            },
            move |_| done.delivered(),
            message,
        );
    }

    /// 当前消息处理完毕，继续下一条
    fn delivered(self: &Arc<Self>) {
        {
            let mut queue = lock(&self.queue);
            queue.in_flight = false;
            if queue.pumping || (queue.pending.is_empty() && !queue.end_pending) {
                return;
            }
            queue.pumping = true;
        }
        self.pump();
    }
}
