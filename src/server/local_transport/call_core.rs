//! 进程内调用核心
//!
//! 实现 grpc_handler 的传输层接口，用 tokio 通道把服务端的输出交给客户端句柄。
//! 所有监听器都在锁外调用，处理器可以在回调里直接回到同一个调用上。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use crate::server::grpc_handler::transport::{
    CallCore, ReadableCore, RequestCore, UnaryCallback, WritableCore,
};
use crate::server::grpc_handler::types::{CallError, GrpcStatus, Message};
use crate::utils::logger::debug;
use crate::utils::sync::lock;

/// 客户端取消时客户端收到的状态消息
pub const CANCELLED_ON_CLIENT: &str = "Cancelled on client";

/// 连接断开时客户端收到的状态消息
pub const CONNECTION_LOST: &str = "Connection lost";

/// 服务端流式输出中的单个事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<Res> {
    Message(Res),
    End,
    Error(GrpcStatus),
}

pub(crate) enum ClientSink<Res> {
    Unary(Option<oneshot::Sender<Result<Res, GrpcStatus>>>),
    Stream(mpsc::UnboundedSender<StreamEvent<Res>>),
}

type DataListener<Req> = Box<dyn FnMut(Req) + Send>;
type Listener = Box<dyn FnOnce() + Send>;
type ErrorListener = Box<dyn FnOnce(CallError) + Send>;

struct CoreState<Req, Res> {
    sink: ClientSink<Res>,
    cancel_listeners: Vec<Listener>,
    error_listeners: Vec<ErrorListener>,
    end_listeners: Vec<Listener>,
    data_listener: Option<DataListener<Req>>,
    buffered: VecDeque<Req>,
    delivering: bool,
    client_ended: bool,
    end_delivered: bool,
    /// 服务端输出已结束（响应、结束或错误状态）
    out_closed: bool,
    /// 整个调用已结束，入站数据不再投递
    terminated: bool,
}

enum Step<Req> {
    Deliver(DataListener<Req>, Req),
    End(Vec<Listener>),
    Idle,
}

/// 进程内调用核心
pub struct LocalCallCore<Req, Res> {
    id: Uuid,
    path: String,
    state: Mutex<CoreState<Req, Res>>,
}

impl<Req: Message, Res: Message> LocalCallCore<Req, Res> {
    pub(crate) fn new(path: impl Into<String>, sink: ClientSink<Res>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            state: Mutex::new(CoreState {
                sink,
                cancel_listeners: Vec::new(),
                error_listeners: Vec::new(),
                end_listeners: Vec::new(),
                data_listener: None,
                buffered: VecDeque::new(),
                delivering: false,
                client_ended: false,
                end_delivered: false,
                out_closed: false,
                terminated: false,
            }),
        }
    }

    /// 没有客户端入站流的调用（一元、服务端流），入站方向一开始就是结束的
    pub(crate) fn without_inbound(self) -> Self {
        {
            let mut state = lock(&self.state);
            state.client_ended = true;
            state.end_delivered = true;
        }
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 服务端输出是否已结束
    pub fn is_closed(&self) -> bool {
        let state = lock(&self.state);
        state.out_closed || state.terminated
    }

    /// 一元响应回调；响应一旦送达，调用即结束
    pub(crate) fn unary_callback(self: &Arc<Self>) -> UnaryCallback<Res> {
        let core = self.clone();
        Box::new(move |result| core.complete_unary(result))
    }

    fn complete_unary(&self, result: Result<Res, GrpcStatus>) {
        let mut state = lock(&self.state);
        if state.out_closed {
            return;
        }
        state.out_closed = true;
        state.terminated = true;
        state.buffered.clear();
        if let ClientSink::Unary(sender) = &mut state.sink {
            if let Some(sender) = sender.take() {
                let _ = sender.send(result);
            }
        }
        Self::release(&mut state);
    }

    /// 以状态结束整个调用，返回本次是否生效
    ///
    /// 出站已正常结束时客户端已经收到结束事件，只关闭入站方向。
    fn close_with_status(state: &mut CoreState<Req, Res>, status: GrpcStatus) -> bool {
        if state.terminated {
            return false;
        }
        state.terminated = true;
        state.buffered.clear();
        if state.out_closed {
            return true;
        }
        state.out_closed = true;
        match &mut state.sink {
            ClientSink::Unary(sender) => {
                if let Some(sender) = sender.take() {
                    let _ = sender.send(Err(status));
                }
            }
            ClientSink::Stream(sender) => {
                let _ = sender.send(StreamEvent::Error(status));
            }
        }
        true
    }

    /// 两个方向都已结束时整个调用结束
    fn settle(state: &mut CoreState<Req, Res>) {
        if state.terminated || !state.out_closed || !state.end_delivered {
            return;
        }
        state.terminated = true;
        Self::release(state);
    }

    fn release(state: &mut CoreState<Req, Res>) {
        state.cancel_listeners.clear();
        state.error_listeners.clear();
        state.end_listeners.clear();
        state.data_listener = None;
    }

    /// 客户端发送一条消息，返回是否被接受
    pub(crate) fn push_data(&self, message: Req) -> bool {
        {
            let mut state = lock(&self.state);
            if state.terminated || state.client_ended {
                debug!("🚫 [本地传输] 调用 {} 已结束，客户端消息被丢弃", self.id);
                return false;
            }
            state.buffered.push_back(message);
        }
        self.flush();
        true
    }

    /// 客户端半关闭
    pub(crate) fn half_close(&self) {
        {
            let mut state = lock(&self.state);
            if state.client_ended {
                return;
            }
            state.client_ended = true;
        }
        self.flush();
    }

    /// 客户端取消
    pub(crate) fn cancel(&self) {
        self.cancel_with(GrpcStatus::cancelled(CANCELLED_ON_CLIENT));
    }

    /// 连接断开：服务端看到的是取消
    pub(crate) fn disconnect(&self) {
        self.cancel_with(GrpcStatus::unavailable(CONNECTION_LOST));
    }

    fn cancel_with(&self, status: GrpcStatus) {
        let listeners = {
            let mut state = lock(&self.state);
            if !Self::close_with_status(&mut state, status) {
                return;
            }
            let listeners = std::mem::take(&mut state.cancel_listeners);
            Self::release(&mut state);
            listeners
        };
        debug!("🛑 [本地传输] 调用 {} 被取消: {}", self.id, self.path);
        for listener in listeners {
            listener();
        }
    }

    /// 模拟传输层故障
    pub(crate) fn abort(&self, error: CallError) {
        let status = match error.status() {
            Some(status) => status.clone(),
            None => GrpcStatus::unavailable(error.message()),
        };
        let listeners = {
            let mut state = lock(&self.state);
            if !Self::close_with_status(&mut state, status) {
                return;
            }
            let listeners = std::mem::take(&mut state.error_listeners);
            Self::release(&mut state);
            listeners
        };
        debug!("💥 [本地传输] 调用 {} 传输错误: {}", self.id, error);
        for listener in listeners {
            listener(error.clone());
        }
    }

    fn next_step(state: &mut CoreState<Req, Res>) -> Step<Req> {
        if state.delivering || state.terminated {
            return Step::Idle;
        }
        if !state.buffered.is_empty() {
            if let Some(listener) = state.data_listener.take() {
                if let Some(message) = state.buffered.pop_front() {
                    state.delivering = true;
                    return Step::Deliver(listener, message);
                }
                state.data_listener = Some(listener);
            }
            return Step::Idle;
        }
        if state.client_ended && !state.end_delivered {
            state.end_delivered = true;
            return Step::End(std::mem::take(&mut state.end_listeners));
        }
        Step::Idle
    }

    /// 把暂存的消息投递给数据监听器；全部投递完之后才投递半关闭
    fn flush(&self) {
        loop {
            let step = Self::next_step(&mut lock(&self.state));
            match step {
                Step::Deliver(mut listener, message) => {
                    listener(message);
                    let mut state = lock(&self.state);
                    state.delivering = false;
                    if !state.terminated && state.data_listener.is_none() {
                        state.data_listener = Some(listener);
                    }
                }
                Step::End(listeners) => {
                    for listener in listeners {
                        listener();
                    }
                    Self::settle(&mut lock(&self.state));
                    return;
                }
                Step::Idle => return,
            }
        }
    }

    fn send_event(&self, event: StreamEvent<Res>) -> bool {
        let state = lock(&self.state);
        if state.out_closed || state.terminated {
            return false;
        }
        match &state.sink {
            ClientSink::Stream(sender) => sender.send(event).is_ok(),
            ClientSink::Unary(_) => false,
        }
    }
}

impl<Req: Message, Res: Message> CallCore for LocalCallCore<Req, Res> {
    fn on_cancelled(&self, listener: Box<dyn FnOnce() + Send>) {
        let mut state = lock(&self.state);
        if !state.terminated {
            state.cancel_listeners.push(listener);
        }
    }

    fn on_error(&self, listener: Box<dyn FnOnce(CallError) + Send>) {
        let mut state = lock(&self.state);
        if !state.terminated {
            state.error_listeners.push(listener);
        }
    }
}

impl<Req: Message, Res: Message> ReadableCore<Req> for LocalCallCore<Req, Res> {
    fn on_data(&self, listener: Box<dyn FnMut(Req) + Send>) {
        {
            let mut state = lock(&self.state);
            if state.terminated {
                return;
            }
            state.data_listener = Some(listener);
        }
        self.flush();
    }

    fn on_end(&self, listener: Box<dyn FnOnce() + Send>) {
        {
            let mut state = lock(&self.state);
            if !state.terminated && !state.end_delivered {
                state.end_listeners.push(listener);
            }
        }
        self.flush();
    }
}

impl<Req: Message, Res: Message> WritableCore<Res> for LocalCallCore<Req, Res> {
    fn write(&self, message: Res, done: Box<dyn FnOnce() + Send>) {
        if self.send_event(StreamEvent::Message(message)) {
            done();
        } else {
            debug!("🚫 [本地传输] 调用 {} 输出已结束，消息未写出", self.id);
        }
    }

    fn end(&self) {
        let mut state = lock(&self.state);
        if state.out_closed || state.terminated {
            return;
        }
        if let ClientSink::Stream(sender) = &state.sink {
            let _ = sender.send(StreamEvent::End);
        }
        state.out_closed = true;
        Self::settle(&mut state);
    }

    fn emit_error(&self, status: GrpcStatus) {
        let mut state = lock(&self.state);
        if Self::close_with_status(&mut state, status) {
            Self::release(&mut state);
        }
    }
}

/// 携带单个请求的调用核心（一元、服务端流）
pub struct LocalRequestCore<Req, Res> {
    core: Arc<LocalCallCore<Req, Res>>,
    request: Req,
}

impl<Req: Message, Res: Message> LocalRequestCore<Req, Res> {
    pub(crate) fn new(core: Arc<LocalCallCore<Req, Res>>, request: Req) -> Self {
        Self { core, request }
    }
}

impl<Req: Message, Res: Message> CallCore for LocalRequestCore<Req, Res> {
    fn on_cancelled(&self, listener: Box<dyn FnOnce() + Send>) {
        self.core.on_cancelled(listener);
    }

    fn on_error(&self, listener: Box<dyn FnOnce(CallError) + Send>) {
        self.core.on_error(listener);
    }
}

impl<Req: Message, Res: Message> RequestCore<Req> for LocalRequestCore<Req, Res> {
    fn request(&self) -> Req {
        self.request.clone()
    }
}

impl<Req: Message, Res: Message> WritableCore<Res> for LocalRequestCore<Req, Res> {
    fn write(&self, message: Res, done: Box<dyn FnOnce() + Send>) {
        self.core.write(message, done);
    }

    fn end(&self) {
        self.core.end();
    }

    fn emit_error(&self, status: GrpcStatus) {
        self.core.emit_error(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stream_core() -> (Arc<LocalCallCore<u32, u32>>, mpsc::UnboundedReceiver<StreamEvent<u32>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(LocalCallCore::new("/test/Stream", ClientSink::Stream(tx))), rx)
    }

    #[test]
    fn test_data_buffered_until_listener_attached() {
        let (core, _rx) = stream_core();
        core.push_data(1);
        core.push_data(2);
        core.half_close();

        let ended = Arc::new(AtomicUsize::new(0));
        let ended_count = ended.clone();
        core.on_end(Box::new(move || {
            ended_count.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        core.on_data(Box::new(move |msg| lock(&sink).push(msg)));
        assert_eq!(*lock(&seen), vec![1, 2]);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(!core.push_data(3));
    }

    #[test]
    fn test_cancel_notifies_client_and_server() {
        let (core, mut rx) = stream_core();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        core.on_cancelled(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        core.cancel();
        core.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamEvent::Error(GrpcStatus::cancelled(CANCELLED_ON_CLIENT))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_writes_after_end_are_dropped() {
        let (core, mut rx) = stream_core();
        let written = Arc::new(AtomicUsize::new(0));
        let counter = written.clone();
        core.write(7, Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        core.end();
        core.write(8, Box::new(|| {}));
        assert_eq!(written.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::Message(7));
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::End);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_after_end_closes_inbound() {
        let (core, mut rx) = stream_core();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        core.on_cancelled(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        core.end();
        assert!(core.push_data(1));

        core.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(!core.push_data(2));
        // 客户端已经收到结束事件，不再收到取消状态
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::End);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_abort_after_end_notifies_server() {
        let (core, _rx) = stream_core();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        core.on_error(Box::new(move |error| lock(&sink).push(error.message())));
        core.end();
        core.abort(GrpcStatus::unavailable("stream reset").into());
        assert_eq!(*lock(&errors), vec!["stream reset".to_string()]);
        assert!(!core.push_data(1));
    }

    #[test]
    fn test_both_directions_closed_releases_listeners() {
        let (core, _rx) = stream_core();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        core.on_cancelled(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        core.on_data(Box::new(|_| {}));
        core.half_close();
        core.end();
        core.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
        assert!(core.is_closed());

        let (tx, _rx) = mpsc::unbounded_channel();
        let core: LocalCallCore<u32, u32> = LocalCallCore::new("/test/Watch", ClientSink::Stream(tx)).without_inbound();
        let counter = cancelled.clone();
        core.on_cancelled(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        core.end();
        core.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }
}
