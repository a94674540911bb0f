//! 双向流调用
//!
//! 两个方向各自独立结束：客户端半关闭不影响出站，正常 `end_stream` 也不影响入站。
//! 只有错误和对端取消会同时关闭两个方向；出站已结束后到达的取消或传输错误仍会关闭入站。

use std::fmt;
use std::sync::{Arc, Weak};
use crate::utils::logger::{debug, info, warn};
use super::call_state::{CallSnapshot, CallState};
use super::call_traits::{Cancellable, MessageReadable, MessageWritable, ServerCall};
use super::config::ChainOptions;
use super::context::Context;
use super::gate::GateNext;
use super::listeners::OnceEvent;
use super::request_handler_core::{execute_handlers, HandlerList};
use super::request_stream::InboundStream;
use super::response_stream::OutboundStream;
use super::sequence::Next;
use super::transport::{DuplexCore, WritableCore};
use super::types::{CallError, CallShape, ErrorOrigin, Message, MethodDescriptor, StreamEnd};

struct BidiInner<Req, Res> {
    ctx: Context,
    options: Arc<ChainOptions>,
    state: Arc<CallState>,
    inbound: Arc<InboundStream<Req>>,
    outbound: Arc<OutboundStream<Res>>,
    cancelled: OnceEvent<()>,
}

/// 双向流调用外观
pub struct BidiStreamCall<Req, Res> {
    inner: Arc<BidiInner<Req, Res>>,
}

impl<Req, Res> Clone for BidiStreamCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req: Message, Res: Message> BidiStreamCall<Req, Res> {
    pub(crate) fn new(ctx: Context, options: Arc<ChainOptions>, core: Arc<dyn WritableCore<Res>>) -> Self {
        let state = Arc::new(CallState::new(CallShape::BidiStream));
        let inner = Arc::new(BidiInner {
            ctx,
            options,
            inbound: Arc::new(InboundStream::new(state.clone())),
            outbound: Arc::new(OutboundStream::new(core, state.clone())),
            state,
            cancelled: OnceEvent::new(),
        });
        let weak = Arc::downgrade(&inner);
        inner.inbound.ended.subscribe(move |_| Self::settle(&weak));
        Self { inner }
    }

    /// 两个方向都正常结束后取消已不可能发生
    fn settle(inner: &Weak<BidiInner<Req, Res>>) {
        if let Some(inner) = inner.upgrade() {
            if inner.outbound.is_ended() && inner.inbound.is_ended() {
                inner.cancelled.close();
            }
        }
    }

    pub(crate) fn start_forwarding(&self) {
        self.inner.inbound.start_forwarding();
    }

    pub(crate) fn handle_transport_data(&self, message: Req) {
        self.inner.inbound.push(message);
    }

    pub(crate) fn handle_transport_end(&self) {
        debug!("📥 双向流客户端半关闭: {} [{}]", self.inner.ctx.path(), self.inner.ctx.request_id());
        self.inner.inbound.end_from_transport();
    }

    pub(crate) fn handle_transport_cancel(&self) {
        let inner = &self.inner;
        if !inner.state.record_cancelled() {
            debug!("调用已结束，忽略取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
            return;
        }
        info!("🛑 双向流调用被客户端取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
        inner.cancelled.fire(());
        inner.inbound.finish();
        inner.outbound.close(false);
    }

    pub(crate) fn handle_transport_error(&self, error: CallError) {
        let inner = &self.inner;
        if !inner.state.record_error(error.clone(), ErrorOrigin::Transport) {
            return;
        }
        warn!("⚠️ 双向流调用传输错误: {} [{}] {}", inner.ctx.path(), inner.ctx.request_id(), error);
        inner.cancelled.close();
        inner.inbound.finish();
        inner.outbound.close(false);
    }
}

impl<Req: Message, Res: Message> ServerCall for BidiStreamCall<Req, Res> {
    fn context(&self) -> &Context {
        &self.inner.ctx
    }

    fn shape(&self) -> CallShape {
        CallShape::BidiStream
    }

    fn snapshot(&self) -> CallSnapshot {
        self.inner.state.snapshot()
    }

    fn send_error(&self, error: impl Into<CallError>) {
        let inner = &self.inner;
        if !inner.state.claim_handler_error() {
            debug!("🚫 调用已有终态，忽略错误: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
            return;
        }
        let status = inner.options.transform_error(error.into(), &inner.ctx);
        if !inner.state.record_error(CallError::Status(status.clone()), ErrorOrigin::Handler) {
            return;
        }
        debug!("📤 双向流以错误结束: {} [{}] {}", inner.ctx.path(), inner.ctx.request_id(), status);
        inner.cancelled.close();
        inner.outbound.end_with_error(status);
        inner.inbound.finish();
    }
}

impl<Req: Message, Res: Message> Cancellable for BidiStreamCall<Req, Res> {
    fn on_cancelled(&self, listener: impl FnOnce() + Send + 'static) {
        self.inner.cancelled.subscribe(move |_| listener());
    }
}

impl<Req: Message, Res: Message> MessageReadable<Req> for BidiStreamCall<Req, Res> {
    fn add_inbound_gate(&self, gate: impl Fn(Req, GateNext<Req>) + Send + Sync + 'static) {
        self.inner.inbound.add_gate(gate);
    }

    fn on_message(&self, listener: impl Fn(Req, Next) + Send + Sync + 'static) {
        self.inner.inbound.add_listener(listener);
    }

    fn on_in_stream_ended(&self, listener: impl FnOnce(&StreamEnd) + Send + 'static) {
        self.inner.inbound.ended.subscribe(listener);
    }

    fn in_stream_ended(&self) -> bool {
        self.inner.inbound.is_ended()
    }
}

impl<Req: Message, Res: Message> MessageWritable<Res> for BidiStreamCall<Req, Res> {
    fn send_message(&self, payload: Res) {
        self.inner.outbound.send(payload, None);
    }

    fn send_message_with(&self, payload: Res, on_written: impl FnOnce() + Send + 'static) {
        self.inner.outbound.send(payload, Some(Box::new(on_written)));
    }

    fn add_outbound_gate(&self, gate: impl Fn(Res, GateNext<Res>) + Send + Sync + 'static) {
        self.inner.outbound.add_gate(gate);
    }

    fn on_message_written(&self, listener: impl Fn(&Res) + Send + Sync + 'static) {
        self.inner.outbound.on_written(listener);
    }

    fn end_stream(&self) {
        let inner = &self.inner;
        if inner.outbound.end() {
            debug!("✅ 双向流出站方向结束: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
            Self::settle(&Arc::downgrade(inner));
        }
    }

    fn on_out_stream_ended(&self, listener: impl FnOnce(&StreamEnd) + Send + 'static) {
        self.inner.outbound.ended.subscribe(listener);
    }

    fn out_stream_ended(&self) -> bool {
        self.inner.outbound.is_ended()
    }
}

impl<Req, Res> fmt::Debug for BidiStreamCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidiStreamCall")
            .field("path", &self.inner.ctx.path())
            .field("request_id", &self.inner.ctx.request_id())
            .field("state", &self.inner.state.snapshot())
            .finish()
    }
}

/// 双向流方法的可注册服务
pub struct BidiStreamService<Req, Res> {
    method: MethodDescriptor,
    options: Arc<ChainOptions>,
    handlers: HandlerList<BidiStreamCall<Req, Res>>,
}

impl<Req, Res> Clone for BidiStreamService<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            options: self.options.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<Req: Message, Res: Message> BidiStreamService<Req, Res> {
    pub(crate) fn new(
        method: MethodDescriptor,
        options: Arc<ChainOptions>,
        handlers: HandlerList<BidiStreamCall<Req, Res>>,
    ) -> Self {
        Self {
            method,
            options,
            handlers,
        }
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// 处理一次到达的调用
    pub fn call<K>(&self, core: Arc<K>)
    where
        K: DuplexCore<Req, Res>,
    {
        let ctx = Context::new(self.method.clone(), self.options.settings.request_id_length);
        debug!("🔄 双向流调用开始: {} [{}]", ctx.path(), ctx.request_id());
        let writer: Arc<dyn WritableCore<Res>> = core.clone();
        let call = BidiStreamCall::new(ctx, self.options.clone(), writer);

        let cancel_call = call.clone();
        core.on_cancelled(Box::new(move || cancel_call.handle_transport_cancel()));
        let error_call = call.clone();
        core.on_error(Box::new(move |error| error_call.handle_transport_error(error)));
        let end_call = call.clone();
        core.on_end(Box::new(move || end_call.handle_transport_end()));

        let data_call = call.clone();
        execute_handlers(
            call,
            self.handlers.clone(),
            self.options.settings.catch_handler_panics,
            move || {
                data_call.start_forwarding();
                let sink = data_call.clone();
                core.on_data(Box::new(move |message| sink.handle_transport_data(message)));
            },
        );
    }
}

impl<Req, Res> fmt::Debug for BidiStreamService<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidiStreamService")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
