//! 客户端流调用

use std::fmt;
use std::sync::Arc;
use crate::utils::logger::{debug, info, warn};
use super::call_state::{CallSnapshot, CallState};
use super::call_traits::{Cancellable, MessageReadable, ServerCall, UnaryRespondable};
use super::config::ChainOptions;
use super::context::Context;
use super::gate::GateNext;
use super::listeners::OnceEvent;
use super::request_handler_core::{execute_handlers, HandlerList};
use super::request_stream::InboundStream;
use super::responder::Responder;
use super::sequence::Next;
use super::transport::{ClientStreamCore, UnaryCallback};
use super::types::{CallError, CallShape, Message, MethodDescriptor, StreamEnd, UnaryOutcome};

struct ClientStreamInner<Req, Res> {
    ctx: Context,
    options: Arc<ChainOptions>,
    state: Arc<CallState>,
    responder: Responder<Res>,
    inbound: Arc<InboundStream<Req>>,
    cancelled: OnceEvent<()>,
}

/// 客户端流调用外观
///
/// 发出响应（或错误）之后入站流随即结束，之后到达的消息全部丢弃。
pub struct ClientStreamCall<Req, Res> {
    inner: Arc<ClientStreamInner<Req, Res>>,
}

impl<Req, Res> Clone for ClientStreamCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req: Message, Res: Message> ClientStreamCall<Req, Res> {
    pub(crate) fn new(ctx: Context, options: Arc<ChainOptions>, callback: UnaryCallback<Res>) -> Self {
        let state = Arc::new(CallState::new(CallShape::ClientStream));
        Self {
            inner: Arc::new(ClientStreamInner {
                ctx,
                options,
                inbound: Arc::new(InboundStream::new(state.clone())),
                state,
                responder: Responder::new(callback),
                cancelled: OnceEvent::new(),
            }),
        }
    }

    pub(crate) fn start_forwarding(&self) {
        self.inner.inbound.start_forwarding();
    }

    pub(crate) fn handle_transport_data(&self, message: Req) {
        self.inner.inbound.push(message);
    }

    pub(crate) fn handle_transport_end(&self) {
        debug!("📥 客户端流半关闭: {} [{}]", self.inner.ctx.path(), self.inner.ctx.request_id());
        self.inner.inbound.end_from_transport();
    }

    pub(crate) fn handle_transport_cancel(&self) {
        let inner = &self.inner;
        if !inner.state.record_cancelled() {
            debug!("调用已结束，忽略取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
            return;
        }
        info!("🛑 客户端流调用被客户端取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
        inner.responder.abandon();
        inner.cancelled.fire(());
        inner.inbound.finish();
    }

    pub(crate) fn handle_transport_error(&self, error: CallError) {
        let inner = &self.inner;
        if !inner.responder.transport_failed(&inner.state, error.clone()) {
            return;
        }
        warn!("⚠️ 客户端流调用传输错误: {} [{}] {}", inner.ctx.path(), inner.ctx.request_id(), error);
        inner.cancelled.close();
        inner.inbound.finish();
    }
}

impl<Req: Message, Res: Message> ServerCall for ClientStreamCall<Req, Res> {
    fn context(&self) -> &Context {
        &self.inner.ctx
    }

    fn shape(&self) -> CallShape {
        CallShape::ClientStream
    }

    fn snapshot(&self) -> CallSnapshot {
        self.inner.state.snapshot()
    }

    fn send_error(&self, error: impl Into<CallError>) {
        let inner = &self.inner;
        if inner
            .responder
            .fail(&inner.state, &inner.options, &inner.ctx, error.into())
        {
            inner.cancelled.close();
            inner.inbound.finish();
        }
    }
}

impl<Req: Message, Res: Message> Cancellable for ClientStreamCall<Req, Res> {
    fn on_cancelled(&self, listener: impl FnOnce() + Send + 'static) {
        self.inner.cancelled.subscribe(move |_| listener());
    }
}

impl<Req: Message, Res: Message> UnaryRespondable<Res> for ClientStreamCall<Req, Res> {
    fn send_response(&self, payload: Res) {
        let inner = &self.inner;
        if inner.responder.respond(&inner.state, &inner.ctx, payload) {
            inner.cancelled.close();
            inner.inbound.finish();
        }
    }

    fn on_response_sent(&self, listener: impl FnOnce(&UnaryOutcome<Res>) + Send + 'static) {
        self.inner.responder.sent.subscribe(listener);
    }

    fn response_sent(&self) -> bool {
        self.inner.state.snapshot().response_sent
    }
}

impl<Req: Message, Res: Message> MessageReadable<Req> for ClientStreamCall<Req, Res> {
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

impl<Req, Res> fmt::Debug for ClientStreamCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStreamCall")
            .field("path", &self.inner.ctx.path())
            .field("request_id", &self.inner.ctx.request_id())
            .field("state", &self.inner.state.snapshot())
            .finish()
    }
}

/// 客户端流方法的可注册服务
pub struct ClientStreamService<Req, Res> {
    method: MethodDescriptor,
    options: Arc<ChainOptions>,
    handlers: HandlerList<ClientStreamCall<Req, Res>>,
}

impl<Req, Res> Clone for ClientStreamService<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            options: self.options.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<Req: Message, Res: Message> ClientStreamService<Req, Res> {
    pub(crate) fn new(
        method: MethodDescriptor,
        options: Arc<ChainOptions>,
        handlers: HandlerList<ClientStreamCall<Req, Res>>,
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
    ///
    /// 处理器链全部继续之后才开始接收入站消息，在此之前到达的消息由传输层暂存。
    pub fn call<K>(&self, core: Arc<K>, callback: UnaryCallback<Res>)
    where
        K: ClientStreamCore<Req> + ?Sized,
    {
        let ctx = Context::new(self.method.clone(), self.options.settings.request_id_length);
        debug!("🔄 客户端流调用开始: {} [{}]", ctx.path(), ctx.request_id());
        let call = ClientStreamCall::new(ctx, self.options.clone(), callback);

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

impl<Req, Res> fmt::Debug for ClientStreamService<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStreamService")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
