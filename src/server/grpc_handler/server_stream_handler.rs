//! 服务端流调用

use std::fmt;
use std::sync::Arc;
use crate::utils::logger::{debug, info, warn};
use super::call_state::{CallSnapshot, CallState};
use super::call_traits::{Cancellable, MessageWritable, RequestReadable, ServerCall};
use super::config::ChainOptions;
use super::context::Context;
use super::gate::GateNext;
use super::listeners::OnceEvent;
use super::request_handler_core::{execute_handlers, HandlerList};
use super::response_stream::OutboundStream;
use super::transport::{ServerStreamCore, WritableCore};
use super::types::{CallError, CallShape, ErrorOrigin, Message, MethodDescriptor, StreamEnd};

struct ServerStreamInner<Req, Res> {
    ctx: Context,
    options: Arc<ChainOptions>,
    request: Req,
    state: Arc<CallState>,
    outbound: Arc<OutboundStream<Res>>,
    cancelled: OnceEvent<()>,
}

/// 服务端流调用外观
pub struct ServerStreamCall<Req, Res> {
    inner: Arc<ServerStreamInner<Req, Res>>,
}

impl<Req, Res> Clone for ServerStreamCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req: Message, Res: Message> ServerStreamCall<Req, Res> {
    pub(crate) fn new(
        ctx: Context,
        options: Arc<ChainOptions>,
        request: Req,
        core: Arc<dyn WritableCore<Res>>,
    ) -> Self {
        let state = Arc::new(CallState::new(CallShape::ServerStream));
        Self {
            inner: Arc::new(ServerStreamInner {
                ctx,
                options,
                request,
                outbound: Arc::new(OutboundStream::new(core, state.clone())),
                state,
                cancelled: OnceEvent::new(),
            }),
        }
    }

    pub(crate) fn handle_transport_cancel(&self) {
        let inner = &self.inner;
        if !inner.state.record_cancelled() {
            debug!("调用已结束，忽略取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
            return;
        }
        info!("🛑 服务端流调用被客户端取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
        inner.cancelled.fire(());
        inner.outbound.close(false);
    }

    pub(crate) fn handle_transport_error(&self, error: CallError) {
        let inner = &self.inner;
        if !inner.state.record_error(error.clone(), ErrorOrigin::Transport) {
            return;
        }
        warn!("⚠️ 服务端流调用传输错误: {} [{}] {}", inner.ctx.path(), inner.ctx.request_id(), error);
        inner.cancelled.close();
        inner.outbound.close(false);
    }
}

impl<Req: Message, Res: Message> ServerCall for ServerStreamCall<Req, Res> {
    fn context(&self) -> &Context {
        &self.inner.ctx
    }

    fn shape(&self) -> CallShape {
        CallShape::ServerStream
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
        debug!("📤 服务端流以错误结束: {} [{}] {}", inner.ctx.path(), inner.ctx.request_id(), status);
        inner.cancelled.close();
        inner.outbound.end_with_error(status);
    }
}

impl<Req: Message, Res: Message> Cancellable for ServerStreamCall<Req, Res> {
    fn on_cancelled(&self, listener: impl FnOnce() + Send + 'static) {
        self.inner.cancelled.subscribe(move |_| listener());
    }
}

impl<Req: Message, Res: Message> RequestReadable<Req> for ServerStreamCall<Req, Res> {
    fn request(&self) -> &Req {
        &self.inner.request
    }
}

impl<Req: Message, Res: Message> MessageWritable<Res> for ServerStreamCall<Req, Res> {
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
            debug!("✅ 服务端流正常结束: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
            inner.cancelled.close();
        }
    }

    fn on_out_stream_ended(&self, listener: impl FnOnce(&StreamEnd) + Send + 'static) {
        self.inner.outbound.ended.subscribe(listener);
    }

    fn out_stream_ended(&self) -> bool {
        self.inner.outbound.is_ended()
    }
}

impl<Req, Res> fmt::Debug for ServerStreamCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStreamCall")
            .field("path", &self.inner.ctx.path())
            .field("request_id", &self.inner.ctx.request_id())
            .field("state", &self.inner.state.snapshot())
            .finish()
    }
}

/// 服务端流方法的可注册服务
pub struct ServerStreamService<Req, Res> {
    method: MethodDescriptor,
    options: Arc<ChainOptions>,
    handlers: HandlerList<ServerStreamCall<Req, Res>>,
}

impl<Req, Res> Clone for ServerStreamService<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            options: self.options.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<Req: Message, Res: Message> ServerStreamService<Req, Res> {
    pub(crate) fn new(
        method: MethodDescriptor,
        options: Arc<ChainOptions>,
        handlers: HandlerList<ServerStreamCall<Req, Res>>,
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
        K: ServerStreamCore<Req, Res>,
    {
        let ctx = Context::new(self.method.clone(), self.options.settings.request_id_length);
        debug!("🔄 服务端流调用开始: {} [{}]", ctx.path(), ctx.request_id());
        let writer: Arc<dyn WritableCore<Res>> = core.clone();
        let call = ServerStreamCall::new(ctx, self.options.clone(), core.request(), writer);

        let cancel_call = call.clone();
        core.on_cancelled(Box::new(move || cancel_call.handle_transport_cancel()));
        let error_call = call.clone();
        core.on_error(Box::new(move |error| error_call.handle_transport_error(error)));

        execute_handlers(
            call,
            self.handlers.clone(),
            self.options.settings.catch_handler_panics,
            || {},
        );
    }
}

impl<Req, Res> fmt::Debug for ServerStreamService<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStreamService")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
