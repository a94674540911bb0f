//! 一元调用

use std::fmt;
use std::sync::Arc;
use crate::utils::logger::{debug, info, warn};
use super::call_state::{CallSnapshot, CallState};
use super::call_traits::{Cancellable, RequestReadable, ServerCall, UnaryRespondable};
use super::config::ChainOptions;
use super::context::Context;
use super::listeners::OnceEvent;
use super::request_handler_core::{execute_handlers, HandlerList};
use super::responder::Responder;
use super::transport::{UnaryCallback, UnaryCore};
use super::types::{CallError, CallShape, Message, MethodDescriptor, UnaryOutcome};

struct UnaryInner<Req, Res> {
    ctx: Context,
    options: Arc<ChainOptions>,
    request: Req,
    state: Arc<CallState>,
    responder: Responder<Res>,
    cancelled: OnceEvent<()>,
}

/// 一元调用外观
pub struct UnaryCall<Req, Res> {
    inner: Arc<UnaryInner<Req, Res>>,
}

impl<Req, Res> Clone for UnaryCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req: Message, Res: Message> UnaryCall<Req, Res> {
    pub(crate) fn new(
        ctx: Context,
        options: Arc<ChainOptions>,
        request: Req,
        callback: UnaryCallback<Res>,
    ) -> Self {
        Self {
            inner: Arc::new(UnaryInner {
                ctx,
                options,
                request,
                state: Arc::new(CallState::new(CallShape::Unary)),
                responder: Responder::new(callback),
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
        info!("🛑 一元调用被客户端取消: {} [{}]", inner.ctx.path(), inner.ctx.request_id());
        inner.responder.abandon();
        inner.cancelled.fire(());
    }

    pub(crate) fn handle_transport_error(&self, error: CallError) {
        let inner = &self.inner;
        if !inner.responder.transport_failed(&inner.state, error.clone()) {
            return;
        }
        warn!("⚠️ 一元调用传输错误: {} [{}] {}", inner.ctx.path(), inner.ctx.request_id(), error);
        inner.cancelled.close();
    }
}

impl<Req: Message, Res: Message> ServerCall for UnaryCall<Req, Res> {
    fn context(&self) -> &Context {
        &self.inner.ctx
    }

    fn shape(&self) -> CallShape {
        CallShape::Unary
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
        }
    }
}

impl<Req: Message, Res: Message> Cancellable for UnaryCall<Req, Res> {
    fn on_cancelled(&self, listener: impl FnOnce() + Send + 'static) {
        self.inner.cancelled.subscribe(move |_| listener());
    }
}

impl<Req: Message, Res: Message> RequestReadable<Req> for UnaryCall<Req, Res> {
    fn request(&self) -> &Req {
        &self.inner.request
    }
}

impl<Req: Message, Res: Message> UnaryRespondable<Res> for UnaryCall<Req, Res> {
    fn send_response(&self, payload: Res) {
        let inner = &self.inner;
        if inner.responder.respond(&inner.state, &inner.ctx, payload) {
            inner.cancelled.close();
        }
    }

    fn on_response_sent(&self, listener: impl FnOnce(&UnaryOutcome<Res>) + Send + 'static) {
        self.inner.responder.sent.subscribe(listener);
    }

    fn response_sent(&self) -> bool {
        self.inner.state.snapshot().response_sent
    }
}

impl<Req, Res> fmt::Debug for UnaryCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryCall")
            .field("path", &self.inner.ctx.path())
            .field("request_id", &self.inner.ctx.request_id())
            .field("state", &self.inner.state.snapshot())
            .finish()
    }
}

/// 一元方法的可注册服务
pub struct UnaryService<Req, Res> {
    method: MethodDescriptor,
    options: Arc<ChainOptions>,
    handlers: HandlerList<UnaryCall<Req, Res>>,
}

impl<Req, Res> Clone for UnaryService<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            options: self.options.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<Req: Message, Res: Message> UnaryService<Req, Res> {
    pub(crate) fn new(
        method: MethodDescriptor,
        options: Arc<ChainOptions>,
        handlers: HandlerList<UnaryCall<Req, Res>>,
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
    pub fn call<K>(&self, core: Arc<K>, callback: UnaryCallback<Res>)
    where
        K: UnaryCore<Req> + ?Sized,
    {
        let ctx = Context::new(self.method.clone(), self.options.settings.request_id_length);
        debug!("🔄 一元调用开始: {} [{}]", ctx.path(), ctx.request_id());
        let call = UnaryCall::new(ctx, self.options.clone(), core.request(), callback);

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

impl<Req, Res> fmt::Debug for UnaryService<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryService")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
