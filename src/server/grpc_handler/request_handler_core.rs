//! 处理器链核心：执行器和链构建

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use crate::error::{ChainError, ChainResult};
use crate::utils::logger::{debug, error, info};
use super::bidirectional_request_handler::{BidiStreamCall, BidiStreamService};
use super::call_traits::ServerCall;
use super::client_stream_handler::{ClientStreamCall, ClientStreamService};
use super::config::ChainOptions;
use super::handler_traits::{CallHandler, Handler};
use super::sequence::{Next, Sequence};
use super::server_stream_handler::{ServerStreamCall, ServerStreamService};
use super::service_call::ServiceCall;
use super::types::{CallError, CallShape, Message, MethodDescriptor};
use super::unary_request_handler::{UnaryCall, UnaryService};

/// 某一形态的处理器列表，构建后不再变化
pub type HandlerList<C> = Arc<[Arc<dyn Handler<C>>]>;

/// 处理器 panic 被捕获后记录的错误
#[derive(Debug, Error)]
#[error("处理器 {index} 发生 panic: {message}")]
pub struct HandlerPanic {
    pub index: usize,
    pub message: String,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 按顺序执行处理器
///
/// 第 i 个处理器调用 `next.run()` 之后才会执行第 i+1 个；最后一个处理器继续之后调用 `on_complete`。
/// 某个处理器不调用 `next` 时链条停止，`on_complete` 永远不会被调用。
pub(crate) fn execute_handlers<C, F>(call: C, handlers: HandlerList<C>, catch_panics: bool, on_complete: F)
where
    C: ServerCall,
    F: FnOnce() + Send + 'static,
{
    let len = handlers.len();
    Sequence::start(
        len,
        move |index, (), cont| {
            let handler = &handlers[index];
            let next = Next::new(move || cont.resume(()));
            if !catch_panics {
                handler.handle(call.clone(), next);
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(call.clone(), next)));
            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                error!(
                    "❌ 处理器 {} 发生 panic: {} [{}] {}",
                    index,
                    call.context().path(),
                    call.context().request_id(),
                    message
                );
                call.send_error(CallError::other(HandlerPanic { index, message }));
            }
        },
        move |()| on_complete(),
        (),
    );
}

/// 已构建好的方法服务，按形态区分
#[derive(Debug)]
pub enum ServiceHandler<Req, Res> {
    Unary(UnaryService<Req, Res>),
    ClientStream(ClientStreamService<Req, Res>),
    ServerStream(ServerStreamService<Req, Res>),
    BidiStream(BidiStreamService<Req, Res>),
}

impl<Req, Res> Clone for ServiceHandler<Req, Res> {
    fn clone(&self) -> Self {
        match self {
            Self::Unary(s) => Self::Unary(s.clone()),
            Self::ClientStream(s) => Self::ClientStream(s.clone()),
            Self::ServerStream(s) => Self::ServerStream(s.clone()),
            Self::BidiStream(s) => Self::BidiStream(s.clone()),
        }
    }
}

impl<Req: Message, Res: Message> ServiceHandler<Req, Res> {
    pub fn method(&self) -> &MethodDescriptor {
        match self {
            Self::Unary(s) => s.method(),
            Self::ClientStream(s) => s.method(),
            Self::ServerStream(s) => s.method(),
            Self::BidiStream(s) => s.method(),
        }
    }

    pub fn shape(&self) -> CallShape {
        self.method().shape()
    }

    pub fn as_unary(&self) -> Option<&UnaryService<Req, Res>> {
        match self {
            Self::Unary(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_client_stream(&self) -> Option<&ClientStreamService<Req, Res>> {
        match self {
            Self::ClientStream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_server_stream(&self) -> Option<&ServerStreamService<Req, Res>> {
        match self {
            Self::ServerStream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bidi_stream(&self) -> Option<&BidiStreamService<Req, Res>> {
        match self {
            Self::BidiStream(s) => Some(s),
            _ => None,
        }
    }
}

/// 处理器链工厂
///
/// 一个 `Chain` 携带共享的选项（错误转换钩子等），可以为任意多个方法构建服务。
#[derive(Clone, Default)]
pub struct Chain {
    options: Arc<ChainOptions>,
}

impl Chain {
    pub fn new(options: ChainOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    /// 为一个方法构建服务
    ///
    /// 处理器列表不能为空；特定形态的处理器必须与方法形态一致，通用处理器可以出现在任何位置。
    pub fn build<Req: Message, Res: Message>(
        &self,
        method: MethodDescriptor,
        handlers: Vec<CallHandler<Req, Res>>,
    ) -> ChainResult<ServiceHandler<Req, Res>> {
        if handlers.is_empty() {
            return Err(ChainError::EmptyChain {
                method: method.path.clone(),
            });
        }
        self.options.settings.validate()?;

        let shape = method.shape();
        for (index, handler) in handlers.iter().enumerate() {
            if let Some(found) = handler.shape() {
                if found != shape {
                    return Err(ChainError::HandlerShapeMismatch {
                        method: method.path.clone(),
                        index,
                        expected: shape,
                        found,
                    });
                }
            }
        }

        debug!("🔧 构建处理器链: {} ({}, {} 个处理器)", method.path, shape, handlers.len());
        let options = self.options.clone();
        let service = match shape {
            CallShape::Unary => ServiceHandler::Unary(UnaryService::new(
                method,
                options,
                collect_handlers(handlers, unary_handler),
            )),
            CallShape::ClientStream => ServiceHandler::ClientStream(ClientStreamService::new(
                method,
                options,
                collect_handlers(handlers, client_stream_handler),
            )),
            CallShape::ServerStream => ServiceHandler::ServerStream(ServerStreamService::new(
                method,
                options,
                collect_handlers(handlers, server_stream_handler),
            )),
            CallShape::BidiStream => ServiceHandler::BidiStream(BidiStreamService::new(
                method,
                options,
                collect_handlers(handlers, bidi_stream_handler),
            )),
        };
        info!("✅ 处理器链已就绪: {}", service.method().path);
        Ok(service)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("options", &self.options).finish()
    }
}

fn collect_handlers<Req, Res, C, F>(handlers: Vec<CallHandler<Req, Res>>, adapt: F) -> HandlerList<C>
where
    F: Fn(CallHandler<Req, Res>) -> Option<Arc<dyn Handler<C>>>,
{
    handlers.into_iter().filter_map(adapt).collect()
}

/// 把通用处理器包装成特定形态的处理器
fn wrap_generic<Req, Res, C>(
    generic: Arc<dyn Handler<ServiceCall<Req, Res>>>,
    lift: fn(C) -> ServiceCall<Req, Res>,
) -> Arc<dyn Handler<C>>
where
    Req: Message,
    Res: Message,
    C: Send + 'static,
{
    Arc::new(move |call: C, next: Next| generic.handle(lift(call), next))
}

fn unary_handler<Req: Message, Res: Message>(
    handler: CallHandler<Req, Res>,
) -> Option<Arc<dyn Handler<UnaryCall<Req, Res>>>> {
    match handler {
        CallHandler::Unary(h) => Some(h),
        CallHandler::Generic(g) => Some(wrap_generic(g, ServiceCall::Unary)),
        _ => None,
    }
}

fn client_stream_handler<Req: Message, Res: Message>(
    handler: CallHandler<Req, Res>,
) -> Option<Arc<dyn Handler<ClientStreamCall<Req, Res>>>> {
    match handler {
        CallHandler::ClientStream(h) => Some(h),
        CallHandler::Generic(g) => Some(wrap_generic(g, ServiceCall::ClientStream)),
        _ => None,
    }
}

fn server_stream_handler<Req: Message, Res: Message>(
    handler: CallHandler<Req, Res>,
) -> Option<Arc<dyn Handler<ServerStreamCall<Req, Res>>>> {
    match handler {
        CallHandler::ServerStream(h) => Some(h),
        CallHandler::Generic(g) => Some(wrap_generic(g, ServiceCall::ServerStream)),
        _ => None,
    }
}

fn bidi_stream_handler<Req: Message, Res: Message>(
    handler: CallHandler<Req, Res>,
) -> Option<Arc<dyn Handler<BidiStreamCall<Req, Res>>>> {
    match handler {
        CallHandler::BidiStream(h) => Some(h),
        CallHandler::Generic(g) => Some(wrap_generic(g, ServiceCall::BidiStream)),
        _ => None,
    }
}
