use std::fmt;
use std::sync::Arc;
use super::bidirectional_request_handler::BidiStreamCall;
use super::client_stream_handler::ClientStreamCall;
use super::sequence::Next;
use super::server_stream_handler::ServerStreamCall;
use super::service_call::ServiceCall;
use super::types::{CallShape, Message};
use super::unary_request_handler::UnaryCall;

/// 链上的单个处理器
///
/// 处理器要么调用 `next.run()` 把调用交给下一个处理器，要么不调用而让链停在这里
/// （通常是已经发送了响应或错误）。`next` 可以被移动到其他任务中稍后调用。
pub trait Handler<C>: Send + Sync + 'static {
    fn handle(&self, call: C, next: Next);
}

impl<C, F> Handler<C> for F
where
    F: Fn(C, Next) + Send + Sync + 'static,
{
    fn handle(&self, call: C, next: Next) {
        self(call, next)
    }
}

/// 按调用形态区分的处理器
///
/// `Generic` 处理器接收 [`ServiceCall`]，可以挂在任何形态的方法上（鉴权、日志等通用中间件）。
pub enum CallHandler<Req, Res> {
    Unary(Arc<dyn Handler<UnaryCall<Req, Res>>>),
    ClientStream(Arc<dyn Handler<ClientStreamCall<Req, Res>>>),
    ServerStream(Arc<dyn Handler<ServerStreamCall<Req, Res>>>),
    BidiStream(Arc<dyn Handler<BidiStreamCall<Req, Res>>>),
    Generic(Arc<dyn Handler<ServiceCall<Req, Res>>>),
}

impl<Req: Message, Res: Message> CallHandler<Req, Res> {
    pub fn unary<F>(handler: F) -> Self
    where
        F: Fn(UnaryCall<Req, Res>, Next) + Send + Sync + 'static,
    {
        Self::Unary(Arc::new(handler))
    }

    pub fn client_stream<F>(handler: F) -> Self
    where
        F: Fn(ClientStreamCall<Req, Res>, Next) + Send + Sync + 'static,
    {
        Self::ClientStream(Arc::new(handler))
    }

    pub fn server_stream<F>(handler: F) -> Self
    where
        F: Fn(ServerStreamCall<Req, Res>, Next) + Send + Sync + 'static,
    {
        Self::ServerStream(Arc::new(handler))
    }

    pub fn bidi_stream<F>(handler: F) -> Self
    where
        F: Fn(BidiStreamCall<Req, Res>, Next) + Send + Sync + 'static,
    {
        Self::BidiStream(Arc::new(handler))
    }

    pub fn generic<F>(handler: F) -> Self
    where
        F: Fn(ServiceCall<Req, Res>, Next) + Send + Sync + 'static,
    {
        Self::Generic(Arc::new(handler))
    }

    /// 该处理器能处理的形态；`None` 表示任意形态
    pub fn shape(&self) -> Option<CallShape> {
        match self {
            Self::Unary(_) => Some(CallShape::Unary),
            Self::ClientStream(_) => Some(CallShape::ClientStream),
            Self::ServerStream(_) => Some(CallShape::ServerStream),
            Self::BidiStream(_) => Some(CallShape::BidiStream),
            Self::Generic(_) => None,
        }
    }
}

impl<Req, Res> Clone for CallHandler<Req, Res> {
    fn clone(&self) -> Self {
        match self {
            Self::Unary(h) => Self::Unary(h.clone()),
            Self::ClientStream(h) => Self::ClientStream(h.clone()),
            Self::ServerStream(h) => Self::ServerStream(h.clone()),
            Self::BidiStream(h) => Self::BidiStream(h.clone()),
            Self::Generic(h) => Self::Generic(h.clone()),
        }
    }
}

impl<Req, Res> fmt::Debug for CallHandler<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Unary(_) => "Unary",
            Self::ClientStream(_) => "ClientStream",
            Self::ServerStream(_) => "ServerStream",
            Self::BidiStream(_) => "BidiStream",
            Self::Generic(_) => "Generic",
        };
        f.debug_tuple("CallHandler").field(&kind).finish()
    }
}
