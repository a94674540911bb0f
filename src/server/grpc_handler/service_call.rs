use super::bidirectional_request_handler::BidiStreamCall;
use super::call_state::CallSnapshot;
use super::call_traits::{Cancellable, ServerCall};
use super::client_stream_handler::ClientStreamCall;
use super::context::Context;
use super::server_stream_handler::ServerStreamCall;
use super::types::{CallError, CallShape, Message};
use super::unary_request_handler::UnaryCall;

/// 任意形态的调用，交给通用处理器使用
#[derive(Debug)]
pub enum ServiceCall<Req, Res> {
    Unary(UnaryCall<Req, Res>),
    ClientStream(ClientStreamCall<Req, Res>),
    ServerStream(ServerStreamCall<Req, Res>),
    BidiStream(BidiStreamCall<Req, Res>),
}

impl<Req, Res> Clone for ServiceCall<Req, Res> {
    fn clone(&self) -> Self {
        match self {
            Self::Unary(call) => Self::Unary(call.clone()),
            Self::ClientStream(call) => Self::ClientStream(call.clone()),
            Self::ServerStream(call) => Self::ServerStream(call.clone()),
            Self::BidiStream(call) => Self::BidiStream(call.clone()),
        }
    }
}

macro_rules! each_call {
    ($value:expr, $call:ident => $body:expr) => {
        match $value {
            ServiceCall::Unary($call) => $body,
            ServiceCall::ClientStream($call) => $body,
            ServiceCall::ServerStream($call) => $body,
            ServiceCall::BidiStream($call) => $body,
        }
    };
}

impl<Req: Message, Res: Message> ServerCall for ServiceCall<Req, Res> {
    fn context(&self) -> &Context {
        each_call!(self, call => call.context())
    }

    fn shape(&self) -> CallShape {
        each_call!(self, call => call.shape())
    }

    fn snapshot(&self) -> CallSnapshot {
        each_call!(self, call => call.snapshot())
    }

    fn send_error(&self, error: impl Into<CallError>) {
        let error = error.into();
        each_call!(self, call => call.send_error(error))
    }
}

impl<Req: Message, Res: Message> Cancellable for ServiceCall<Req, Res> {
    fn on_cancelled(&self, listener: impl FnOnce() + Send + 'static) {
        each_call!(self, call => call.on_cancelled(listener))
    }
}
