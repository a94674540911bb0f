//! 传输层能力接口
//!
//! 调用链只通过这几个 trait 和底层 RPC 库交互：注册取消 / 错误 / 结束 / 数据监听器，
//! 写出消息，结束流，以及一元调用的最终回调。字节层面的编解码不在这里。

use super::types::{CallError, GrpcStatus};

/// 一元 / 客户端流调用的最终回调
pub type UnaryCallback<Res> = Box<dyn FnOnce(Result<Res, GrpcStatus>) + Send>;

/// 所有调用形态共有的事件
pub trait CallCore: Send + Sync + 'static {
    /// 对端取消调用（客户端取消或连接断开）
    fn on_cancelled(&self, listener: Box<dyn FnOnce() + Send>);

    /// 传输层错误
    fn on_error(&self, listener: Box<dyn FnOnce(CallError) + Send>);
}

/// 携带单个已解码请求的调用（一元、服务端流）
pub trait RequestCore<Req>: CallCore {
    fn request(&self) -> Req;
}

/// 可读的入站流（客户端流、双向流）
pub trait ReadableCore<Req>: CallCore {
    /// 注册入站消息监听器；注册之前到达的消息由传输层暂存
    fn on_data(&self, listener: Box<dyn FnMut(Req) + Send>);

    /// 客户端半关闭
    fn on_end(&self, listener: Box<dyn FnOnce() + Send>);
}

/// 可写的出站流（服务端流、双向流）
pub trait WritableCore<Res>: CallCore {
    /// 写出一条消息，写完后调用 `done`
    fn write(&self, message: Res, done: Box<dyn FnOnce() + Send>);

    /// 正常结束出站流
    fn end(&self);

    /// 以错误状态结束出站流
    fn emit_error(&self, status: GrpcStatus);
}

/// 一元调用所需的传输能力
pub trait UnaryCore<Req>: RequestCore<Req> {}

impl<Req, T> UnaryCore<Req> for T where T: RequestCore<Req> + ?Sized {}

/// 客户端流调用所需的传输能力
pub trait ClientStreamCore<Req>: ReadableCore<Req> {}

impl<Req, T> ClientStreamCore<Req> for T where T: ReadableCore<Req> + ?Sized {}

/// 服务端流调用所需的传输能力
pub trait ServerStreamCore<Req, Res>: RequestCore<Req> + WritableCore<Res> {}

impl<Req, Res, T> ServerStreamCore<Req, Res> for T where T: RequestCore<Req> + WritableCore<Res> + ?Sized {}

/// 双向流调用所需的传输能力
pub trait DuplexCore<Req, Res>: ReadableCore<Req> + WritableCore<Res> {}

impl<Req, Res, T> DuplexCore<Req, Res> for T where T: ReadableCore<Req> + WritableCore<Res> + ?Sized {}
