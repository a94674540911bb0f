//! 调用外观的能力接口
//!
//! 四种调用形态各自组合这些能力：
//!
//! | 形态 | 能力 |
//! |------|------|
//! | 一元 | [`ServerCall`] + [`Cancellable`] + [`RequestReadable`] + [`UnaryRespondable`] |
//! | 客户端流 | [`ServerCall`] + [`Cancellable`] + [`MessageReadable`] + [`UnaryRespondable`] |
//! | 服务端流 | [`ServerCall`] + [`Cancellable`] + [`RequestReadable`] + [`MessageWritable`] |
//! | 双向流 | [`ServerCall`] + [`Cancellable`] + [`MessageReadable`] + [`MessageWritable`] |

use super::call_state::CallSnapshot;
use super::context::Context;
use super::gate::GateNext;
use super::sequence::Next;
use super::types::{CallError, CallShape, StreamEnd, UnaryOutcome};

/// 所有调用形态共有的能力
pub trait ServerCall: Clone + Send + Sync + 'static {
    fn context(&self) -> &Context;

    fn shape(&self) -> CallShape;

    fn snapshot(&self) -> CallSnapshot;

    /// 以错误结束调用
    ///
    /// 错误先经过错误转换钩子再交给传输层；已有终态时静默忽略。
    fn send_error(&self, error: impl Into<CallError>);

    fn cancelled(&self) -> bool {
        self.snapshot().cancelled
    }

    fn error_occurred(&self) -> bool {
        self.snapshot().error_occurred
    }

    /// 已记录的错误
    fn error(&self) -> Option<CallError> {
        self.snapshot().error
    }
}

/// 对端取消通知
pub trait Cancellable {
    /// 只在尚无任何终态时对端取消才会触发，至多一次
    fn on_cancelled(&self, listener: impl FnOnce() + Send + 'static);
}

/// 携带单个请求
pub trait RequestReadable<Req> {
    fn request(&self) -> &Req;
}

/// 单个最终响应
pub trait UnaryRespondable<Res> {
    /// 发送响应；只有第一次终态动作生效，之后的调用没有任何副作用
    fn send_response(&self, payload: Res);

    /// 无论哪个终态动作胜出，都恰好通知一次
    fn on_response_sent(&self, listener: impl FnOnce(&UnaryOutcome<Res>) + Send + 'static);

    fn response_sent(&self) -> bool;
}

/// 入站消息流
pub trait MessageReadable<Req> {
    /// 入站消息在交给监听器之前经过的闸门
    fn add_inbound_gate(&self, gate: impl Fn(Req, GateNext<Req>) + Send + Sync + 'static);

    /// 注册消息监听器
    ///
    /// 监听器必须调用 `Next::run`，下一条消息才会开始处理。
    fn on_message(&self, listener: impl Fn(Req, Next) + Send + Sync + 'static);

    fn on_in_stream_ended(&self, listener: impl FnOnce(&StreamEnd) + Send + 'static);

    fn in_stream_ended(&self) -> bool;
}

/// 出站消息流
pub trait MessageWritable<Res> {
    /// 写出一条消息；流已结束、出错或被取消时静默丢弃
    fn send_message(&self, payload: Res);

    /// 同 [`send_message`](Self::send_message)，写完后调用 `on_written`
    fn send_message_with(&self, payload: Res, on_written: impl FnOnce() + Send + 'static);

    /// 出站消息在写给传输层之前经过的闸门
    fn add_outbound_gate(&self, gate: impl Fn(Res, GateNext<Res>) + Send + Sync + 'static);

    /// 每条消息写完都会通知
    fn on_message_written(&self, listener: impl Fn(&Res) + Send + Sync + 'static);

    /// 正常结束出站流（幂等）
    fn end_stream(&self);

    fn on_out_stream_ended(&self, listener: impl FnOnce(&StreamEnd) + Send + 'static);

    fn out_stream_ended(&self) -> bool;
}
