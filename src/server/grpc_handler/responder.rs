//! 单响应调用（一元、客户端流）共用的响应部分

use std::sync::Mutex;
use crate::utils::logger::debug;
use crate::utils::sync::lock;
use super::call_state::CallState;
use super::config::ChainOptions;
use super::context::Context;
use super::listeners::OnceEvent;
use super::transport::UnaryCallback;
use super::types::{CallError, ErrorOrigin, GrpcStatus, Message, UnaryOutcome};

pub(crate) struct Responder<Res> {
    callback: Mutex<Option<UnaryCallback<Res>>>,
    pub(crate) sent: OnceEvent<UnaryOutcome<Res>>,
}

impl<Res: Message> Responder<Res> {
    pub(crate) fn new(callback: UnaryCallback<Res>) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
            sent: OnceEvent::new(),
        }
    }

    fn deliver(&self, result: Result<Res, GrpcStatus>) {
        let callback = lock(&self.callback).take();
        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// 发送成功响应，返回是否生效
    pub(crate) fn respond(&self, state: &CallState, ctx: &Context, payload: Res) -> bool {
        if !state.record_response_sent() {
            debug!("🚫 调用已有终态，忽略响应: {} [{}]", ctx.path(), ctx.request_id());
            return false;
        }
        debug!("📤 发送响应: {} [{}]", ctx.path(), ctx.request_id());
        self.deliver(Ok(payload.clone()));
        self.sent.fire(Ok(payload));
        true
    }

    /// 处理器发送错误，返回是否生效
    pub(crate) fn fail(
        &self,
        state: &CallState,
        options: &ChainOptions,
        ctx: &Context,
        error: CallError,
    ) -> bool {
        if !state.claim_handler_error() {
            debug!("🚫 调用已有终态，忽略错误: {} [{}]", ctx.path(), ctx.request_id());
            return false;
        }
        let status = options.transform_error(error, ctx);
        if !state.record_error(CallError::Status(status.clone()), ErrorOrigin::Handler) {
            return false;
        }
        debug!("📤 发送错误响应: {} [{}] {}", ctx.path(), ctx.request_id(), status);
        self.deliver(Err(status.clone()));
        self.sent.fire(Err(CallError::Status(status)));
        true
    }

    /// 传输层错误：不经过钩子，也不回调传输层，只通知监听器
    pub(crate) fn transport_failed(&self, state: &CallState, error: CallError) -> bool {
        if !state.record_error(error.clone(), ErrorOrigin::Transport) {
            return false;
        }
        lock(&self.callback).take();
        self.sent.fire(Err(error));
        true
    }

    /// 对端取消后响应再也不会发出
    pub(crate) fn abandon(&self) {
        lock(&self.callback).take();
        self.sent.close();
    }
}
