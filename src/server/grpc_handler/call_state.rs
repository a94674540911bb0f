//! 调用状态
//!
//! 记录一次调用 "已经发生了什么"，并负责只发生一次 / 先到先得的规则。
//! 所有外观（facade）对终态的判断都从这里取，不在各处散落布尔判断。

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use serde::Serialize;
use crate::utils::sync::lock;
use super::types::{CallError, CallShape, Direction, ErrorOrigin, StreamEnd};

/// 调用状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub response_sent: bool,
    pub error_occurred: bool,
    pub cancelled: bool,
    pub in_stream_ended: bool,
    pub out_stream_ended: bool,
    #[serde(skip)]
    pub error: Option<CallError>,
    pub error_origin: Option<ErrorOrigin>,
}

impl CallSnapshot {
    pub(crate) fn stream_end(&self) -> StreamEnd {
        StreamEnd {
            error: self.error.clone(),
            cancelled: self.cancelled,
        }
    }

    /// 以 JSON 形式输出（包含错误文本），用于日志和诊断
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let (Some(object), Some(error)) = (value.as_object_mut(), &self.error) {
            object.insert("error".to_string(), serde_json::Value::String(error.to_string()));
        }
        value
    }
}

/// 每次调用一个实例，绝不跨调用复用
#[derive(Debug)]
pub struct CallState {
    shape: CallShape,
    flags: Mutex<CallSnapshot>,
    /// 处理器错误已占位，错误转换钩子只会为它执行一次
    error_claimed: AtomicBool,
}

impl CallState {
    pub fn new(shape: CallShape) -> Self {
        Self {
            shape,
            flags: Mutex::new(CallSnapshot::default()),
            error_claimed: AtomicBool::new(false),
        }
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// 是否已经有终态（响应、错误、取消，或流已全部关闭）
    ///
    /// 双向流的两个方向各自结束，只有两个方向都关闭后才算终态；
    /// 服务端流只有出站方向，出站关闭即终态。
    fn terminal(&self, flags: &CallSnapshot) -> bool {
        if flags.response_sent || flags.error_occurred || flags.cancelled {
            return true;
        }
        match self.shape {
            CallShape::BidiStream => flags.in_stream_ended && flags.out_stream_ended,
            shape => shape.has_response_stream() && flags.out_stream_ended,
        }
    }

    /// 处理器已经不能再结束这次调用：有终态，或出站流已关闭
    fn closed_for_handler(&self, flags: &CallSnapshot) -> bool {
        self.terminal(flags) || (self.shape.has_response_stream() && flags.out_stream_ended)
    }

    /// 为处理器错误占位，成功后才执行错误转换钩子
    ///
    /// 并发的多次 `send_error` 只有一个能占位成功。
    pub fn claim_handler_error(&self) -> bool {
        let flags = lock(&self.flags);
        if self.closed_for_handler(&flags) {
            return false;
        }
        !self.error_claimed.swap(true, Ordering::SeqCst)
    }

    /// 记录响应已发送，返回是否成功（失败时调用方不得转发到传输层）
    pub fn record_response_sent(&self) -> bool {
        let mut flags = lock(&self.flags);
        if self.terminal(&flags) {
            return false;
        }
        flags.response_sent = true;
        true
    }

    /// 记录错误
    ///
    /// 处理器发出的错误在一元 / 客户端流调用上同时视为已发送的响应。
    pub fn record_error(&self, error: CallError, origin: ErrorOrigin) -> bool {
        let mut flags = lock(&self.flags);
        let closed = match origin {
            ErrorOrigin::Handler => self.closed_for_handler(&flags),
            ErrorOrigin::Transport => self.terminal(&flags),
        };
        if closed {
            return false;
        }
        flags.error_occurred = true;
        flags.error = Some(error);
        flags.error_origin = Some(origin);
        if origin == ErrorOrigin::Handler && !self.shape.has_response_stream() {
            flags.response_sent = true;
        }
        true
    }

    /// 记录取消，只有在尚无终态时才会成功
    pub fn record_cancelled(&self) -> bool {
        let mut flags = lock(&self.flags);
        if self.terminal(&flags) {
            return false;
        }
        flags.cancelled = true;
        true
    }

    /// 标记某个方向的流已结束（幂等），返回本次是否发生了状态迁移
    pub fn record_stream_ended(&self, direction: Direction) -> bool {
        let mut flags = lock(&self.flags);
        let ended = match direction {
            Direction::Inbound => &mut flags.in_stream_ended,
            Direction::Outbound => &mut flags.out_stream_ended,
        };
        if *ended {
            return false;
        }
        *ended = true;
        true
    }

    /// 是否已有终态
    pub fn is_terminal(&self) -> bool {
        let flags = lock(&self.flags);
        self.terminal(&flags)
    }

    /// 出站方向是否已不能再写
    pub fn is_outbound_closed(&self) -> bool {
        let flags = lock(&self.flags);
        self.closed_for_handler(&flags)
    }

    pub fn is_stream_ended(&self, direction: Direction) -> bool {
        let flags = lock(&self.flags);
        match direction {
            Direction::Inbound => flags.in_stream_ended,
            Direction::Outbound => flags.out_stream_ended,
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        lock(&self.flags).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::GrpcStatus;

    fn status_error() -> CallError {
        CallError::Status(GrpcStatus::unauthenticated("Invalid token"))
    }

    #[test]
    fn test_first_terminal_wins() {
        let state = CallState::new(CallShape::Unary);
        assert!(state.record_response_sent());
        assert!(!state.record_response_sent());
        assert!(!state.record_error(status_error(), ErrorOrigin::Handler));
        assert!(!state.record_cancelled());

        let snapshot = state.snapshot();
        assert!(snapshot.response_sent);
        assert!(!snapshot.error_occurred);
        assert!(!snapshot.cancelled);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_handler_error_counts_as_response() {
        let state = CallState::new(CallShape::ClientStream);
        assert!(state.record_error(status_error(), ErrorOrigin::Handler));
        let snapshot = state.snapshot();
        assert!(snapshot.response_sent);
        assert!(snapshot.error_occurred);
        assert_eq!(snapshot.error, Some(status_error()));
        assert_eq!(snapshot.error_origin, Some(ErrorOrigin::Handler));
        assert!(!state.record_cancelled());
    }

    #[test]
    fn test_transport_error_is_not_a_response() {
        let state = CallState::new(CallShape::Unary);
        assert!(state.record_error(status_error(), ErrorOrigin::Transport));
        let snapshot = state.snapshot();
        assert!(!snapshot.response_sent);
        assert!(snapshot.error_occurred);
        assert!(!state.record_response_sent());
    }

    #[test]
    fn test_cancel_blocks_later_terminals() {
        let state = CallState::new(CallShape::Unary);
        assert!(state.record_cancelled());
        assert!(!state.record_response_sent());
        assert!(!state.record_error(status_error(), ErrorOrigin::Handler));
        assert!(state.snapshot().cancelled);
    }

    #[test]
    fn test_stream_end_is_idempotent() {
        let state = CallState::new(CallShape::BidiStream);
        assert!(state.record_stream_ended(Direction::Inbound));
        assert!(!state.record_stream_ended(Direction::Inbound));
        assert!(!state.is_stream_ended(Direction::Outbound));
        // 入站结束不影响出站的终态
        assert!(!state.is_terminal());
        assert!(state.record_stream_ended(Direction::Outbound));
        assert!(state.is_terminal());
        assert!(!state.record_cancelled());
    }

    #[test]
    fn test_bidi_cancel_after_outbound_end() {
        let state = CallState::new(CallShape::BidiStream);
        assert!(state.record_stream_ended(Direction::Outbound));
        // 入站仍然开着，取消依然生效
        assert!(!state.is_terminal());
        assert!(state.is_outbound_closed());
        assert!(!state.claim_handler_error());
        assert!(!state.record_error(status_error(), ErrorOrigin::Handler));
        assert!(state.record_cancelled());
        assert!(state.snapshot().cancelled);
    }

    #[test]
    fn test_bidi_transport_error_after_outbound_end() {
        let state = CallState::new(CallShape::BidiStream);
        assert!(state.record_stream_ended(Direction::Outbound));
        assert!(state.record_error(status_error(), ErrorOrigin::Transport));
        assert_eq!(state.snapshot().error_origin, Some(ErrorOrigin::Transport));
        assert!(!state.record_cancelled());
    }

    #[test]
    fn test_server_stream_end_is_terminal() {
        let state = CallState::new(CallShape::ServerStream);
        assert!(state.record_stream_ended(Direction::Outbound));
        assert!(state.is_terminal());
        assert!(!state.record_cancelled());
        assert!(!state.record_error(status_error(), ErrorOrigin::Transport));
    }

    #[test]
    fn test_handler_error_claimed_once() {
        let state = CallState::new(CallShape::Unary);
        assert!(state.claim_handler_error());
        assert!(!state.claim_handler_error());
        // 占位之后取消仍可能先到
        assert!(state.record_cancelled());
        assert!(!state.record_error(status_error(), ErrorOrigin::Handler));
    }

    #[test]
    fn test_snapshot_json() {
        let state = CallState::new(CallShape::Unary);
        state.record_error(status_error(), ErrorOrigin::Transport);
        let json = state.snapshot().to_json();
        assert_eq!(json["error_occurred"], serde_json::json!(true));
        assert_eq!(json["error_origin"], serde_json::json!("Transport"));
        assert_eq!(json["error"], serde_json::json!("[16 UNAUTHENTICATED]: Invalid token"));
    }

    #[test]
    fn test_client_stream_end_does_not_block_response() {
        let state = CallState::new(CallShape::ClientStream);
        assert!(state.record_stream_ended(Direction::Inbound));
        assert!(state.record_response_sent());
    }
}
