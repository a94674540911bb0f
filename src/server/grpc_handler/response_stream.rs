//! 出站消息流

use std::sync::Arc;
use crate::utils::logger::debug;
use super::call_state::CallState;
use super::gate::{GateNext, GatePipeline};
use super::listeners::{OnceEvent, RecurringEvent};
use super::transport::WritableCore;
use super::types::{Direction, GrpcStatus, Message, StreamEnd};

pub(crate) struct OutboundStream<Res> {
    core: Arc<dyn WritableCore<Res>>,
    state: Arc<CallState>,
    gates: GatePipeline<Res>,
    written: Arc<RecurringEvent<Res>>,
    pub(crate) ended: OnceEvent<StreamEnd>,
}

impl<Res: Message> OutboundStream<Res> {
    pub(crate) fn new(core: Arc<dyn WritableCore<Res>>, state: Arc<CallState>) -> Self {
        Self {
            core,
            state,
            gates: GatePipeline::new(),
            written: Arc::new(RecurringEvent::new()),
            ended: OnceEvent::new(),
        }
    }

    pub(crate) fn add_gate(&self, gate: impl Fn(Res, GateNext<Res>) + Send + Sync + 'static) {
        if self.is_ended() {
            return;
        }
        self.gates.add_gate(gate);
    }

    pub(crate) fn on_written(&self, listener: impl Fn(&Res) + Send + Sync + 'static) {
        self.written.subscribe(listener);
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.is_stream_ended(Direction::Outbound)
    }

    /// 穿过出站闸门后写给传输层
    ///
    /// 闸门可能延后放行，所以写之前要再检查一次终态。
    pub(crate) fn send(
        self: &Arc<Self>,
        payload: Res,
        on_written: Option<Box<dyn FnOnce() + Send>>,
    ) {
        if self.state.is_outbound_closed() {
            debug!("🚫 出站流已结束，丢弃消息");
            return;
        }
        let this = self.clone();
        self.gates.pass_payload(payload, move |payload| {
            if this.state.is_outbound_closed() {
                debug!("🚫 出站流已在闸门放行前结束，丢弃消息");
                return;
            }
            let written = this.written.clone();
            let echo = payload.clone();
            this.core.write(
                payload,
                Box::new(move || {
                    if let Some(on_written) = on_written {
                        on_written();
                    }
                    written.emit(&echo);
                }),
            );
        });
    }

    /// 正常结束出站流，返回本次是否生效
    pub(crate) fn end(&self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.close(true)
    }

    /// 以错误状态结束出站流
    pub(crate) fn end_with_error(&self, status: GrpcStatus) -> bool {
        self.core.emit_error(status);
        self.close(false)
    }

    /// 标记出站流结束并通知监听器；`send_end` 为 true 时同时告知传输层
    pub(crate) fn close(&self, send_end: bool) -> bool {
        if !self.state.record_stream_ended(Direction::Outbound) {
            return false;
        }
        if send_end {
            self.core.end();
        }
        let end = self.state.snapshot().stream_end();
        self.gates.clear();
        self.written.close();
        self.ended.fire(end);
        true
    }
}
