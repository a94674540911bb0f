//! 进程内调用的客户端句柄

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use crate::server::grpc_handler::types::{CallError, GrpcStatus, Message};
use super::call_core::{LocalCallCore, StreamEvent};

fn dropped_status() -> GrpcStatus {
    GrpcStatus::unavailable("调用已被服务端丢弃")
}

/// 调用控制器：可以在等待响应的同时从别处取消调用
pub struct CallController<Req, Res> {
    core: Arc<LocalCallCore<Req, Res>>,
}

impl<Req, Res> Clone for CallController<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<Req: Message, Res: Message> CallController<Req, Res> {
    pub(crate) fn new(core: Arc<LocalCallCore<Req, Res>>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> Uuid {
        self.core.id()
    }

    /// 客户端取消，客户端收到 `CANCELLED: Cancelled on client`
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// 模拟传输层故障，服务端收到传输错误
    pub fn abort(&self, error: impl Into<CallError>) {
        self.core.abort(error.into());
    }

    /// 模拟连接断开，服务端看到取消
    pub fn disconnect(&self) {
        self.core.disconnect();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

/// 客户端流 / 双向流的发送端
pub struct RequestSender<Req, Res> {
    core: Arc<LocalCallCore<Req, Res>>,
}

impl<Req, Res> Clone for RequestSender<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<Req: Message, Res: Message> RequestSender<Req, Res> {
    /// 发送一条消息；调用已结束或已半关闭时返回 false
    pub fn send(&self, message: Req) -> bool {
        self.core.push_data(message)
    }

    /// 半关闭：不再发送消息
    pub fn half_close(&self) {
        self.core.half_close();
    }
}

pin_project! {
    /// 一元调用的客户端句柄，`await` 得到最终响应
    pub struct LocalUnaryCall<Req, Res> {
        controller: CallController<Req, Res>,
        #[pin]
        response: oneshot::Receiver<Result<Res, GrpcStatus>>,
    }
}

impl<Req: Message, Res: Message> LocalUnaryCall<Req, Res> {
    pub(crate) fn new(
        core: Arc<LocalCallCore<Req, Res>>,
        response: oneshot::Receiver<Result<Res, GrpcStatus>>,
    ) -> Self {
        Self {
            controller: CallController::new(core),
            response,
        }
    }

    pub fn controller(&self) -> CallController<Req, Res> {
        self.controller.clone()
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }
}

impl<Req, Res> Future for LocalUnaryCall<Req, Res> {
    type Output = Result<Res, GrpcStatus>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .response
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(dropped_status())))
    }
}

pin_project! {
    /// 客户端流调用的客户端句柄
    pub struct LocalClientStream<Req, Res> {
        controller: CallController<Req, Res>,
        sender: RequestSender<Req, Res>,
        #[pin]
        response: oneshot::Receiver<Result<Res, GrpcStatus>>,
    }
}

impl<Req: Message, Res: Message> LocalClientStream<Req, Res> {
    pub(crate) fn new(
        core: Arc<LocalCallCore<Req, Res>>,
        response: oneshot::Receiver<Result<Res, GrpcStatus>>,
    ) -> Self {
        Self {
            controller: CallController::new(core.clone()),
            sender: RequestSender { core },
            response,
        }
    }

    pub fn send(&self, message: Req) -> bool {
        self.sender.send(message)
    }

    pub fn half_close(&self) {
        self.sender.half_close();
    }

    pub fn sender(&self) -> RequestSender<Req, Res> {
        self.sender.clone()
    }

    pub fn controller(&self) -> CallController<Req, Res> {
        self.controller.clone()
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }
}

impl<Req, Res> Future for LocalClientStream<Req, Res> {
    type Output = Result<Res, GrpcStatus>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .response
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(dropped_status())))
    }
}

/// 服务端输出的接收端
///
/// 依次产出消息；以错误状态结束时最后产出一个 `Err`，之后结束。
pub struct ResponseReceiver<Res> {
    inner: mpsc::UnboundedReceiver<StreamEvent<Res>>,
    done: bool,
}

impl<Res> ResponseReceiver<Res> {
    pub(crate) fn new(inner: mpsc::UnboundedReceiver<StreamEvent<Res>>) -> Self {
        Self { inner, done: false }
    }
}

impl<Res> Stream for ResponseReceiver<Res> {
    type Item = Result<Res, GrpcStatus>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.inner.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Message(message))) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(Some(StreamEvent::Error(status))) => {
                self.done = true;
                Poll::Ready(Some(Err(status)))
            }
            Poll::Ready(Some(StreamEvent::End)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pin_project! {
    /// 服务端流调用的客户端句柄
    pub struct LocalServerStream<Req, Res> {
        controller: CallController<Req, Res>,
        #[pin]
        responses: ResponseReceiver<Res>,
    }
}

impl<Req: Message, Res: Message> LocalServerStream<Req, Res> {
    pub(crate) fn new(
        core: Arc<LocalCallCore<Req, Res>>,
        responses: mpsc::UnboundedReceiver<StreamEvent<Res>>,
    ) -> Self {
        Self {
            controller: CallController::new(core),
            responses: ResponseReceiver::new(responses),
        }
    }

    pub fn controller(&self) -> CallController<Req, Res> {
        self.controller.clone()
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }
}

impl<Req, Res> Stream for LocalServerStream<Req, Res> {
    type Item = Result<Res, GrpcStatus>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().responses.poll_next(cx)
    }
}

pin_project! {
    /// 双向流调用的客户端句柄
    pub struct LocalBidiStream<Req, Res> {
        controller: CallController<Req, Res>,
        sender: RequestSender<Req, Res>,
        #[pin]
        responses: ResponseReceiver<Res>,
    }
}

impl<Req: Message, Res: Message> LocalBidiStream<Req, Res> {
    pub(crate) fn new(
        core: Arc<LocalCallCore<Req, Res>>,
        responses: mpsc::UnboundedReceiver<StreamEvent<Res>>,
    ) -> Self {
        Self {
            controller: CallController::new(core.clone()),
            sender: RequestSender { core },
            responses: ResponseReceiver::new(responses),
        }
    }

    pub fn send(&self, message: Req) -> bool {
        self.sender.send(message)
    }

    pub fn half_close(&self) {
        self.sender.half_close();
    }

    pub fn sender(&self) -> RequestSender<Req, Res> {
        self.sender.clone()
    }

    pub fn controller(&self) -> CallController<Req, Res> {
        self.controller.clone()
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }
}

impl<Req, Res> Stream for LocalBidiStream<Req, Res> {
    type Item = Result<Res, GrpcStatus>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().responses.poll_next(cx)
    }
}
