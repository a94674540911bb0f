use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use crate::error::{ChainError, ChainResult};
use crate::server::grpc_handler::request_handler_core::ServiceHandler;
use crate::server::grpc_handler::service_registry::ChainServiceRegistry;
use crate::server::grpc_handler::types::Message;
use crate::utils::logger::debug;
use super::client::{LocalBidiStream, LocalClientStream, LocalServerStream, LocalUnaryCall};
use super::call_core::{ClientSink, LocalCallCore, LocalRequestCore};

/// 进程内 gRPC 服务端
///
/// 按方法路径从注册表取出服务，为每次调用创建一个调用核心，并把客户端句柄交还给调用者。
#[derive(Debug, Clone, Default)]
pub struct LocalServer {
    registry: Arc<ChainServiceRegistry>,
}

impl LocalServer {
    pub fn new(registry: ChainServiceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn with_registry(registry: Arc<ChainServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChainServiceRegistry {
        &self.registry
    }

    fn service<Req: Message, Res: Message>(&self, path: &str) -> ChainResult<ServiceHandler<Req, Res>> {
        self.registry.get::<Req, Res>(path)
    }

    fn shape_mismatch<Req: Message, Res: Message>(path: &str, service: &ServiceHandler<Req, Res>, wanted: &str) -> ChainError {
        ChainError::ServiceTypeMismatch(format!("{} 是 {} 方法，不能按 {} 调用", path, service.shape(), wanted))
    }

    /// 发起一元调用
    pub fn unary<Req: Message, Res: Message>(&self, path: &str, request: Req) -> ChainResult<LocalUnaryCall<Req, Res>> {
        let service = self.service::<Req, Res>(path)?;
        let unary = service
            .as_unary()
            .ok_or_else(|| Self::shape_mismatch(path, &service, "一元"))?;

        let (tx, rx) = oneshot::channel();
        let core = Arc::new(LocalCallCore::new(path, ClientSink::Unary(Some(tx))).without_inbound());
        debug!("📞 [本地传输] 一元调用 {}: {}", core.id(), path);
        let request_core = Arc::new(LocalRequestCore::new(core.clone(), request));
        unary.call(request_core, core.unary_callback());
        Ok(LocalUnaryCall::new(core, rx))
    }

    /// 发起客户端流调用
    pub fn client_stream<Req: Message, Res: Message>(&self, path: &str) -> ChainResult<LocalClientStream<Req, Res>> {
        let service = self.service::<Req, Res>(path)?;
        let client_stream = service
            .as_client_stream()
            .ok_or_else(|| Self::shape_mismatch(path, &service, "客户端流"))?;

        let (tx, rx) = oneshot::channel();
        let core = Arc::new(LocalCallCore::new(path, ClientSink::Unary(Some(tx))));
        debug!("📞 [本地传输] 客户端流调用 {}: {}", core.id(), path);
        client_stream.call(core.clone(), core.unary_callback());
        Ok(LocalClientStream::new(core, rx))
    }

    /// 发起服务端流调用
    pub fn server_stream<Req: Message, Res: Message>(&self, path: &str, request: Req) -> ChainResult<LocalServerStream<Req, Res>> {
        let service = self.service::<Req, Res>(path)?;
        let server_stream = service
            .as_server_stream()
            .ok_or_else(|| Self::shape_mismatch(path, &service, "服务端流"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::new(LocalCallCore::new(path, ClientSink::Stream(tx)).without_inbound());
        debug!("📞 [本地传输] 服务端流调用 {}: {}", core.id(), path);
        server_stream.call(Arc::new(LocalRequestCore::new(core.clone(), request)));
        Ok(LocalServerStream::new(core, rx))
    }

    /// 发起双向流调用
    pub fn bidi_stream<Req: Message, Res: Message>(&self, path: &str) -> ChainResult<LocalBidiStream<Req, Res>> {
        let service = self.service::<Req, Res>(path)?;
        let bidi = service
            .as_bidi_stream()
            .ok_or_else(|| Self::shape_mismatch(path, &service, "双向流"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::new(LocalCallCore::new(path, ClientSink::Stream(tx)));
        debug!("📞 [本地传输] 双向流调用 {}: {}", core.id(), path);
        bidi.call(core.clone());
        Ok(LocalBidiStream::new(core, rx))
    }
}
