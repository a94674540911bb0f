use std::any::Any;
use std::sync::Arc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use crate::error::{ChainError, ChainResult};
use crate::utils::logger::{debug, info};
use super::request_handler_core::ServiceHandler;
use super::types::{Message, MethodDescriptor};

struct RegisteredService {
    method: MethodDescriptor,
    service: Arc<dyn Any + Send + Sync>,
}

/// 方法路径到已构建服务的注册表
///
/// 不同方法的请求 / 响应类型各不相同，服务以类型擦除的形式保存，取出时按类型还原。
#[derive(Default)]
pub struct ChainServiceRegistry {
    services: DashMap<String, RegisteredService>,
}

impl ChainServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册服务；同一路径只能注册一次
    pub fn register<Req: Message, Res: Message>(&self, service: ServiceHandler<Req, Res>) -> ChainResult<()> {
        let method = service.method().clone();
        match self.services.entry(method.path.clone()) {
            Entry::Occupied(_) => Err(ChainError::DuplicateMethod(method.path)),
            Entry::Vacant(slot) => {
                info!("📝 注册 gRPC 方法: {} ({})", method.path, method.shape());
                slot.insert(RegisteredService {
                    method,
                    service: Arc::new(service),
                });
                Ok(())
            }
        }
    }

    /// 按路径取出服务，类型必须与注册时一致
    pub fn get<Req: Message, Res: Message>(&self, path: &str) -> ChainResult<ServiceHandler<Req, Res>> {
        let entry = self
            .services
            .get(path)
            .ok_or_else(|| ChainError::MethodNotFound(path.to_string()))?;
        entry
            .service
            .downcast_ref::<ServiceHandler<Req, Res>>()
            .cloned()
            .ok_or_else(|| {
                debug!("服务类型不匹配: {}", path);
                ChainError::ServiceTypeMismatch(path.to_string())
            })
    }

    pub fn method(&self, path: &str) -> Option<MethodDescriptor> {
        self.services.get(path).map(|entry| entry.method.clone())
    }

    pub fn unregister(&self, path: &str) -> bool {
        self.services.remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.services.contains_key(path)
    }

    /// 已注册的方法路径（排序后）
    pub fn list_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.services.iter().map(|entry| entry.key().clone()).collect();
        methods.sort();
        methods
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ChainServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainServiceRegistry")
            .field("methods", &self.list_methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::handler_traits::CallHandler;
    use super::super::request_handler_core::Chain;

    fn unary_service(path: &str) -> ServiceHandler<String, String> {
        Chain::default()
            .build(MethodDescriptor::unary(path), vec![CallHandler::generic(|_call, next| next.run())])
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ChainServiceRegistry::new();
        registry.register(unary_service("/test.TestService/RpcTest")).unwrap();
        assert!(registry.contains("/test.TestService/RpcTest"));
        assert_eq!(registry.list_methods(), vec!["/test.TestService/RpcTest".to_string()]);

        let service = registry.get::<String, String>("/test.TestService/RpcTest").unwrap();
        assert!(service.as_unary().is_some());
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = ChainServiceRegistry::new();
        registry.register(unary_service("/a/b")).unwrap();
        let err = registry.register(unary_service("/a/b")).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateMethod(path) if path == "/a/b"));
    }

    #[test]
    fn test_lookup_errors() {
        let registry = ChainServiceRegistry::new();
        assert!(matches!(
            registry.get::<String, String>("/missing/method"),
            Err(ChainError::MethodNotFound(_))
        ));
        registry.register(unary_service("/a/b")).unwrap();
        assert!(matches!(
            registry.get::<u32, u32>("/a/b"),
            Err(ChainError::ServiceTypeMismatch(_))
        ));
        assert!(registry.unregister("/a/b"));
        assert!(registry.is_empty());
    }
}
