//! 调用链配置

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::error::{ChainError, ChainResult};
use crate::utils::logger::error;
use crate::utils::request_id::DEFAULT_REQUEST_ID_LENGTH;
use super::context::Context;
use super::request_handler_core::panic_message;
use super::types::{CallError, GrpcStatus};

/// 请求 ID 的最大长度
pub const MAX_REQUEST_ID_LENGTH: usize = 128;

/// 错误转换钩子：处理器发送的每个终态错误在转发到传输层之前都会经过它一次
pub type ErrorHandler = Arc<dyn Fn(CallError, &Context) -> GrpcStatus + Send + Sync>;

/// 默认错误转换：业务错误原样保留，其他错误一律归为内部错误
pub fn default_error_transform(error: CallError, _ctx: &Context) -> GrpcStatus {
    match error {
        CallError::Status(status) => status,
        CallError::Other(_) => GrpcStatus::internal("Internal server error"),
    }
}

/// 可序列化的调用链设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// 请求 ID 长度
    pub request_id_length: usize,
    /// 是否捕获处理器 panic 并转换为内部错误
    pub catch_handler_panics: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            request_id_length: DEFAULT_REQUEST_ID_LENGTH,
            catch_handler_panics: true,
        }
    }
}

impl ChainSettings {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(source: &str) -> ChainResult<Self> {
        let settings: Self = toml::from_str(source)
            .map_err(|e| ChainError::InvalidConfig(format!("解析调用链配置失败: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ChainResult<()> {
        if self.request_id_length == 0 || self.request_id_length > MAX_REQUEST_ID_LENGTH {
            return Err(ChainError::InvalidConfig(format!(
                "request_id_length 必须在 1..={} 之间，当前为 {}",
                MAX_REQUEST_ID_LENGTH, self.request_id_length
            )));
        }
        Ok(())
    }
}

/// 调用链选项
#[derive(Clone, Default)]
pub struct ChainOptions {
    pub settings: ChainSettings,
    pub error_handler: Option<ErrorHandler>,
}

impl ChainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置错误转换钩子
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(CallError, &Context) -> GrpcStatus + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_request_id_length(mut self, len: usize) -> Self {
        self.settings.request_id_length = len;
        self
    }

    pub fn catch_handler_panics(mut self, enabled: bool) -> Self {
        self.settings.catch_handler_panics = enabled;
        self
    }

    pub fn with_settings(mut self, settings: ChainSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 经过钩子（或默认转换）得到最终发给传输层的状态
    ///
    /// 钩子 panic 时退回默认转换，panic 不会越过调用链。
    pub(crate) fn transform_error(&self, error: CallError, ctx: &Context) -> GrpcStatus {
        let Some(handler) = &self.error_handler else {
            return default_error_transform(error, ctx);
        };
        let input = error.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| handler(input, ctx))) {
            Ok(status) => status,
            Err(payload) => {
                error!(
                    "❌ 错误转换钩子发生 panic: {} [{}] {}",
                    ctx.path(),
                    ctx.request_id(),
                    panic_message(payload.as_ref())
                );
                default_error_transform(error, ctx)
            }
        }
    }
}

impl fmt::Debug for ChainOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainOptions")
            .field("settings", &self.settings)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{GrpcStatusCode, MethodDescriptor};

    #[test]
    fn test_settings_from_toml() {
        let settings = ChainSettings::from_toml_str("request_id_length = 20").unwrap();
        assert_eq!(settings.request_id_length, 20);
        assert!(settings.catch_handler_panics);

        let err = ChainSettings::from_toml_str("request_id_length = 0").unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig(_)));
        assert!(ChainSettings::from_toml_str("request_id_length = \"x\"").is_err());
    }

    #[test]
    fn test_default_transform() {
        let ctx = Context::new(MethodDescriptor::unary("/a/b"), 8);
        let status = GrpcStatus::unauthenticated("Invalid token");
        assert_eq!(default_error_transform(status.clone().into(), &ctx), status);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let mapped = default_error_transform(CallError::other(io), &ctx);
        assert_eq!(mapped.code, GrpcStatusCode::Internal);
        assert_eq!(mapped.message, "Internal server error");
    }

    #[test]
    fn test_custom_error_handler() {
        let options = ChainOptions::new().with_error_handler(|err, ctx| {
            GrpcStatus::permission_denied(format!("{}: {}", ctx.path(), err.message()))
        });
        let ctx = Context::new(MethodDescriptor::unary("/a/b"), 8);
        let status = options.transform_error(GrpcStatus::internal("boom").into(), &ctx);
        assert_eq!(status.code, GrpcStatusCode::PermissionDenied);
        assert_eq!(status.message, "/a/b: boom");
    }

    #[test]
    fn test_panicking_error_handler_falls_back() {
        let options = ChainOptions::new().with_error_handler(|_, _| panic!("hook bug"));
        let ctx = Context::new(MethodDescriptor::unary("/a/b"), 8);

        let status = options.transform_error(GrpcStatus::unauthenticated("Invalid token").into(), &ctx);
        assert_eq!(status, GrpcStatus::unauthenticated("Invalid token"));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let status = options.transform_error(CallError::other(io), &ctx);
        assert_eq!(status.code, GrpcStatusCode::Internal);
    }
}
