//! 错误类型

use thiserror::Error;
use crate::server::grpc_handler::types::CallShape;

/// 调用链构建和注册阶段的错误
///
/// 这些都是静态配置错误，在收到任何调用之前就会暴露出来。
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Expected at least 1 handler (method: {method})")]
    EmptyChain { method: String },

    #[error("处理器形态不匹配: 方法 {method} 为 {expected}，第 {index} 个处理器为 {found}")]
    HandlerShapeMismatch {
        method: String,
        index: usize,
        expected: CallShape,
        found: CallShape,
    },

    #[error("方法已注册: {0}")]
    DuplicateMethod(String),

    #[error("方法未注册: {0}")]
    MethodNotFound(String),

    #[error("服务类型不匹配: {0}")]
    ServiceTypeMismatch(String),

    #[error("配置错误: {0}")]
    InvalidConfig(String),
}

pub type ChainResult<T> = Result<T, ChainError>;
