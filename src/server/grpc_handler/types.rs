use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

/// 可在调用链中流转的消息
///
/// 响应负载需要同时交给传输层和 "已发送" 监听器，所以要求 `Clone`。
pub trait Message: Clone + Send + Sync + 'static {}

impl<T> Message for T where T: Clone + Send + Sync + 'static {}

/// gRPC 状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrpcStatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl GrpcStatusCode {
    /// 状态码的数值
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// 从数值解析状态码，未知数值归为 `Unknown`
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for GrpcStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_i32(), self.name())
    }
}

/// 业务层错误：带状态码和消息
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{code}]: {message}")]
pub struct GrpcStatus {
    pub code: GrpcStatusCode,
    pub message: String,
}

impl GrpcStatus {
    pub fn new(code: GrpcStatusCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::PermissionDenied, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::Unavailable, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(GrpcStatusCode::Unauthenticated, message)
    }
}

/// 调用上记录的错误
///
/// `Status` 是处理器显式构造的业务错误；`Other` 是任意非业务错误
/// （传输层故障、处理器 panic 等）。
#[derive(Debug, Clone)]
pub enum CallError {
    Status(GrpcStatus),
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl CallError {
    /// 包装任意错误
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(error))
    }

    /// 业务状态（如果是业务错误）
    pub fn status(&self) -> Option<&GrpcStatus> {
        match self {
            Self::Status(status) => Some(status),
            Self::Other(_) => None,
        }
    }

    /// 错误消息文本
    pub fn message(&self) -> String {
        match self {
            Self::Status(status) => status.message.clone(),
            Self::Other(err) => err.to_string(),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "{}", status),
            Self::Other(err) => write!(f, "{}", err),
        }
    }
}

impl From<GrpcStatus> for CallError {
    fn from(status: GrpcStatus) -> Self {
        Self::Status(status)
    }
}

impl PartialEq for CallError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Status(a), Self::Status(b)) => a == b,
            (Self::Other(a), Self::Other(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// 错误来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorOrigin {
    /// 处理器通过 `send_error` 发出
    Handler,
    /// 传输层 `error` 事件
    Transport,
}

/// 调用形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallShape {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl CallShape {
    pub fn from_flags(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (true, true) => Self::BidiStream,
            (false, true) => Self::ServerStream,
            (true, false) => Self::ClientStream,
            (false, false) => Self::Unary,
        }
    }

    pub fn has_request_stream(self) -> bool {
        matches!(self, Self::ClientStream | Self::BidiStream)
    }

    pub fn has_response_stream(self) -> bool {
        matches!(self, Self::ServerStream | Self::BidiStream)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unary => "unary",
            Self::ClientStream => "client-stream",
            Self::ServerStream => "server-stream",
            Self::BidiStream => "bidi-stream",
        };
        f.write_str(name)
    }
}

/// 流方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 客户端 -> 服务端
    Inbound,
    /// 服务端 -> 客户端
    Outbound,
}

/// 方法描述（通常由生成的服务定义提供）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// 完整路径，例如 `/test.TestService/RpcTest`
    pub path: String,
    pub request_stream: bool,
    pub response_stream: bool,
}

impl MethodDescriptor {
    pub fn new(path: impl Into<String>, request_stream: bool, response_stream: bool) -> Self {
        Self {
            path: path.into(),
            request_stream,
            response_stream,
        }
    }

    pub fn unary(path: impl Into<String>) -> Self {
        Self::new(path, false, false)
    }

    pub fn client_streaming(path: impl Into<String>) -> Self {
        Self::new(path, true, false)
    }

    pub fn server_streaming(path: impl Into<String>) -> Self {
        Self::new(path, false, true)
    }

    pub fn bidi_streaming(path: impl Into<String>) -> Self {
        Self::new(path, true, true)
    }

    pub fn shape(&self) -> CallShape {
        CallShape::from_flags(self.request_stream, self.response_stream)
    }
}

/// 一次流结束通知携带的信息
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEnd {
    /// 结束时已记录的错误
    pub error: Option<CallError>,
    pub cancelled: bool,
}

/// 一元响应的最终结果：成功负载或错误
pub type UnaryOutcome<Res> = Result<Res, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_from_flags() {
        assert_eq!(MethodDescriptor::unary("/a").shape(), CallShape::Unary);
        assert_eq!(MethodDescriptor::client_streaming("/a").shape(), CallShape::ClientStream);
        assert_eq!(MethodDescriptor::server_streaming("/a").shape(), CallShape::ServerStream);
        assert_eq!(MethodDescriptor::bidi_streaming("/a").shape(), CallShape::BidiStream);
        assert!(CallShape::BidiStream.has_request_stream());
        assert!(!CallShape::ServerStream.has_request_stream());
    }

    #[test]
    fn test_status_display() {
        let status = GrpcStatus::cancelled("Cancelled on client");
        assert_eq!(status.to_string(), "[1 CANCELLED]: Cancelled on client");
        assert_eq!(GrpcStatusCode::from_i32(16), GrpcStatusCode::Unauthenticated);
        assert_eq!(GrpcStatusCode::from_i32(99), GrpcStatusCode::Unknown);
    }
}
