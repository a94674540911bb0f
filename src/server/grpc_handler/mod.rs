// gRPC 处理器链模块
//
// 底层调度（call_state / listeners / sequence / gate）、四种调用外观、执行器和链构建，
// 以及服务注册表。字节编解码和网络传输不在这里，传输层通过 transport 中的 trait 接入。

pub mod types;
pub mod call_state;
pub mod listeners;
pub(crate) mod sequence;
pub mod gate;
pub mod context;
pub mod transport;
pub mod config;
pub mod call_traits;
pub(crate) mod responder;
pub(crate) mod request_stream;
pub(crate) mod response_stream;
pub mod unary_request_handler;
pub mod client_stream_handler;
pub mod server_stream_handler;
pub mod bidirectional_request_handler;
pub mod service_call;
pub mod handler_traits;
pub mod request_handler_core;
pub mod service_registry;

// 数据类型
pub use types::{
    CallError,
    CallShape,
    Direction,
    ErrorOrigin,
    GrpcStatus,
    GrpcStatusCode,
    Message,
    MethodDescriptor,
    StreamEnd,
    UnaryOutcome,
};

// 调用状态与上下文
pub use call_state::{CallSnapshot, CallState};
pub use context::{Context, Locals};
pub use gate::{GateNext, GatePipeline};
pub use sequence::Next;

// 传输层接口
pub use transport::{
    CallCore,
    ClientStreamCore,
    DuplexCore,
    ReadableCore,
    RequestCore,
    ServerStreamCore,
    UnaryCallback,
    UnaryCore,
    WritableCore,
};

// 配置
pub use config::{default_error_transform, ChainOptions, ChainSettings, ErrorHandler};

// 调用外观
pub use call_traits::{
    Cancellable,
    MessageReadable,
    MessageWritable,
    RequestReadable,
    ServerCall,
    UnaryRespondable,
};
pub use unary_request_handler::{UnaryCall, UnaryService};
pub use client_stream_handler::{ClientStreamCall, ClientStreamService};
pub use server_stream_handler::{ServerStreamCall, ServerStreamService};
pub use bidirectional_request_handler::{BidiStreamCall, BidiStreamService};
pub use service_call::ServiceCall;

// 处理器与链
pub use handler_traits::{CallHandler, Handler};
pub use request_handler_core::{Chain, HandlerList, HandlerPanic, ServiceHandler};
pub use service_registry::ChainServiceRegistry;
