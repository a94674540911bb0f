//! # RAT Chain
//!
//! gRPC 服务端处理器链中间件。
//!
//! 一个方法的处理逻辑由若干处理器按顺序组成，每个处理器拿到一个按调用形态区分的调用外观
//! （一元、客户端流、服务端流、双向流），可以发送响应或错误、注册监听器、挂载闸门，
//! 再通过 `next.run()` 交给下一个处理器。调用外观负责 "先到先得" 的终态规则：
//! 重复或迟到的响应、错误、结束都不会再到达传输层。
//!
//! ```ignore
//! use rat_chain::prelude::*;
//!
//! let chain = Chain::new(ChainOptions::new());
//! let service = chain.build(
//!     MethodDescriptor::unary("/test.TestService/RpcTest"),
//!     vec![
//!         CallHandler::generic(|call: ServiceCall<String, String>, next| {
//!             call.context().locals().insert("user", "alice".to_string());
//!             next.run();
//!         }),
//!         CallHandler::unary(|call: UnaryCall<String, String>, _next| {
//!             call.send_response(format!("hello {}", call.request()));
//!         }),
//!     ],
//! )?;
//! ```

pub mod error;
pub mod server;
pub mod utils;

pub use error::{ChainError, ChainResult};
pub use server::grpc_handler::{
    BidiStreamCall,
    CallError,
    CallHandler,
    CallShape,
    Chain,
    ChainOptions,
    ChainServiceRegistry,
    ChainSettings,
    ClientStreamCall,
    Context,
    GrpcStatus,
    GrpcStatusCode,
    MethodDescriptor,
    Next,
    ServerStreamCall,
    ServiceCall,
    ServiceHandler,
    UnaryCall,
};
pub use server::local_transport::LocalServer;

/// 常用类型和 trait 的集中导出
pub mod prelude {
    pub use crate::error::{ChainError, ChainResult};
    pub use crate::server::grpc_handler::{
        BidiStreamCall,
        CallError,
        CallHandler,
        CallShape,
        CallSnapshot,
        Cancellable,
        Chain,
        ChainOptions,
        ChainServiceRegistry,
        ChainSettings,
        ClientStreamCall,
        Context,
        ErrorOrigin,
        GateNext,
        GrpcStatus,
        GrpcStatusCode,
        Handler,
        Message,
        MessageReadable,
        MessageWritable,
        MethodDescriptor,
        Next,
        RequestReadable,
        ServerCall,
        ServerStreamCall,
        ServiceCall,
        ServiceHandler,
        StreamEnd,
        UnaryCall,
        UnaryOutcome,
        UnaryRespondable,
    };
    pub use crate::server::local_transport::LocalServer;
}
