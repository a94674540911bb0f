//! 进程内传输
//!
//! 不经过网络，直接把客户端句柄接到已构建的处理器链上。用于测试和演示，
//! 也可以作为接入真实 RPC 库时实现传输层接口的参考。

pub mod call_core;
pub mod client;
pub mod server;

pub use call_core::{LocalCallCore, LocalRequestCore, StreamEvent, CANCELLED_ON_CLIENT, CONNECTION_LOST};
pub use client::{
    CallController,
    LocalBidiStream,
    LocalClientStream,
    LocalServerStream,
    LocalUnaryCall,
    RequestSender,
    ResponseReceiver,
};
pub use server::LocalServer;
