//! RAT Chain 服务端模块
//!
//! `grpc_handler` 是处理器链本身；`local_transport` 是进程内传输实现。

pub mod grpc_handler;
pub mod local_transport;

pub use grpc_handler::{Chain, ChainOptions, ChainServiceRegistry, ServiceHandler};
pub use local_transport::LocalServer;
