//! 处理器链完整示例
//!
//! 用进程内传输演示四种调用形态：
//! - 通用拦截器写入请求级数据，并记录每次调用的耗时
//! - 一元调用的参数校验和错误转换钩子
//! - 客户端流的入站闸门
//! - 服务端流、双向流的出站闸门

use std::time::{Duration, Instant};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use rat_chain::prelude::*;

/// 聊天消息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub message: String,
}

impl ChatMessage {
    fn new(user: &str, message: &str) -> Self {
        Self {
            user: user.to_string(),
            message: message.to_string(),
        }
    }
}

/// 通用拦截器：记录开始时间，调用结束时打印耗时
fn timing_interceptor() -> CallHandler<ChatMessage, ChatMessage> {
    CallHandler::generic(|call: ServiceCall<ChatMessage, ChatMessage>, next| {
        let started = Instant::now();
        call.context().locals().insert("started_at", started);
        let path = call.context().path().to_string();
        call.on_cancelled(move || {
            println!("🛑 [{}] 客户端取消，耗时 {:?}", path, started.elapsed());
        });
        next.run();
    })
}

fn build_registry() -> ChainResult<ChainServiceRegistry> {
    let chain = Chain::new(ChainOptions::new().with_error_handler(|err, ctx| {
        println!("⚠️ [{}] 处理器错误: {}", ctx.path(), err);
        match err {
            CallError::Status(status) => status,
            CallError::Other(_) => GrpcStatus::internal("服务内部错误"),
        }
    }));
    let registry = ChainServiceRegistry::new();

    registry.register(chain.build(
        MethodDescriptor::unary("/chat.ChatService/Send"),
        vec![
            timing_interceptor(),
            CallHandler::unary(|call: UnaryCall<ChatMessage, ChatMessage>, _next| {
                let request = call.request();
                if request.user.is_empty() {
                    call.send_error(GrpcStatus::unauthenticated("缺少用户名"));
                    return;
                }
                call.send_response(ChatMessage::new("server", &format!("已收到 {} 的消息", request.user)));
            }),
        ],
    )?)?;

    registry.register(chain.build(
        MethodDescriptor::client_streaming("/chat.ChatService/Upload"),
        vec![
            timing_interceptor(),
            CallHandler::client_stream(|call: ClientStreamCall<ChatMessage, ChatMessage>, next| {
                // 空消息在闸门处丢弃
                call.add_inbound_gate(|message: ChatMessage, gate| {
                    if !message.message.is_empty() {
                        gate.pass(message);
                    }
                });
                let lines = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
                let sink = lines.clone();
                call.on_message(move |message, next| {
                    if let Ok(mut lines) = sink.lock() {
                        lines.push(message.message);
                    }
                    next.run();
                });
                let responder = call.clone();
                call.on_in_stream_ended(move |end| {
                    if end.error.is_some() || end.cancelled {
                        return;
                    }
                    let joined = lines.lock().map(|lines| lines.join(" / ")).unwrap_or_default();
                    responder.send_response(ChatMessage::new("server", &joined));
                });
                next.run();
            }),
        ],
    )?)?;

    registry.register(chain.build(
        MethodDescriptor::server_streaming("/chat.ChatService/History"),
        vec![
            timing_interceptor(),
            CallHandler::server_stream(|call: ServerStreamCall<ChatMessage, ChatMessage>, _next| {
                // 出站消息统一加上序号前缀
                let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
                call.add_outbound_gate(move |mut message: ChatMessage, gate| {
                    let seq = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    message.message = format!("#{} {}", seq, message.message);
                    gate.pass(message);
                });
                let user = call.request().user.clone();
                let call = call.clone();
                tokio::spawn(async move {
                    for line in ["早上好", "今天开会", "收到"] {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        call.send_message(ChatMessage::new(&user, line));
                    }
                    call.end_stream();
                });
            }),
        ],
    )?)?;

    registry.register(chain.build(
        MethodDescriptor::bidi_streaming("/chat.ChatService/Chat"),
        vec![
            timing_interceptor(),
            CallHandler::bidi_stream(|call: BidiStreamCall<ChatMessage, ChatMessage>, next| {
                let writer = call.clone();
                call.on_message(move |message, next| {
                    writer.send_message(ChatMessage::new("server", &format!("echo: {}", message.message)));
                    next.run();
                });
                let writer = call.clone();
                call.on_in_stream_ended(move |end| {
                    if end.error.is_none() && !end.cancelled {
                        writer.end_stream();
                    }
                });
                next.run();
            }),
        ],
    )?)?;

    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("🚀 处理器链示例启动");
    let server = LocalServer::new(build_registry()?);
    println!("📋 已注册方法: {:?}", server.registry().list_methods());

    // 一元
    let reply = server
        .unary::<ChatMessage, ChatMessage>("/chat.ChatService/Send", ChatMessage::new("alice", "你好"))?
        .await;
    println!("📨 一元响应: {:?}", reply);
    let reply = server
        .unary::<ChatMessage, ChatMessage>("/chat.ChatService/Send", ChatMessage::new("", "匿名"))?
        .await;
    println!("📨 一元错误: {:?}", reply);

    // 客户端流
    let upload = server.client_stream::<ChatMessage, ChatMessage>("/chat.ChatService/Upload")?;
    for line in ["第一行", "", "第二行"] {
        upload.send(ChatMessage::new("alice", line));
    }
    upload.half_close();
    println!("📨 客户端流响应: {:?}", upload.await);

    // 服务端流
    let mut history = server.server_stream::<ChatMessage, ChatMessage>(
        "/chat.ChatService/History",
        ChatMessage::new("bob", ""),
    )?;
    while let Some(item) = history.next().await {
        println!("📥 服务端流消息: {:?}", item);
    }

    // 双向流
    let mut chat = server.bidi_stream::<ChatMessage, ChatMessage>("/chat.ChatService/Chat")?;
    for line in ["ping", "pong"] {
        chat.send(ChatMessage::new("carol", line));
        if let Some(item) = chat.next().await {
            println!("💬 双向流回复: {:?}", item);
        }
    }
    chat.cancel();
    println!("💬 取消后的状态: {:?}", chat.next().await);

    println!("✅ 示例结束");
    Ok(())
}
