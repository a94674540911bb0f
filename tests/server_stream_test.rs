//! 服务端流调用测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures_util::StreamExt;
use rat_chain::prelude::*;

const METHOD: &str = "/test.TestService/Watch";

fn serve_with(options: ChainOptions, handlers: Vec<CallHandler<u32, u32>>) -> LocalServer {
    let registry = ChainServiceRegistry::new();
    let service = Chain::new(options)
        .build(MethodDescriptor::server_streaming(METHOD), handlers)
        .unwrap();
    registry.register(service).unwrap();
    LocalServer::new(registry)
}

fn serve(handlers: Vec<CallHandler<u32, u32>>) -> LocalServer {
    serve_with(ChainOptions::new(), handlers)
}

type Captured = Arc<Mutex<Option<ServerStreamCall<u32, u32>>>>;

fn capture(slot: &Captured) -> CallHandler<u32, u32> {
    let slot = slot.clone();
    CallHandler::server_stream(move |call: ServerStreamCall<u32, u32>, next| {
        *slot.lock().unwrap() = Some(call);
        next.run();
    })
}

/// 按请求里的数量依次发送消息后结束
fn counting_handler() -> CallHandler<u32, u32> {
    CallHandler::server_stream(|call: ServerStreamCall<u32, u32>, _next| {
        for value in 0..*call.request() {
            call.send_message(value);
        }
        call.end_stream();
    })
}

#[tokio::test]
async fn test_server_stream_happy_path() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let callbacks = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(Mutex::new(Vec::new()));
    let written_sink = written.clone();
    let callback_count = callbacks.clone();
    let ends_sink = ends.clone();
    let server = serve(vec![CallHandler::server_stream(move |call: ServerStreamCall<u32, u32>, _next| {
        let sink = written_sink.clone();
        call.on_message_written(move |value| sink.lock().unwrap().push(*value));
        let sink = ends_sink.clone();
        call.on_out_stream_ended(move |end| sink.lock().unwrap().push(end.clone()));

        let counter = callback_count.clone();
        call.send_message_with(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let call = call.clone();
        tokio::spawn(async move {
            for value in 2..=3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                call.send_message(value);
            }
            call.end_stream();
        });
    })]);

    let stream = server.server_stream::<u32, u32>(METHOD, 0).unwrap();
    let items: Vec<Result<u32, GrpcStatus>> = stream.collect().await;
    assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
    assert_eq!(*written.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);

    let ends = ends.lock().unwrap();
    assert_eq!(ends.len(), 1);
    assert!(ends[0].error.is_none());
    assert!(!ends[0].cancelled);
}

#[tokio::test]
async fn test_server_stream_uses_request() {
    let server = serve(vec![counting_handler()]);
    let stream = server.server_stream::<u32, u32>(METHOD, 4).unwrap();
    let items: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(items, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_server_stream_outbound_gates() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let written_sink = written.clone();
    let server = serve(vec![
        CallHandler::generic(move |call: ServiceCall<u32, u32>, next| {
            if let ServiceCall::ServerStream(call) = &call {
                // 丢弃奇数，偶数放大十倍
                call.add_outbound_gate(|value, gate| {
                    if value % 2 == 0 {
                        gate.pass(value * 10);
                    }
                });
                let sink = written_sink.clone();
                call.on_message_written(move |value| sink.lock().unwrap().push(*value));
            }
            next.run();
        }),
        counting_handler(),
    ]);

    let stream = server.server_stream::<u32, u32>(METHOD, 5).unwrap();
    let items: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(items, vec![0, 20, 40]);
    assert_eq!(*written.lock().unwrap(), vec![0, 20, 40]);
}

#[tokio::test]
async fn test_server_stream_delayed_gate_drops_after_end() {
    let server = serve(vec![
        CallHandler::generic(|call: ServiceCall<u32, u32>, next| {
            if let ServiceCall::ServerStream(call) = &call {
                call.add_outbound_gate(|value, gate| {
                    if value == 0 {
                        gate.pass(value);
                        return;
                    }
                    // 放行时流已经结束
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        gate.pass(value);
                    });
                });
            }
            next.run();
        }),
        counting_handler(),
    ]);

    let stream = server.server_stream::<u32, u32>(METHOD, 2).unwrap();
    let items: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(items, vec![0]);
}

#[tokio::test]
async fn test_server_stream_send_error_with_hook() {
    let slot: Captured = Arc::default();
    let ends = Arc::new(Mutex::new(Vec::new()));
    let ends_sink = ends.clone();
    let options = ChainOptions::new().with_error_handler(|err, _ctx| {
        GrpcStatus::new(GrpcStatusCode::FailedPrecondition, err.message())
    });
    let server = serve_with(
        options,
        vec![
            capture(&slot),
            CallHandler::server_stream(move |call: ServerStreamCall<u32, u32>, _next| {
                let sink = ends_sink.clone();
                call.on_out_stream_ended(move |end| sink.lock().unwrap().push(end.clone()));
                call.send_message(1);
                call.send_error(GrpcStatus::invalid_argument("bad cursor"));
                call.send_message(2);
                call.end_stream();
                call.send_error(GrpcStatus::internal("second error"));
            }),
        ],
    );

    let stream = server.server_stream::<u32, u32>(METHOD, 0).unwrap();
    let items: Vec<Result<u32, GrpcStatus>> = stream.collect().await;
    let expected = GrpcStatus::new(GrpcStatusCode::FailedPrecondition, "bad cursor");
    assert_eq!(items, vec![Ok(1), Err(expected.clone())]);

    let snapshot = slot.lock().unwrap().clone().unwrap().snapshot();
    assert!(snapshot.error_occurred);
    assert!(snapshot.out_stream_ended);
    assert_eq!(snapshot.error, Some(CallError::Status(expected.clone())));
    assert_eq!(snapshot.error_origin, Some(ErrorOrigin::Handler));

    let ends = ends.lock().unwrap();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].error, Some(CallError::Status(expected)));
}

#[tokio::test]
async fn test_server_stream_cancel() {
    let slot: Captured = Arc::default();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(Mutex::new(Vec::new()));
    let cancel_count = cancelled.clone();
    let ends_sink = ends.clone();
    let server = serve(vec![
        capture(&slot),
        CallHandler::server_stream(move |call: ServerStreamCall<u32, u32>, _next| {
            let counter = cancel_count.clone();
            call.on_cancelled(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            let sink = ends_sink.clone();
            call.on_out_stream_ended(move |end| sink.lock().unwrap().push(end.clone()));
            call.send_message(7);
        }),
    ]);

    let mut stream = server.server_stream::<u32, u32>(METHOD, 0).unwrap();
    assert_eq!(stream.next().await, Some(Ok(7)));
    stream.cancel();
    let status = stream.next().await.unwrap().unwrap_err();
    assert_eq!(status.code, GrpcStatusCode::Cancelled);
    assert_eq!(stream.next().await, None);

    let call = slot.lock().unwrap().clone().unwrap();
    call.send_message(8);
    call.end_stream();
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);

    let snapshot = call.snapshot();
    assert!(snapshot.cancelled);
    assert!(snapshot.out_stream_ended);
    assert!(!snapshot.error_occurred);

    let ends = ends.lock().unwrap();
    assert_eq!(ends.len(), 1);
    assert!(ends[0].cancelled);
}

#[tokio::test]
async fn test_server_stream_transport_error() {
    let slot: Captured = Arc::default();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let cancel_count = cancelled.clone();
    let server = serve(vec![
        capture(&slot),
        CallHandler::server_stream(move |call: ServerStreamCall<u32, u32>, _next| {
            let counter = cancel_count.clone();
            call.on_cancelled(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }),
    ]);

    let mut stream = server.server_stream::<u32, u32>(METHOD, 0).unwrap();
    stream.controller().abort(GrpcStatus::unavailable("stream reset"));
    let status = stream.next().await.unwrap().unwrap_err();
    assert_eq!(status.message, "stream reset");

    let call = slot.lock().unwrap().clone().unwrap();
    assert!(call.out_stream_ended());
    let snapshot = call.snapshot();
    assert!(snapshot.error_occurred);
    assert!(!snapshot.cancelled);
    assert_eq!(snapshot.error_origin, Some(ErrorOrigin::Transport));
    assert_eq!(cancelled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_server_stream_double_end_is_ignored() {
    let ended = Arc::new(AtomicUsize::new(0));
    let ended_count = ended.clone();
    let server = serve(vec![CallHandler::server_stream(move |call: ServerStreamCall<u32, u32>, _next| {
        let counter = ended_count.clone();
        call.on_out_stream_ended(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        call.send_message(1);
        call.send_message(2);
        call.end_stream();
        call.end_stream();
        call.send_message(3);
        call.send_error(GrpcStatus::internal("after end"));
    })]);

    let stream = server.server_stream::<u32, u32>(METHOD, 0).unwrap();
    let items: Vec<Result<u32, GrpcStatus>> = stream.collect().await;
    assert_eq!(items, vec![Ok(1), Ok(2)]);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_stream_late_listener_is_dropped() {
    let slot: Captured = Arc::default();
    let server = serve(vec![capture(&slot), counting_handler()]);
    let stream = server.server_stream::<u32, u32>(METHOD, 1).unwrap();
    let items: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(items, vec![0]);

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_count = seen.clone();
    let call = slot.lock().unwrap().clone().unwrap();
    call.on_out_stream_ended(move |_| {
        seen_count.fetch_add(1, Ordering::SeqCst);
    });
    assert!(call.out_stream_ended());
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}
