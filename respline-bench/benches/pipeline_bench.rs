//! Client pipelining benchmarks over an in-memory transport.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use respline_client::{Connection, ConnectionConfig};
use respline_protocol::{Command, Decoder};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Runtime;

/// Answers every request with `+OK`.
async fn ok_server(mut stream: DuplexStream) {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        let mut replies = Vec::new();
        while let Ok(Some(_)) = decoder.decode_reply() {
            replies.extend_from_slice(b"+OK\r\n");
        }
        if stream.write_all(&replies).await.is_err() {
            return;
        }
    }
}

fn setup(rt: &Runtime) -> Arc<Connection> {
    rt.block_on(async {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        tokio::spawn(ok_server(server));
        Connection::from_stream(client, ConnectionConfig::new("bench", 6379))
    })
}

fn bench_sequential_send(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let conn = setup(&rt);

    c.bench_function("send_sequential", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(conn.send(Command::new("PING")).await.unwrap()) })
        });
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let conn = setup(&rt);
    let mut group = c.benchmark_group("pipeline");

    for depth in [10, 100, 1000] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let commands = (0..depth)
                    .map(|i| Command::new("ZCARD").arg(format!("key-{}", i)))
                    .collect();
                rt.block_on(async { black_box(conn.pipeline(commands).await.unwrap()) })
            });
        });
    }

    group.finish();
}

fn bench_concurrent_senders(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let conn = setup(&rt);
    let mut group = c.benchmark_group("concurrent_senders");

    for tasks in [4, 16, 64] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let conn = Arc::clone(&conn);
                            tokio::spawn(async move { conn.send(Command::new("PING")).await })
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap().unwrap());
                    }
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_send,
    bench_pipeline,
    bench_concurrent_senders,
);

criterion_main!(benches);
