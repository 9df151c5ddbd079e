//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! End-to-end benchmarks over loopback sockets
//!
//! Measures request throughput of a running server for a single keep-alive
//! connection, a fresh connection per request and many concurrent
//! connections.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use http::Response;
use httpmux_service::{RequestContext, full, serve};
use std::hint::black_box;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

const REQUEST: &[u8] = b"GET /bench HTTP/1.1\r\nHost: localhost\r\n\r\n";

// ============================================================================
// Helper Functions
// ============================================================================

/// Start a server answering every request with `ok`
fn start_server(rt: &Runtime) -> SocketAddr {
    rt.block_on(async {
        let server = serve("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(|request: RequestContext| async move {
            let _ = request.respond_with(Response::new(full("ok")));
        }));
        addr
    })
}

/// Send one request and read until the `ok` body arrives
async fn round_trip(stream: &mut TcpStream, buffer: &mut [u8]) {
    stream.write_all(REQUEST).await.unwrap();
    let mut read = 0;
    while !buffer[..read].ends_with(b"ok") {
        let n = stream.read(&mut buffer[read..]).await.unwrap();
        assert!(n > 0);
        read += n;
    }
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_keep_alive(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let addr = start_server(&rt);
    let mut group = c.benchmark_group("keep_alive");

    for requests in [1u64, 10, 100] {
        group.throughput(Throughput::Elements(requests));
        group.bench_with_input(BenchmarkId::from_parameter(requests), &requests, |b, &requests| {
            b.to_async(&rt).iter(|| async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let mut buffer = vec![0u8; 1024];
                for _ in 0..requests {
                    round_trip(&mut stream, &mut buffer).await;
                }
                black_box(stream)
            })
        });
    }

    group.finish();
}

fn bench_connection_per_request(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let addr = start_server(&rt);
    let mut group = c.benchmark_group("connection_per_request");

    group.throughput(Throughput::Elements(10));
    group.bench_function("10_connections", |b| {
        b.to_async(&rt).iter(|| async move {
            let mut buffer = vec![0u8; 1024];
            for _ in 0..10 {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                round_trip(&mut stream, &mut buffer).await;
            }
        })
    });

    group.finish();
}

fn bench_concurrent_connections(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let addr = start_server(&rt);
    let mut group = c.benchmark_group("concurrent_connections");

    for connections in [4u64, 32] {
        group.throughput(Throughput::Elements(connections * 10));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, &connections| {
                b.to_async(&rt).iter(|| async move {
                    let clients: Vec<_> = (0..connections)
                        .map(|_| {
                            tokio::spawn(async move {
                                let mut stream = TcpStream::connect(addr).await.unwrap();
                                let mut buffer = vec![0u8; 1024];
                                for _ in 0..10 {
                                    round_trip(&mut stream, &mut buffer).await;
                                }
                            })
                        })
                        .collect();
                    for client in clients {
                        client.await.unwrap();
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_keep_alive,
    bench_connection_per_request,
    bench_concurrent_connections
);
criterion_main!(benches);
