//! End-to-end benchmarks through the proxy listeners.
//!
//! Mock upstreams answer after ~15ms with ±5ms of jitter, roughly what public
//! resolvers show from a home network. With several upstreams raced per
//! query the observed latency should move towards the low end of that range.
//!
//! Run with: cargo bench --bench transport_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use rand::Rng;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use devroute::config::Config;
use devroute::proxy::{Proxy, build_router};
use devroute::transport::{MAX_DNS_PACKET_SIZE, read_frame, write_frame};
use devroute::upstream::DohConfig;

const BASE_LATENCY_MS: u64 = 15;
const JITTER_MS: u64 = 5;

/// Upstream counts raced per query.
const RACE_WIDTHS: [usize; 3] = [1, 2, 4];

fn query_bytes(id: u16) -> Vec<u8> {
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::A));
    message.to_vec().unwrap()
}

fn reply_to(request: &Message) -> Vec<u8> {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .set_recursion_available(true)
        .add_queries(request.queries().to_vec())
        .add_answer(Record::from_rdata(
            request.queries()[0].name().clone(),
            300,
            RData::A(A::new(93, 184, 216, 34)),
        ));
    response.to_vec().unwrap()
}

fn jittered_latency() -> Duration {
    let offset = rand::rng().random_range(0..=JITTER_MS * 2);
    Duration::from_millis(BASE_LATENCY_MS - JITTER_MS + offset)
}

async fn serve_upstream(socket: Arc<UdpSocket>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
    while let Ok((len, src)) = socket.recv_from(&mut buf).await {
        let Ok(request) = Message::from_vec(&buf[..len]) else {
            continue;
        };
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            tokio::time::sleep(jittered_latency()).await;
            let _ = socket.send_to(&reply_to(&request), src).await;
        });
    }
}

/// A proxy with `width` global upstreams, running on its own runtime thread.
fn spawn_proxy(width: usize) -> (SocketAddr, SocketAddr) {
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let mut upstreams = Vec::with_capacity(width);
            for _ in 0..width {
                let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
                upstreams.push(socket.local_addr().unwrap().to_string());
                tokio::spawn(serve_upstream(socket));
            }

            let config = Config {
                upstreams,
                devices: Vec::new(),
            };
            let doh = DohConfig {
                system_proxy: false,
                ..DohConfig::default()
            };
            let router = build_router(&config, doh).unwrap();
            let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
            let proxy = Proxy::bind_split(any, any, router).await.unwrap();
            tx.send((proxy.udp_addr().unwrap(), proxy.tcp_addr().unwrap()))
                .unwrap();
            proxy.run(CancellationToken::new()).await;
        });
    });

    rx.recv().unwrap()
}

async fn ask_udp(proxy: SocketAddr, query: &[u8]) -> usize {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(query, proxy).await.unwrap();

    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
    tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .unwrap()
        .unwrap()
}

fn bench_udp_race(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let query = query_bytes(0x1234);

    let mut group = c.benchmark_group("udp_race");
    group.throughput(Throughput::Elements(1));

    for width in RACE_WIDTHS {
        let (udp, _) = spawn_proxy(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &udp, |b, &udp| {
            b.to_async(&rt).iter(|| ask_udp(udp, &query));
        });
    }

    group.finish();
}

fn bench_tcp(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let query = query_bytes(0x4321);
    let (_, tcp) = spawn_proxy(2);

    let mut group = c.benchmark_group("tcp");
    group.throughput(Throughput::Elements(1));

    group.bench_function("connection_per_query", |b| {
        b.to_async(&rt).iter(|| async {
            let mut stream = TcpStream::connect(tcp).await.unwrap();
            write_frame(&mut stream, &query).await.unwrap();
            read_frame(&mut stream).await.unwrap().unwrap().len()
        });
    });

    let stream = rt.block_on(TcpStream::connect(tcp)).unwrap();
    let stream = tokio::sync::Mutex::new(stream);
    group.bench_function("reused_connection", |b| {
        b.to_async(&rt).iter(|| async {
            let mut stream = stream.lock().await;
            write_frame(&mut *stream, &query).await.unwrap();
            read_frame(&mut *stream).await.unwrap().unwrap().len()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_udp_race, bench_tcp);
criterion_main!(benches);
