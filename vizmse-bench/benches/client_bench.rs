//! Client round trips against the in-process mock server.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use peptalk_client::mock::{MockReply, MockServer};
use peptalk_client::PepTalkClient;
use tokio::runtime::Runtime;

struct TestSetup {
    _server: MockServer,
    client: PepTalkClient,
}

fn setup_server_and_client(rt: &Runtime, body_size: usize) -> TestSetup {
    let body = format!("<entry name=\"root\">{}</entry>", "x".repeat(body_size));
    rt.block_on(async move {
        let server = MockServer::start(move |id, text| {
            if text.starts_with("get") {
                MockReply::ok(id, &body)
            } else {
                MockReply::default_for(id, text)
            }
        })
        .await
        .unwrap();
        let client = PepTalkClient::new(server.config());
        client.connect(true).await.unwrap();
        TestSetup {
            _server: server,
            client,
        }
    })
}

fn bench_ping_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 0);

    let mut group = c.benchmark_group("client_ping");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ping", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(setup.client.ping().await.unwrap()) });
    });

    group.finish();
}

fn bench_get_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("client_get");

    for size in [100, 10000] {
        let setup = setup_server_and_client(&rt, size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &setup, |b, setup| {
            b.to_async(&rt)
                .iter(|| async { black_box(setup.client.get("/", None).await.unwrap()) });
        });
    }

    group.finish();
}

fn bench_concurrent_gets(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt, 100);

    let mut group = c.benchmark_group("client_concurrent_get");
    group.throughput(Throughput::Elements(32));

    group.bench_function("32_in_flight", |b| {
        b.to_async(&rt).iter(|| async {
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    let client = setup.client.clone();
                    tokio::spawn(async move { client.get("/", None).await.unwrap() })
                })
                .collect();
            for handle in handles {
                black_box(handle.await.unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_ping_latency,
    bench_get_round_trip,
    bench_concurrent_gets,
);

criterion_main!(benches);
