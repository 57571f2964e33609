//! Wire codec and profile parsing benchmarks

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lollipop_tunnel::protocol::batch::{self, BodyFormat};
use lollipop_tunnel::{encode_credentials, ProfileConfig, TunnelConfig};
use std::hint::black_box;
use std::str::FromStr;

const PROFILE_TOML: &str = r#"
[server]
address = "203.0.113.10"
port = 443
path = "vpn"
transport = "streaming"

[auth]
username = "lollipop"
password = "secret"

[network]
local_address = "10.8.0.2"
prefix_len = 24
mtu = 1400
routes = ["0.0.0.0/0"]
dns_servers = ["1.1.1.1"]
"#;

fn packets(count: usize, size: usize) -> Vec<Bytes> {
    (0..count)
        .map(|i| Bytes::from(vec![(i % 251) as u8; size]))
        .collect()
}

fn credentials_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("credentials");

    group.bench_function("encode_basic", |b| {
        b.iter(|| encode_credentials(black_box("lollipop"), black_box("secret")))
    });

    group.finish();
}

fn batch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_codec");

    for count in [1usize, 16, 64] {
        let batch = packets(count, 1400);
        let body = batch::encode_batch(&batch).unwrap();
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", count), &batch, |b, batch| {
            b.iter(|| batch::encode_batch(black_box(batch)))
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &body, |b, body| {
            b.iter(|| batch::decode(black_box(body.clone()), BodyFormat::Batch))
        });
    }

    group.finish();
}

fn profile_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("profile");

    group.bench_function("parse_and_validate", |b| {
        b.iter(|| {
            let profile = ProfileConfig::from_str(black_box(PROFILE_TOML)).unwrap();
            TunnelConfig::try_from(&profile)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    credentials_benchmark,
    batch_benchmark,
    profile_benchmark
);
criterion_main!(benches);
