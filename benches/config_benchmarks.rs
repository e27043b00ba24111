//! Configuration parsing and validation benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rsslvpn::Config;
use std::hint::black_box;
use std::str::FromStr;

const CONFIG_TOML: &str = r#"
[server]
hostname = "vpn.example.com"
port = 443

[auth]
username = "testuser"
password = "testpass"
"#;

const FULL_CONFIG_TOML: &str = r#"
[server]
hostname = "vpn.example.com"
port = 8443
ignore_cert_errors = false
ca_file = "/etc/rsslvpn/ca.pem"
timeout = 20

[auth]
username = "testuser"
password = "testpass"

[reconnect]
auto_reconnect = true
max_retries = 10
retry_delay = 2

[network]
interface_name = "vpn0"
mtu = 1400
resolv_conf = "/etc/resolv.conf"

[logging]
level = "debug"
"#;

fn config_parsing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_parsing");

    group.bench_function("parse_minimal_config", |b| {
        b.iter(|| {
            let config = Config::from_str(black_box(CONFIG_TOML)).unwrap();
            black_box(config);
        });
    });

    group.bench_function("parse_full_config", |b| {
        b.iter(|| {
            let config = Config::from_str(black_box(FULL_CONFIG_TOML)).unwrap();
            black_box(config);
        });
    });

    group.bench_function("validate_config", |b| {
        let config = Config::from_str(FULL_CONFIG_TOML).unwrap();
        b.iter(|| {
            let result = black_box(&config).validate();
            let _ = black_box(result);
        });
    });

    group.finish();
}

fn config_serialization_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_serialization");

    let config = Config::from_str(FULL_CONFIG_TOML).unwrap();

    group.bench_function("serialize_config", |b| {
        b.iter(|| {
            let serialized = black_box(&config).to_toml().unwrap();
            black_box(serialized);
        });
    });

    group.finish();
}

fn config_throughput_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_throughput");

    let configs = vec![("minimal", CONFIG_TOML), ("full", FULL_CONFIG_TOML)];

    for (size, config_str) in configs {
        group.throughput(Throughput::Bytes(config_str.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("parse_throughput", size),
            config_str,
            |b, config_str| {
                b.iter(|| {
                    let config = Config::from_str(black_box(config_str)).unwrap();
                    black_box(config);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    config_parsing_benchmark,
    config_serialization_benchmark,
    config_throughput_benchmark
);
criterion_main!(benches);
