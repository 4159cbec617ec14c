//! Benchmarks for the hot pure paths.
//!
//! - provider error classification across the known encodings
//! - safe list parsing for current and legacy cache formats
//!
//! Run with: cargo bench

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fort_sync::adapters::ProviderError;
use fort_sync::classifier::classify;
use fort_sync::utils::parse_safe_list;
use serde_json::json;

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    let cases = vec![
        ("timeout", ProviderError::Timeout(Duration::from_secs(25))),
        ("rejected", ProviderError::rpc(4001, "User rejected the request.")),
        ("busy", ProviderError::rpc(-32002, "Request already pending")),
        (
            "nested_4902",
            ProviderError::Rpc(json!({
                "code": -32603,
                "message": "Internal JSON-RPC error.",
                "data": {"originalError": {"code": 4902, "message": "Unrecognized chain ID"}}
            })),
        ),
        (
            "revert",
            ProviderError::Rpc(json!({"code": -32603, "message": "execution reverted: not owner"})),
        ),
    ];

    for (name, err) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &err, |b, err| {
            b.iter(|| black_box(classify(black_box(err))));
        });
    }

    group.finish();
}

fn bench_parse_safe_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_safe_list");

    for n in [1usize, 10, 100] {
        let addresses: Vec<String> = (0..n).map(|i| format!("0x{:040x}", i + 1)).collect();
        let current = serde_json::to_string(&addresses).unwrap_or_default();
        let legacy = addresses.join(", ");

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("json", n), &current, |b, raw| {
            b.iter(|| black_box(parse_safe_list(black_box(raw))));
        });
        group.bench_with_input(BenchmarkId::new("legacy", n), &legacy, |b, raw| {
            b.iter(|| black_box(parse_safe_list(black_box(raw))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify, bench_parse_safe_list);
criterion_main!(benches);
