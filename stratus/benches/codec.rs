//! Envelope codec benchmarks.
//!
//! Measures archiving an invocation envelope into a length-prefixed frame
//! and decoding it back, at several payload sizes.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ntex_bytes::BytesMut;
use serde_json::json;
use stratus_codec::EnvelopeCodec;
use stratus_core::{Envelope, Params};

fn invocation(payload_size: usize) -> Envelope {
    let mut params = Params::new();
    params.insert("blob".into(), json!("x".repeat(payload_size)));
    params.insert("id".into(), json!(12345));
    Envelope::invoke(1, "bench.echo", None, &params)
        .unwrap()
        .with_attachments([("x-trace-id", "0123456789abcdef0123456789abcdef")])
}

fn bench_encode_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode_frame");
    let codec = EnvelopeCodec::new();

    for size in [64, 1024, 16 * 1024, 256 * 1024] {
        let envelope = invocation(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &envelope, |b, envelope| {
            let mut buf = BytesMut::with_capacity(size + 256);
            b.iter(|| {
                buf.clear();
                codec.encode_frame(black_box(envelope), &mut buf).unwrap();
                black_box(&buf);
            });
        });
    }

    group.finish();
}

fn bench_decode_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode_frame");
    let codec = EnvelopeCodec::new();

    for size in [64, 1024, 16 * 1024, 256 * 1024] {
        let mut encoded = BytesMut::new();
        codec.encode_frame(&invocation(size), &mut encoded).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut src = encoded.clone();
                let envelope = codec.decode_frame(&mut src).unwrap().unwrap();
                black_box(envelope);
            });
        });
    }

    group.finish();
}

fn bench_decode_params(c: &mut Criterion) {
    let envelope = invocation(1024);
    c.bench_function("envelope_params_1k", |b| {
        b.iter(|| black_box(envelope.params().unwrap()));
    });
}

criterion_group!(benches, bench_encode_frame, bench_decode_frame, bench_decode_params);
criterion_main!(benches);
