//! Throughput Benchmark for evalpipe
//!
//! This benchmark measures the in-process cost of the protocol path:
//! frame decoding, response aggregation and evaluation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evalpipe::evaluator::{ArithmeticEvaluator, Evaluator};
use evalpipe::protocol::{aggregate, encode, EvaluationOutcome, FrameCodec};
use std::time::Duration;

/// Benchmark decoding whole frames
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [16usize, 1024, 64 * 1024] {
        let frame = encode("x".repeat(size).as_bytes());
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("single_chunk", size), &frame, |b, frame| {
            let mut codec = FrameCodec::new();
            b.iter(|| {
                codec.push(frame);
                black_box(codec.next_frame().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark decoding a frame that arrives in small pieces
fn bench_decode_fragmented(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_fragmented");

    for chunk_size in [1usize, 64, 4096] {
        let frame = encode("y".repeat(64 * 1024).as_bytes());
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("chunk", chunk_size),
            &frame,
            |b, frame| {
                let mut codec = FrameCodec::new();
                b.iter(|| {
                    for chunk in frame.chunks(chunk_size) {
                        codec.push(chunk);
                        if let Some(payload) = codec.next_frame().unwrap() {
                            black_box(payload);
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark pipelined frames in one read
fn bench_decode_pipelined(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_pipelined");

    let mut batch = Vec::new();
    for i in 0..100 {
        batch.extend_from_slice(&encode(format!("x = {}; x * 2", i).as_bytes()));
    }
    group.throughput(Throughput::Elements(100));

    group.bench_function("100_frames", |b| {
        let mut codec = FrameCodec::new();
        b.iter(|| {
            codec.push(&batch);
            while let Some(frame) = codec.next_frame().unwrap() {
                black_box(frame);
            }
        });
    });

    group.finish();
}

/// Benchmark response aggregation
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    let values: Vec<EvaluationOutcome> = (0..100)
        .map(|i| EvaluationOutcome::value(i.to_string()))
        .collect();
    group.throughput(Throughput::Elements(values.len() as u64));

    group.bench_function("100_values", |b| {
        b.iter(|| black_box(aggregate(&values)));
    });

    let mut failing = values.clone();
    failing[10] = EvaluationOutcome::failure("division by zero");

    group.bench_function("early_failure", |b| {
        b.iter(|| black_box(aggregate(&failing)));
    });

    group.finish();
}

/// Benchmark the arithmetic evaluator
fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("cached_statement", |b| {
        let mut calc = ArithmeticEvaluator::new();
        calc.evaluate("x = 5").unwrap();
        b.iter(|| black_box(calc.evaluate("x * 2 + (x - 1) % 3").unwrap()));
    });

    group.bench_function("fresh_statements", |b| {
        let mut calc = ArithmeticEvaluator::new();
        let mut i = 0u64;
        b.iter(|| {
            let instruction = format!("v{} = {}; v{} * 2", i, i, i);
            black_box(calc.evaluate(&instruction).unwrap());
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_decode_fragmented,
    bench_decode_pipelined,
    bench_aggregate,
    bench_evaluate,
);

criterion_main!(benches);
