// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Bench code readability over pedantic
#![allow(clippy::cast_possible_wrap)] // Bench data conversions
#![allow(clippy::missing_panics_doc)] // Benches panic on failure
#![allow(clippy::semicolon_if_nothing_returned)] // Benchmark code formatting

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use shapeproto::{Engine, RecordBuilder, TypeRef, Value};

fn engine() -> Engine {
    let engine = Engine::default();
    engine
        .define_all([
            RecordBuilder::new("Point")
                .field("x", TypeRef::int())
                .field("y", TypeRef::int())
                .field_default("label", TypeRef::optional(TypeRef::string()), Value::Null)
                .build(),
            RecordBuilder::new("Node")
                .field("value", TypeRef::int())
                .field_default(
                    "children",
                    TypeRef::sequence(TypeRef::named("Node")),
                    Vec::<Value>::new(),
                )
                .build(),
        ])
        .unwrap();
    engine
}

fn tree(depth: usize, fanout: usize) -> Value {
    let children: Vec<Value> = if depth == 0 {
        Vec::new()
    } else {
        (0..fanout).map(|_| tree(depth - 1, fanout)).collect()
    };
    Value::map([
        ("value", Value::from(depth.to_string())),
        ("children", Value::Seq(children)),
    ])
}

// ============================================================================
// Cache Benchmarks
// ============================================================================

/// Benchmark: protocol lookup for an already compiled shape
fn bench_cached_lookup(c: &mut Criterion) {
    let engine = engine();
    engine.protocol_for("Point").unwrap();
    c.bench_function("cached_protocol_lookup", |b| {
        b.iter(|| engine.protocol_for(black_box("Point")).unwrap())
    });
}

/// Benchmark: resolve and compile a recursive shape on a fresh engine
fn bench_cold_compile(c: &mut Criterion) {
    c.bench_function("cold_compile_recursive", |b| {
        b.iter_batched(
            engine,
            |engine| engine.protocol_for(black_box("Node")).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

// ============================================================================
// Pipeline Benchmarks
// ============================================================================

/// Benchmark: coerce a flat record with lenient numbers
fn bench_coerce_record(c: &mut Criterion) {
    let engine = engine();
    let point = engine.protocol_for("Point").unwrap();
    let input = Value::map([("x", Value::from("12")), ("y", Value::Int(-4))]);
    c.bench_function("coerce_record", |b| {
        b.iter_batched(
            || input.clone(),
            |raw| point.coerce(black_box(raw)).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark: coerce a recursive tree (depth 4, fanout 4)
fn bench_coerce_tree(c: &mut Criterion) {
    let engine = engine();
    let node = engine.protocol_for("Node").unwrap();
    let input = tree(4, 4);
    c.bench_function("coerce_tree_d4_f4", |b| {
        b.iter_batched(
            || input.clone(),
            |raw| node.coerce(black_box(raw)).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark: serialize a recursive tree back to primitives
fn bench_serialize_tree(c: &mut Criterion) {
    let engine = engine();
    let node = engine.protocol_for("Node").unwrap();
    let native = node.coerce(tree(4, 4)).unwrap();
    c.bench_function("serialize_tree_d4_f4", |b| {
        b.iter(|| node.serialize(black_box(&native)).unwrap())
    });
}

criterion_group!(cache, bench_cached_lookup, bench_cold_compile);
criterion_group!(pipeline, bench_coerce_record, bench_coerce_tree, bench_serialize_tree);
criterion_main!(cache, pipeline);
