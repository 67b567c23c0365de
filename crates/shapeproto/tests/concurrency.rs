// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concurrent protocol requests.
//!
//! Many threads ask one engine for the same shapes at once. Every distinct
//! shape must be built exactly once and every caller must observe the same
//! protocol instance.

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_wrap)]

use shapeproto::{Engine, Protocol, RecordBuilder, TypeRef, Value};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 16;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tree_engine() -> Arc<Engine> {
    let engine = Engine::default();
    engine
        .define_all([
            RecordBuilder::new("Node")
                .field("value", TypeRef::int())
                .field_default(
                    "children",
                    TypeRef::sequence(TypeRef::named("Node")),
                    Vec::<Value>::new(),
                )
                .build(),
            RecordBuilder::new("Forest")
                .field("trees", TypeRef::mapping(TypeRef::string(), TypeRef::named("Node")))
                .build(),
        ])
        .unwrap();
    Arc::new(engine)
}

fn race<F>(engine: &Arc<Engine>, request: F) -> Vec<Arc<Protocol>>
where
    F: Fn(&Engine) -> Arc<Protocol> + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(THREADS));
    let request = Arc::new(request);
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(engine);
            let barrier = Arc::clone(&barrier);
            let request = Arc::clone(&request);
            thread::spawn(move || {
                barrier.wait();
                request(&engine)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_concurrent_requests_share_one_instance() {
    init_logging();
    for _ in 0..10 {
        let engine = tree_engine();
        let protocols = race(&engine, |engine| engine.protocol_for("Node").unwrap());

        let first = &protocols[0];
        assert!(protocols.iter().all(|p| Arc::ptr_eq(p, first)));
        assert!(!first.is_forward());

        // Node, int and list[Node]
        let stats = engine.stats();
        assert_eq!(stats.builds, 3);
        assert_eq!(stats.failures, 0);
        assert_eq!(engine.cache().len(), 3);
    }
}

#[test]
fn test_concurrent_requests_for_overlapping_shapes() {
    init_logging();
    for _ in 0..10 {
        let engine = tree_engine();
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        engine.protocol_for("Forest").unwrap()
                    } else {
                        engine.protocol_for("Node").unwrap()
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Node, int, list[Node], str, dict[str,Node] and Forest
        assert_eq!(engine.stats().builds, 6);
        let node = engine.protocol_for("Node").unwrap();
        let forest = engine.protocol_for("Forest").unwrap();
        let trees = engine
            .protocol(&TypeRef::mapping(TypeRef::string(), TypeRef::named("Node")))
            .unwrap();
        assert!(Arc::ptr_eq(&node, &engine.protocol_for("Node").unwrap()));
        assert!(Arc::ptr_eq(&forest, &engine.protocol_for("Forest").unwrap()));
        assert_eq!(trees.name(), "dict[str,Node]");
    }
}

#[test]
fn test_shared_protocol_used_from_many_threads() {
    init_logging();
    let engine = tree_engine();
    let forest = engine.protocol_for("Forest").unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let forest = Arc::clone(&forest);
            thread::spawn(move || {
                let input = serde_json::json!({
                    "trees": {
                        "oak": {"value": i, "children": [{"value": i + 1}]},
                        "elm": {"value": "7"}
                    }
                });
                let value = forest.coerce_json(input).unwrap();
                forest.validate(&value).unwrap();
                let wire = forest.serialize_json(&value).unwrap();
                assert_eq!(wire["trees"]["oak"]["children"][0]["value"], i + 1);
                assert_eq!(wire["trees"]["elm"]["value"], 7);
                assert_eq!(wire["trees"]["elm"]["children"], serde_json::json!([]));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(forest.schema()["definitions"]["Node"].is_object());
}

#[test]
fn test_concurrent_definitions_and_requests() {
    init_logging();
    let engine = Arc::new(Engine::default());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let name = format!("Item{}", i);
                engine
                    .define(
                        RecordBuilder::new(name.as_str())
                            .field("id", TypeRef::int())
                            .field("next", TypeRef::optional(TypeRef::named(name.as_str())))
                            .build(),
                    )
                    .unwrap();
                barrier.wait();
                let protocol = engine.protocol_for(&name).unwrap();
                let value = protocol
                    .coerce_json(serde_json::json!({"id": i, "next": {"id": "1"}}))
                    .unwrap();
                assert_eq!(value.as_record().unwrap().name, name);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Per item: the record and its optional; int is shared
    assert_eq!(engine.stats().builds, 1 + 2 * THREADS as u64);
}
