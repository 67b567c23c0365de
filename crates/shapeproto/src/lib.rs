// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # shapeproto - declared shapes compiled into coercion protocols
//!
//! Declare data shapes (records with typed fields, generic containers, unions,
//! optionals, enumerations, literal sets, recursive structures) and compile
//! each one into a [`Protocol`] that coerces raw input into the shape,
//! validates values against it, serializes values back to a primitive
//! representation and emits a JSON schema describing it.
//!
//! ## Quick Start
//!
//! ```rust
//! use shapeproto::{Engine, RecordBuilder, TypeRef, Value};
//!
//! let engine = Engine::default();
//! engine
//!     .define(
//!         RecordBuilder::new("Node")
//!             .field("value", TypeRef::int())
//!             .field_default("children", TypeRef::sequence(TypeRef::named("Node")), Vec::<Value>::new())
//!             .build(),
//!     )
//!     .unwrap();
//!
//! let node = engine.protocol_for("Node").unwrap();
//! let tree = node
//!     .coerce_json(serde_json::json!({"value": "1", "children": [{"value": 2}]}))
//!     .unwrap();
//! assert_eq!(tree.get("value"), Some(&Value::Int(1)));
//! assert_eq!(node.serialize_json(&tree).unwrap()["children"][0]["value"], 2);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TypeRef --> Resolver --> TypeDescriptor --> ProtocolCache --(miss)--> Compiler
//!               |              (arena)              ^                      |
//!               +------------- child shapes --------+---------- Steps <---+
//! ```
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Engine`] | Owns definitions, descriptor arena and protocol cache |
//! | [`TypeRef`] / [`ShapeDef`] | Declared references and named definitions |
//! | [`TypeDescriptor`] | Resolved structural form, keyed by [`ShapeId`] |
//! | [`Protocol`] | Compiled coerce/validate/serialize/schema pipeline |
//! | [`LeafCodec`] | Seam for externally provided leaf shapes |
//!
//! Logging goes through the `log` facade; install any logger to see
//! resolution and cache activity.

pub mod cache;
mod compiler;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod reference;
pub mod resolver;
mod schema;
mod steps;
pub mod value;

pub use cache::{CacheStats, ProtocolCache};
pub use config::{ConfigError, EngineConfig, KeyCase, UnknownFields};
pub use descriptor::{
    Constraints, EnumDescriptor, EnumVariant, FieldDescriptor, MappingDescriptor, PrimitiveKind,
    RecordDescriptor, SequenceDescriptor, ShapeId, ShapeKind, ShapeRef, TypeDescriptor,
};
pub use engine::Engine;
pub use error::{Error, ErrorPath, PathSegment, Result};
pub use protocol::{LeafCodec, Protocol};
pub use reference::{
    AliasDef, EnumBuilder, EnumDef, FieldDef, LeafDef, RecordBuilder, RecordDef, ShapeDef, TypeRef,
};
pub use resolver::{Resolver, ShapeArena};
pub use value::{Record, Value};
