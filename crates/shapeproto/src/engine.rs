// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The engine instance.
//!
//! An [`Engine`] owns one definition table, one descriptor arena and one
//! protocol cache. Everything it compiles lives as long as the engine; separate
//! engines share nothing, which keeps tests isolated from each other.
//!
//! # Example
//!
//! ```
//! use shapeproto::{Engine, RecordBuilder, TypeRef, Value};
//!
//! let engine = Engine::default();
//! engine
//!     .define(
//!         RecordBuilder::new("Point")
//!             .field("x", TypeRef::int())
//!             .field_default("y", TypeRef::int(), 0)
//!             .build(),
//!     )
//!     .unwrap();
//!
//! let point = engine
//!     .coerce(&TypeRef::named("Point"), Value::map([("x", "3")]))
//!     .unwrap();
//! assert_eq!(point.get("x"), Some(&Value::Int(3)));
//! assert_eq!(point.get("y"), Some(&Value::Int(0)));
//! ```

use crate::cache::{CacheStats, ProtocolCache};
use crate::compiler::Compiler;
use crate::config::EngineConfig;
use crate::descriptor::{ShapeKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::protocol::{LeafCodec, Protocol};
use crate::reference::{LeafDef, ShapeDef, TypeRef};
use crate::resolver::{Resolver, ShapeArena};
use crate::schema::{SchemaContext, SchemaEmitter};
use crate::steps::Step;
use crate::value::Value;
use dashmap::DashMap;
use std::sync::Arc;

/// Resolution, compilation and caching of shapes.
pub struct Engine {
    config: EngineConfig,
    resolver: Resolver,
    cache: ProtocolCache,
    leaves: DashMap<String, Arc<dyn LeafCodec>>,
    context: SchemaContext,
}

impl Default for Engine {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl Engine {
    /// Create an engine with a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let arena = Arc::new(ShapeArena::new());
        let context = SchemaContext::new(Arc::clone(&arena), config.forbids_unknown())
            .with_case(config.output_case);
        log::debug!(
            "[Engine] created (unknown_fields={:?}, lenient_numbers={}, omit_none={}, output_case={:?})",
            config.unknown_fields,
            config.lenient_numbers,
            config.omit_none,
            config.output_case
        );
        Self {
            resolver: Resolver::new(arena),
            cache: ProtocolCache::new(context.clone()),
            leaves: DashMap::new(),
            context,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arc<ShapeArena> {
        self.resolver.arena()
    }

    pub fn cache(&self) -> &ProtocolCache {
        &self.cache
    }

    /// Register a named shape. Definitions may arrive in any order.
    pub fn define(&self, def: impl Into<ShapeDef>) -> Result<()> {
        let def = def.into();
        if let ShapeDef::Leaf(leaf) = &def {
            return Err(Error::invalid_shape(
                &leaf.name,
                "leaf shapes are added with register_leaf",
            ));
        }
        self.resolver.define(def)
    }

    /// Register every definition, stopping at the first failure.
    pub fn define_all<I>(&self, defs: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<ShapeDef>,
    {
        defs.into_iter().try_for_each(|def| self.define(def))
    }

    /// Register an external leaf shape under `name` and publish its protocol.
    pub fn register_leaf<C>(&self, name: impl Into<String>, codec: C) -> Result<Arc<Protocol>>
    where
        C: LeafCodec,
    {
        let name = name.into();
        let codec: Arc<dyn LeafCodec> = Arc::new(codec);
        self.resolver.define(ShapeDef::Leaf(LeafDef {
            name: name.clone(),
            schema: codec.schema(),
        }))?;
        self.leaves.entry(name.clone()).or_insert(codec);

        let desc = self.resolve(&TypeRef::named(name.as_str()))?;
        if let Some(existing) = self.cache.get(&desc.id) {
            return Ok(existing);
        }
        let protocol = Compiler::new(self).compile(&desc)?;
        log::debug!("[Engine] registered leaf {}", name);
        Ok(self.cache.publish(protocol))
    }

    pub(crate) fn leaf_codec(&self, name: &str) -> Option<Arc<dyn LeafCodec>> {
        self.leaves.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Resolve a reference into its descriptor graph.
    pub fn resolve(&self, type_ref: &TypeRef) -> Result<Arc<TypeDescriptor>> {
        self.resolver.resolve(type_ref)
    }

    /// Compiled protocol for a reference; the same instance for every call.
    pub fn protocol(&self, type_ref: &TypeRef) -> Result<Arc<Protocol>> {
        let desc = self.resolve(type_ref)?;
        self.protocol_for_descriptor(&desc)
    }

    /// Compiled protocol for a defined shape.
    pub fn protocol_for(&self, name: &str) -> Result<Arc<Protocol>> {
        self.protocol(&TypeRef::named(name))
    }

    /// Protocol for an already resolved descriptor.
    pub fn protocol_for_descriptor(&self, desc: &Arc<TypeDescriptor>) -> Result<Arc<Protocol>> {
        let target = match &desc.kind {
            ShapeKind::Recursive(r) => self
                .arena()
                .get(&r.id)
                .ok_or_else(|| Error::unresolved(r.name.clone()))?,
            _ => Arc::clone(desc),
        };
        self.cache
            .get_or_compile(&target, || Compiler::new(self).compile(&target))
    }

    pub(crate) fn assemble(&self, desc: Arc<TypeDescriptor>, steps: Vec<Box<dyn Step>>) -> Protocol {
        Protocol::new(desc, steps, self.context.clone())
    }

    pub fn coerce(&self, type_ref: &TypeRef, raw: impl Into<Value>) -> Result<Value> {
        self.protocol(type_ref)?.coerce(raw.into())
    }

    pub fn validate(&self, type_ref: &TypeRef, value: &Value) -> Result<()> {
        self.protocol(type_ref)?.validate(value)
    }

    pub fn serialize(&self, type_ref: &TypeRef, value: &Value) -> Result<Value> {
        self.protocol(type_ref)?.serialize(value)
    }

    pub fn schema(&self, type_ref: &TypeRef) -> Result<serde_json::Value> {
        Ok(self.protocol(type_ref)?.schema().clone())
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// One `definitions` document covering every record and enum compiled so far.
    pub fn definitions_schema(&self) -> serde_json::Value {
        let named: Vec<Arc<TypeDescriptor>> = self
            .cache
            .protocols()
            .into_iter()
            .filter(|p| p.descriptor().is_named())
            .map(|p| Arc::clone(p.descriptor()))
            .collect();
        SchemaEmitter::new(&self.context).definitions_document(named.iter().map(|d| &**d))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("shapes", &self.arena().len())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnknownFields;
    use crate::reference::RecordBuilder;

    struct Upper;

    impl LeafCodec for Upper {
        fn coerce(&self, raw: Value) -> std::result::Result<Value, String> {
            match raw {
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => Err(format!("expected text, got {}", other.type_name())),
            }
        }

        fn validate(&self, value: &Value) -> std::result::Result<(), String> {
            match value.as_str() {
                Some(s) if s.chars().all(|c| !c.is_lowercase()) => Ok(()),
                _ => Err("not upper-case text".into()),
            }
        }

        fn serialize(&self, value: &Value) -> std::result::Result<Value, String> {
            Ok(value.clone())
        }

        fn schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "string", "format": "upper" })
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Engine::new(EngineConfig::default().max_union_candidates(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_protocol_is_shared() {
        let engine = Engine::default();
        let a = engine.protocol(&TypeRef::sequence(TypeRef::int())).unwrap();
        let b = engine.protocol(&TypeRef::sequence(TypeRef::int())).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.stats().builds, 2);
    }

    #[test]
    fn test_leaf_registration() {
        let engine = Engine::default();
        let leaf = engine.register_leaf("Upper", Upper).unwrap();
        assert_eq!(leaf.coerce(Value::from("abc")).unwrap(), Value::from("ABC"));

        engine
            .define(RecordBuilder::new("Tag").field("label", TypeRef::named("Upper")).build())
            .unwrap();
        let tag = engine
            .coerce(&TypeRef::named("Tag"), Value::map([("label", "x")]))
            .unwrap();
        assert_eq!(tag.get("label"), Some(&Value::from("X")));

        let schema = engine.schema(&TypeRef::named("Tag")).unwrap();
        assert_eq!(schema["properties"]["label"]["format"], "upper");

        let err = engine
            .validate(&TypeRef::named("Upper"), &Value::from("x"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_leaf_def_cannot_be_defined_directly() {
        let engine = Engine::default();
        let def = ShapeDef::Leaf(LeafDef {
            name: "Raw".into(),
            schema: serde_json::json!({}),
        });
        assert!(matches!(engine.define(def), Err(Error::InvalidShape { .. })));
    }

    #[test]
    fn test_union_limit() {
        let engine = Engine::new(EngineConfig::default().max_union_candidates(2)).unwrap();
        let err = engine
            .protocol(&TypeRef::union(vec![
                TypeRef::int(),
                TypeRef::string(),
                TypeRef::bool(),
            ]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShape { .. }));
        assert_eq!(engine.stats().failures, 1);
    }

    #[test]
    fn test_forbid_unknown_fields() {
        let mut config = EngineConfig::default();
        config.unknown_fields = UnknownFields::Forbid;
        let engine = Engine::new(config).unwrap();
        engine
            .define(RecordBuilder::new("P").field("x", TypeRef::int()).build())
            .unwrap();
        let err = engine
            .coerce(&TypeRef::named("P"), Value::map([("x", 1), ("y", 2)]))
            .unwrap_err();
        assert!(matches!(err, Error::Coercion { .. }));
        assert_eq!(err.path().map(ToString::to_string).as_deref(), Some("y"));
    }

    #[test]
    fn test_definitions_schema_lists_compiled_records() {
        let engine = Engine::default();
        engine
            .define(RecordBuilder::new("A").field("b", TypeRef::named("B")).build())
            .unwrap();
        engine
            .define(RecordBuilder::new("B").field("x", TypeRef::int()).build())
            .unwrap();
        engine.protocol_for("A").unwrap();
        let doc = engine.definitions_schema();
        let defs = doc["definitions"].as_object().unwrap();
        assert!(defs.contains_key("A"));
        assert!(defs.contains_key("B"));
    }
}
