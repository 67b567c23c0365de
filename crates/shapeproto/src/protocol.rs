// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compiled protocols.
//!
//! A [`Protocol`] is the immutable pipeline compiled for one shape identity. It
//! is shared as `Arc<Protocol>` and never mutated after publication; the only
//! lazily initialised state is the schema document, behind a `OnceLock`.

use crate::descriptor::{ShapeId, TypeDescriptor};
use crate::error::Result;
use crate::schema::{SchemaContext, SchemaEmitter};
use crate::steps::{Check, Flow, ForwardCell, ForwardStep, Step};
use crate::value::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Behaviour of an externally provided leaf shape (dates, identifiers, ...).
///
/// Errors are plain reasons; the protocol wraps them into
/// [`Error::Coercion`](crate::Error::Coercion) or
/// [`Error::Validation`](crate::Error::Validation) with the current path.
pub trait LeafCodec: Send + Sync + 'static {
    /// Turn raw input into the leaf's native value.
    fn coerce(&self, raw: Value) -> std::result::Result<Value, String>;

    /// Check a native value without transforming it.
    fn validate(&self, value: &Value) -> std::result::Result<(), String>;

    /// Primitive representation of a native value.
    fn serialize(&self, value: &Value) -> std::result::Result<Value, String>;

    /// JSON schema fragment describing the leaf.
    fn schema(&self) -> serde_json::Value;
}

/// Compiled coerce/validate/serialize/schema pipeline for one shape.
pub struct Protocol {
    descriptor: Arc<TypeDescriptor>,
    steps: Vec<Box<dyn Step>>,
    forward: bool,
    context: SchemaContext,
    schema: OnceLock<serde_json::Value>,
}

impl Protocol {
    pub(crate) fn new(
        descriptor: Arc<TypeDescriptor>,
        steps: Vec<Box<dyn Step>>,
        context: SchemaContext,
    ) -> Self {
        Self {
            descriptor,
            steps,
            forward: false,
            context,
            schema: OnceLock::new(),
        }
    }

    /// Placeholder for a shape still being built; delegates once `cell` is filled.
    pub(crate) fn forward(
        descriptor: Arc<TypeDescriptor>,
        cell: Arc<ForwardCell>,
        context: SchemaContext,
    ) -> Self {
        Self {
            descriptor,
            steps: vec![Box::new(ForwardStep::new(cell))],
            forward: true,
            context,
            schema: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ShapeId {
        self.descriptor.id
    }

    /// Canonical shape name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    /// True for the deferred placeholder handed out to re-entrant requests.
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Names of the pipeline steps, in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Coerce raw input into the declared shape.
    pub fn coerce(&self, raw: Value) -> Result<Value> {
        let mut value = raw;
        for step in &self.steps {
            match step.coerce(value)? {
                Flow::Next(next) => value = next,
                Flow::Done(done) => return Ok(done),
            }
        }
        Ok(value)
    }

    /// Coerce a JSON document.
    pub fn coerce_json(&self, json: serde_json::Value) -> Result<Value> {
        self.coerce(Value::from(json))
    }

    /// Check that `value` already conforms to the shape.
    pub fn validate(&self, value: &Value) -> Result<()> {
        for step in &self.steps {
            if let Check::Done = step.validate(value)? {
                break;
            }
        }
        Ok(())
    }

    /// Primitive structural representation of `value`.
    pub fn serialize(&self, value: &Value) -> Result<Value> {
        for step in &self.steps {
            if let Some(out) = step.serialize(value)? {
                return Ok(out);
            }
        }
        Ok(value.clone())
    }

    /// Serialize straight to JSON.
    pub fn serialize_json(&self, value: &Value) -> Result<serde_json::Value> {
        self.serialize(value).map(|v| v.to_json())
    }

    /// JSON schema document for this shape, emitted on first call.
    pub fn schema(&self) -> &serde_json::Value {
        self.schema
            .get_or_init(|| SchemaEmitter::new(&self.context).document(&self.descriptor))
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.descriptor.name)
            .field("steps", &self.step_names())
            .field("forward", &self.forward)
            .finish()
    }
}
