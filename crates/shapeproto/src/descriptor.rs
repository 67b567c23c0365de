// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type descriptors: the resolved, structural form of a declared shape.
//!
//! Every descriptor carries a [`ShapeId`] computed from its canonical name
//! (`int`, `Optional[str]`, `Page[Node]`, `str{max_length=5}`, ...). Equal ids
//! imply equal structure, so ids are used as keys by the descriptor arena and
//! the protocol cache. Cycles are expressed with [`ShapeKind::Recursive`]
//! nodes that point at an id instead of embedding a copy.

use crate::config::KeyCase;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Identity of a shape: 14-byte MD5 digest of its canonical name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId([u8; 14]);

impl ShapeId {
    /// Compute the identity of a canonical shape name.
    pub fn of(canonical: &str) -> Self {
        use md5::{Digest, Md5};

        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();

        // Truncate MD5 (16 bytes) to 14 bytes, same width as XTypes hashes
        let mut bytes = [0u8; 14];
        bytes.copy_from_slice(&digest[..14]);
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 14] {
        &self.0
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShapeId({})", self)
    }
}

/// Leaf data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// Undeclared: any value passes unchanged.
    Any,
}

impl PrimitiveKind {
    /// Canonical name, also the shape name of the bare primitive.
    pub fn canonical(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::Any => "any",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

/// Constraints declared on a shape, enforced after the structural step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    // Strings
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Regular expression matched at the start of the value.
    pub pattern: Option<String>,
    /// Coercion trims surrounding whitespace first.
    pub strip_whitespace: bool,
    /// Coercion truncates to this many characters first.
    pub curtail_length: Option<usize>,

    // Numbers
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub multiple_of: Option<f64>,

    // Sequences and mappings
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn strip_whitespace(mut self) -> Self {
        self.strip_whitespace = true;
        self
    }

    pub fn curtail_length(mut self, n: usize) -> Self {
        self.curtail_length = Some(n);
        self
    }

    pub fn minimum(mut self, v: f64) -> Self {
        self.minimum = Some(v);
        self
    }

    pub fn maximum(mut self, v: f64) -> Self {
        self.maximum = Some(v);
        self
    }

    pub fn exclusive_minimum(mut self, v: f64) -> Self {
        self.exclusive_minimum = Some(v);
        self
    }

    pub fn exclusive_maximum(mut self, v: f64) -> Self {
        self.exclusive_maximum = Some(v);
        self
    }

    pub fn multiple_of(mut self, v: f64) -> Self {
        self.multiple_of = Some(v);
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    pub fn has_text(&self) -> bool {
        self.min_length.is_some()
            || self.max_length.is_some()
            || self.pattern.is_some()
            || self.strip_whitespace
            || self.curtail_length.is_some()
    }

    pub fn has_numeric(&self) -> bool {
        self.minimum.is_some()
            || self.maximum.is_some()
            || self.exclusive_minimum.is_some()
            || self.exclusive_maximum.is_some()
            || self.multiple_of.is_some()
    }

    pub fn has_items(&self) -> bool {
        self.min_items.is_some() || self.max_items.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_text() && !self.has_numeric() && !self.has_items()
    }

    /// Canonical suffix, e.g. `{max_length=5,pattern='^a'}`. Empty when unconstrained.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                parts.push(format!("{}={}", key, v));
            }
        };
        push("min_length", self.min_length.map(|v| v.to_string()));
        push("max_length", self.max_length.map(|v| v.to_string()));
        push("pattern", self.pattern.as_ref().map(|p| format!("{:?}", p)));
        push("strip_whitespace", self.strip_whitespace.then(|| "true".to_string()));
        push("curtail_length", self.curtail_length.map(|v| v.to_string()));
        push("minimum", self.minimum.map(|v| v.to_string()));
        push("maximum", self.maximum.map(|v| v.to_string()));
        push("exclusive_minimum", self.exclusive_minimum.map(|v| v.to_string()));
        push("exclusive_maximum", self.exclusive_maximum.map(|v| v.to_string()));
        push("multiple_of", self.multiple_of.map(|v| v.to_string()));
        push("min_items", self.min_items.map(|v| v.to_string()));
        push("max_items", self.max_items.map(|v| v.to_string()));
        if parts.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Shape kind with its kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    Primitive(PrimitiveKind),
    /// Null or absent short-circuits; anything else goes to the inner shape.
    Optional(Arc<TypeDescriptor>),
    /// Members in declaration order.
    Union(Vec<Arc<TypeDescriptor>>),
    Sequence(SequenceDescriptor),
    /// Fixed-arity, one shape per position.
    Tuple(Vec<Arc<TypeDescriptor>>),
    Mapping(MappingDescriptor),
    Record(RecordDescriptor),
    Enum(EnumDescriptor),
    /// Exact allowed values.
    Literal(Vec<Value>),
    /// Back-reference to a shape that was under resolution.
    Recursive(ShapeRef),
    /// Externally registered leaf shape.
    Leaf(LeafDescriptor),
}

/// A complete type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub id: ShapeId,
    /// Canonical name.
    pub name: String,
    pub kind: ShapeKind,
    pub constraints: Option<Constraints>,
    pub doc: Option<String>,
}

impl TypeDescriptor {
    /// Descriptor whose id is derived from `name`.
    pub fn new(name: impl Into<String>, kind: ShapeKind) -> Self {
        let name = name.into();
        Self {
            id: ShapeId::of(&name),
            name,
            kind,
            constraints: None,
            doc: None,
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(kind.canonical(), ShapeKind::Primitive(kind))
    }

    /// Back-reference node for a shape currently under resolution.
    pub fn recursive(id: ShapeId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            name: name.clone(),
            kind: ShapeKind::Recursive(ShapeRef { id, name }),
            constraints: None,
            doc: None,
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = (!constraints.is_empty()).then_some(constraints);
        self
    }

    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }

    pub fn is_optional(&self) -> bool {
        matches!(self.kind, ShapeKind::Optional(_))
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self.kind, ShapeKind::Recursive(_))
    }

    /// Record or enum: rendered as a named schema definition.
    pub fn is_named(&self) -> bool {
        matches!(self.kind, ShapeKind::Record(_) | ShapeKind::Enum(_))
    }

    pub fn record(&self) -> Option<&RecordDescriptor> {
        match &self.kind {
            ShapeKind::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Get field by declared name if this is a record.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.record()?.fields.iter().find(|f| f.name == name)
    }
}

/// Reference to a shape by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeRef {
    pub id: ShapeId,
    pub name: String,
}

/// Sequence descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDescriptor {
    pub element: Arc<TypeDescriptor>,
    /// Set semantics: duplicates are dropped on coerce and rejected on validate.
    pub unique: bool,
}

/// Mapping descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDescriptor {
    pub key: Arc<TypeDescriptor>,
    pub value: Arc<TypeDescriptor>,
}

/// Record descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDescriptor {
    /// Fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

/// Field descriptor for record members.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_desc: Arc<TypeDescriptor>,
    /// Raw default, coerced through the field's protocol on first use.
    pub default: Option<Value>,
    /// No default and not optional.
    pub required: bool,
    /// Alternate input/output key.
    pub rename: Option<String>,
    pub read_only: bool,
    /// Skipped by serialize.
    pub write_only: bool,
    pub doc: Option<String>,
}

impl FieldDescriptor {
    /// Key used on the wire.
    pub fn key(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.name)
    }

    /// Wire key once `case` is applied; an explicit rename is kept verbatim.
    pub fn key_in(&self, case: Option<KeyCase>) -> String {
        match (&self.rename, case) {
            (Some(rename), _) => rename.clone(),
            (None, Some(case)) => case.apply(&self.name),
            (None, None) => self.name.clone(),
        }
    }
}

/// Enumeration descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub variants: Vec<EnumVariant>,
}

impl EnumDescriptor {
    /// Get variant by name.
    pub fn variant(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Get variant by value.
    pub fn variant_by_value(&self, value: &Value) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| &v.value == value)
    }
}

/// Enum variant.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    pub value: Value,
}

impl EnumVariant {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Registered leaf shape; behaviour lives in the engine's leaf table.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafDescriptor {
    pub schema: serde_json::Value,
}
