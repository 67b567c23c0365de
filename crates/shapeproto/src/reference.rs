// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declared type references and shape definitions.
//!
//! A [`TypeRef`] is what a caller asks the engine for; a [`ShapeDef`] is a named
//! declaration registered ahead of time. Neither is resolved: names inside them
//! are looked up by the resolver on first use, so definitions may be added in any
//! order.

use crate::descriptor::{Constraints, EnumVariant, PrimitiveKind};
use crate::value::Value;

/// Reference to a shape, as declared.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    /// Previously (or later) defined shape, or registered leaf.
    Named(String),
    /// Instantiation of a generic definition, e.g. `Page[Node]`.
    Generic { name: String, args: Vec<TypeRef> },
    /// Type parameter of the enclosing generic definition.
    Param(String),
    Optional(Box<TypeRef>),
    Union(Vec<TypeRef>),
    Sequence(Box<TypeRef>),
    Set(Box<TypeRef>),
    Tuple(Vec<TypeRef>),
    Mapping(Box<TypeRef>, Box<TypeRef>),
    Literal(Vec<Value>),
    Constrained(Box<TypeRef>, Constraints),
}

impl TypeRef {
    pub fn bool() -> Self {
        Self::Primitive(PrimitiveKind::Bool)
    }

    pub fn int() -> Self {
        Self::Primitive(PrimitiveKind::Int)
    }

    pub fn float() -> Self {
        Self::Primitive(PrimitiveKind::Float)
    }

    pub fn string() -> Self {
        Self::Primitive(PrimitiveKind::Str)
    }

    pub fn bytes() -> Self {
        Self::Primitive(PrimitiveKind::Bytes)
    }

    pub fn any() -> Self {
        Self::Primitive(PrimitiveKind::Any)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        Self::Generic {
            name: name.into(),
            args,
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    pub fn optional(inner: TypeRef) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn union(members: Vec<TypeRef>) -> Self {
        Self::Union(members)
    }

    pub fn sequence(element: TypeRef) -> Self {
        Self::Sequence(Box::new(element))
    }

    pub fn set(element: TypeRef) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn tuple(items: Vec<TypeRef>) -> Self {
        Self::Tuple(items)
    }

    pub fn mapping(key: TypeRef, value: TypeRef) -> Self {
        Self::Mapping(Box::new(key), Box::new(value))
    }

    pub fn literal<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::Literal(values.into_iter().map(Into::into).collect())
    }

    /// Attach constraints to this reference.
    pub fn with(self, constraints: Constraints) -> Self {
        Self::Constrained(Box::new(self), constraints)
    }
}

impl From<PrimitiveKind> for TypeRef {
    fn from(kind: PrimitiveKind) -> Self {
        Self::Primitive(kind)
    }
}

/// A named shape declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDef {
    Record(RecordDef),
    Enum(EnumDef),
    Alias(AliasDef),
    /// Registered leaf; created by `Engine::register_leaf`.
    Leaf(LeafDef),
}

impl ShapeDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Record(d) => &d.name,
            Self::Enum(d) => &d.name,
            Self::Alias(d) => &d.name,
            Self::Leaf(d) => &d.name,
        }
    }

    /// Declared type parameters (empty unless generic).
    pub fn params(&self) -> &[String] {
        match self {
            Self::Record(d) => &d.params,
            Self::Alias(d) => &d.params,
            Self::Enum(_) | Self::Leaf(_) => &[],
        }
    }
}

impl From<RecordDef> for ShapeDef {
    fn from(def: RecordDef) -> Self {
        Self::Record(def)
    }
}

impl From<EnumDef> for ShapeDef {
    fn from(def: EnumDef) -> Self {
        Self::Enum(def)
    }
}

impl From<AliasDef> for ShapeDef {
    fn from(def: AliasDef) -> Self {
        Self::Alias(def)
    }
}

/// Record declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDef {
    pub name: String,
    pub params: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub doc: Option<String>,
}

/// Record field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub type_ref: TypeRef,
    pub default: Option<Value>,
    pub rename: Option<String>,
    pub read_only: bool,
    pub write_only: bool,
    pub doc: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            default: None,
            rename: None,
            read_only: false,
            write_only: false,
            doc: None,
        }
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Read from and write to `key` instead of the field name.
    pub fn rename(mut self, key: impl Into<String>) -> Self {
        self.rename = Some(key.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Enumeration declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub doc: Option<String>,
}

/// Alias declaration: `name` stands for `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDef {
    pub name: String,
    pub params: Vec<String>,
    pub target: TypeRef,
}

impl AliasDef {
    pub fn new(name: impl Into<String>, target: TypeRef) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            target,
        }
    }

    pub fn with_params(mut self, params: &[&str]) -> Self {
        self.params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

/// Leaf declaration; its behaviour is the registered codec.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafDef {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Builder for record declarations.
#[derive(Debug)]
pub struct RecordBuilder {
    def: RecordDef,
}

impl RecordBuilder {
    /// Create a new builder for a record shape.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: RecordDef {
                name: name.into(),
                params: Vec::new(),
                fields: Vec::new(),
                doc: None,
            },
        }
    }

    /// Declare type parameters, making the record generic.
    pub fn params(mut self, params: &[&str]) -> Self {
        self.def.params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, type_ref: TypeRef) -> Self {
        self.def.fields.push(FieldDef::new(name, type_ref));
        self
    }

    /// Add a field with a default value.
    pub fn field_default(
        mut self,
        name: impl Into<String>,
        type_ref: TypeRef,
        default: impl Into<Value>,
    ) -> Self {
        self.def
            .fields
            .push(FieldDef::new(name, type_ref).default(default));
        self
    }

    /// Add a fully configured field.
    pub fn field_def(mut self, field: FieldDef) -> Self {
        self.def.fields.push(field);
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.def.doc = Some(doc.into());
        self
    }

    pub fn build(self) -> ShapeDef {
        ShapeDef::Record(self.def)
    }
}

/// Builder for enum declarations.
#[derive(Debug)]
pub struct EnumBuilder {
    name: String,
    variants: Vec<EnumVariant>,
    next_value: i64,
    doc: Option<String>,
}

impl EnumBuilder {
    /// Create a new enum builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: Vec::new(),
            next_value: 0,
            doc: None,
        }
    }

    /// Add a variant with auto-incrementing value.
    pub fn variant(mut self, name: impl Into<String>) -> Self {
        self.variants.push(EnumVariant::new(name, self.next_value));
        self.next_value += 1;
        self
    }

    /// Add a variant with explicit value.
    pub fn variant_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Value::Int(v) = value {
            self.next_value = v + 1;
        }
        self.variants.push(EnumVariant::new(name, value));
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn build(self) -> ShapeDef {
        ShapeDef::Enum(EnumDef {
            name: self.name,
            variants: self.variants,
            doc: self.doc,
        })
    }
}
