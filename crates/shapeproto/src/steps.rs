// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline steps.
//!
//! A [`Protocol`] runs its steps in order. Each step either hands the value to
//! the next step or finishes the pipeline. Container steps call their child
//! protocols and prefix child errors with the item's field, index or key.

use crate::descriptor::{Constraints, EnumVariant, FieldDescriptor, PrimitiveKind};
use crate::error::{Error, Result};
use crate::protocol::{LeafCodec, Protocol};
use crate::value::{Record, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// Outcome of a coercion step.
pub(crate) enum Flow {
    /// Hand the value to the next step.
    Next(Value),
    /// Stop; this is the result.
    Done(Value),
}

/// Outcome of a validation step.
pub(crate) enum Check {
    Next,
    Done,
}

/// One structural concern of a protocol.
pub(crate) trait Step: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn coerce(&self, value: Value) -> Result<Flow> {
        Ok(Flow::Next(value))
    }

    fn validate(&self, _value: &Value) -> Result<Check> {
        Ok(Check::Next)
    }

    /// `Some` ends the pipeline with the primitive representation.
    fn serialize(&self, _value: &Value) -> Result<Option<Value>> {
        Ok(None)
    }
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::coercion(format!("expected {}, got {}", expected, value.type_name()))
}

fn invalid(expected: &str, value: &Value) -> Error {
    Error::validation(format!("expected {}, got {}", expected, value.type_name()))
}

/// Primitive representation of an arbitrary value.
pub(crate) fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Bytes(b) => Value::Str(BASE64.encode(b)),
        Value::Enum(name) => Value::Str(name.clone()),
        Value::Seq(items) => Value::Seq(items.iter().map(to_primitive).collect()),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (to_primitive(k), to_primitive(v)))
                .collect(),
        ),
        Value::Record(r) => Value::Map(
            r.fields
                .iter()
                .map(|(k, v)| (Value::Str(k.clone()), to_primitive(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Optional / delegation
// ---------------------------------------------------------------------------

/// Null short-circuits the rest of the pipeline.
#[derive(Debug)]
pub(crate) struct NullableStep;

impl Step for NullableStep {
    fn name(&self) -> &'static str {
        "nullable"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        Ok(if value.is_null() {
            Flow::Done(Value::Null)
        } else {
            Flow::Next(value)
        })
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        Ok(if value.is_null() { Check::Done } else { Check::Next })
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        Ok(value.is_null().then_some(Value::Null))
    }
}

/// Hands the value to another protocol.
#[derive(Debug)]
pub(crate) struct DelegateStep {
    target: Arc<Protocol>,
}

impl DelegateStep {
    pub(crate) fn new(target: Arc<Protocol>) -> Self {
        Self { target }
    }
}

impl Step for DelegateStep {
    fn name(&self) -> &'static str {
        "delegate"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        self.target.coerce(value).map(Flow::Done)
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        self.target.validate(value).map(|()| Check::Done)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        self.target.serialize(value).map(Some)
    }
}

/// Late-bound target of a forward protocol.
#[derive(Debug)]
pub(crate) struct ForwardCell {
    name: String,
    target: OnceLock<Weak<Protocol>>,
}

impl ForwardCell {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: OnceLock::new(),
        }
    }

    /// Bind the published protocol. Later calls are ignored.
    pub(crate) fn fill(&self, target: &Arc<Protocol>) {
        let _ = self.target.set(Arc::downgrade(target));
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.target.get().is_some()
    }

    fn get(&self) -> Result<Arc<Protocol>> {
        self.target
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::unresolved(self.name.clone()))
    }
}

/// Delegates to the protocol published for a shape that was still building.
#[derive(Debug)]
pub(crate) struct ForwardStep {
    cell: Arc<ForwardCell>,
}

impl ForwardStep {
    pub(crate) fn new(cell: Arc<ForwardCell>) -> Self {
        Self { cell }
    }
}

impl Step for ForwardStep {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        self.cell.get()?.coerce(value).map(Flow::Done)
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        self.cell.get()?.validate(value).map(|()| Check::Done)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        self.cell.get()?.serialize(value).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Primitives and constraints
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct PrimitiveStep {
    kind: PrimitiveKind,
    lenient: bool,
}

impl PrimitiveStep {
    pub(crate) fn new(kind: PrimitiveKind, lenient: bool) -> Self {
        Self { kind, lenient }
    }
}

impl Step for PrimitiveStep {
    fn name(&self) -> &'static str {
        "primitive"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let value = match self.kind {
            PrimitiveKind::Any => value,
            PrimitiveKind::Bool => coerce_bool(value)?,
            PrimitiveKind::Int => coerce_int(value, self.lenient)?,
            PrimitiveKind::Float => coerce_float(value, self.lenient)?,
            PrimitiveKind::Str => coerce_str(value)?,
            PrimitiveKind::Bytes => coerce_bytes(value)?,
        };
        Ok(Flow::Next(value))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        let matches = matches!(
            (self.kind, value),
            (PrimitiveKind::Any, _)
                | (PrimitiveKind::Bool, Value::Bool(_))
                | (PrimitiveKind::Int, Value::Int(_))
                | (PrimitiveKind::Float, Value::Float(_))
                | (PrimitiveKind::Str, Value::Str(_))
                | (PrimitiveKind::Bytes, Value::Bytes(_))
        );
        if matches {
            Ok(Check::Next)
        } else {
            Err(invalid(self.kind.canonical(), value))
        }
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        match (self.kind, value) {
            (PrimitiveKind::Any, v) => Ok(Some(to_primitive(v))),
            (PrimitiveKind::Bytes, Value::Bytes(b)) => Ok(Some(Value::Str(BASE64.encode(b)))),
            (PrimitiveKind::Bool, Value::Bool(_))
            | (PrimitiveKind::Int, Value::Int(_))
            | (PrimitiveKind::Float, Value::Float(_))
            | (PrimitiveKind::Str, Value::Str(_)) => Ok(Some(value.clone())),
            _ => Err(invalid(self.kind.canonical(), value)),
        }
    }
}

fn float_to_int(f: f64) -> Result<Value> {
    // 2^63 is exactly representable; anything at or above it overflows
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT {
        Ok(Value::Int(f as i64))
    } else {
        Err(Error::coercion(format!("{} is not an exact integer", f)))
    }
}

fn coerce_int(value: Value, lenient: bool) -> Result<Value> {
    match value {
        Value::Int(_) => Ok(value),
        Value::Float(f) if lenient => float_to_int(f),
        Value::Bool(b) if lenient => Ok(Value::Int(i64::from(b))),
        Value::Str(s) if lenient => {
            let text = s.trim();
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            match text.parse::<f64>() {
                Ok(f) => float_to_int(f).map_err(|_| {
                    Error::coercion(format!("{:?} is not an exact integer", s))
                }),
                Err(_) => Err(Error::coercion(format!("cannot parse {:?} as int", s))),
            }
        }
        other => Err(mismatch("int", &other)),
    }
}

fn coerce_float(value: Value, lenient: bool) -> Result<Value> {
    // Largest magnitude below which every integer is exact in f64
    const EXACT: u64 = 1 << 53;
    match value {
        Value::Float(_) => Ok(value),
        Value::Int(i) if lenient => {
            if i.unsigned_abs() <= EXACT {
                Ok(Value::Float(i as f64))
            } else {
                Err(Error::coercion(format!("{} cannot be represented exactly as float", i)))
            }
        }
        Value::Bool(b) if lenient => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::Str(s) if lenient => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::coercion(format!("cannot parse {:?} as float", s))),
        other => Err(mismatch("float", &other)),
    }
}

fn coerce_bool(value: Value) -> Result<Value> {
    match value {
        Value::Bool(_) => Ok(value),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(Error::coercion(format!("cannot parse {:?} as bool", s))),
        },
        other => Err(mismatch("bool", &other)),
    }
}

fn coerce_str(value: Value) -> Result<Value> {
    match value {
        Value::Str(_) => Ok(value),
        Value::Int(i) => Ok(Value::Str(i.to_string())),
        Value::Float(f) => Ok(Value::Str(f.to_string())),
        Value::Bool(b) => Ok(Value::Str(b.to_string())),
        Value::Bytes(b) => String::from_utf8(b)
            .map(Value::Str)
            .map_err(|_| Error::coercion("bytes are not valid UTF-8")),
        other => Err(mismatch("str", &other)),
    }
}

fn coerce_bytes(value: Value) -> Result<Value> {
    match value {
        Value::Bytes(_) => Ok(value),
        // Non-base64 text falls back to its UTF-8 encoding
        Value::Str(s) => Ok(Value::Bytes(match BASE64.decode(&s) {
            Ok(decoded) => decoded,
            Err(_) => s.into_bytes(),
        })),
        Value::Seq(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Int(b) => u8::try_from(*b)
                    .map_err(|_| Error::coercion(format!("{} is not a byte", b)).at_index(i)),
                other => Err(mismatch("byte", other).at_index(i)),
            })
            .collect::<Result<Vec<u8>>>()
            .map(Value::Bytes),
        other => Err(mismatch("bytes", &other)),
    }
}

/// Declared constraints, checked after the structural step.
#[derive(Debug)]
pub(crate) struct ConstraintStep {
    constraints: Constraints,
    pattern: Option<Regex>,
}

impl ConstraintStep {
    pub(crate) fn new(shape: &str, constraints: &Constraints) -> Result<Self> {
        let pattern = constraints
            .pattern
            .as_deref()
            .map(|p| {
                // Anchored at the start only
                Regex::new(&format!("^(?:{})", p))
                    .map_err(|e| Error::invalid_shape(shape, format!("invalid pattern: {}", e)))
            })
            .transpose()?;
        Ok(Self {
            constraints: constraints.clone(),
            pattern,
        })
    }

    fn prepare(&self, value: Value) -> Value {
        let mut s = match value {
            Value::Str(s) => s,
            other => return other,
        };
        // Curtail first, then strip what remains
        if let Some(n) = self.constraints.curtail_length {
            if let Some((cut, _)) = s.char_indices().nth(n) {
                s.truncate(cut);
            }
        }
        if self.constraints.strip_whitespace {
            s = s.trim().to_string();
        }
        Value::Str(s)
    }

    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match value {
            Value::Str(s) => self.check_text(s),
            Value::Int(i) => self.check_number(*i as f64),
            Value::Float(f) => self.check_number(*f),
            Value::Seq(items) => self.check_items(items.len()),
            Value::Map(entries) => self.check_items(entries.len()),
            _ => Ok(()),
        }
    }

    fn check_text(&self, s: &str) -> std::result::Result<(), String> {
        let c = &self.constraints;
        let len = s.chars().count();
        if let Some(min) = c.min_length.filter(|min| len < *min) {
            return Err(format!("length {} is shorter than min_length {}", len, min));
        }
        if let Some(max) = c.max_length.filter(|max| len > *max) {
            return Err(format!("length {} is longer than max_length {}", len, max));
        }
        if let (Some(re), Some(pattern)) = (&self.pattern, &c.pattern) {
            if !re.is_match(s) {
                return Err(format!("{:?} does not match pattern {:?}", s, pattern));
            }
        }
        Ok(())
    }

    fn check_number(&self, x: f64) -> std::result::Result<(), String> {
        let c = &self.constraints;
        if let Some(min) = c.minimum.filter(|min| x < *min) {
            return Err(format!("{} is less than minimum {}", x, min));
        }
        if let Some(max) = c.maximum.filter(|max| x > *max) {
            return Err(format!("{} is greater than maximum {}", x, max));
        }
        if let Some(min) = c.exclusive_minimum.filter(|min| x <= *min) {
            return Err(format!("{} is not greater than {}", x, min));
        }
        if let Some(max) = c.exclusive_maximum.filter(|max| x >= *max) {
            return Err(format!("{} is not less than {}", x, max));
        }
        if let Some(m) = c.multiple_of {
            let q = x / m;
            if !q.is_finite() || (q - q.round()).abs() > 1e-9 {
                return Err(format!("{} is not a multiple of {}", x, m));
            }
        }
        Ok(())
    }

    fn check_items(&self, len: usize) -> std::result::Result<(), String> {
        let c = &self.constraints;
        if let Some(min) = c.min_items.filter(|min| len < *min) {
            return Err(format!("{} item(s), expected at least {}", len, min));
        }
        if let Some(max) = c.max_items.filter(|max| len > *max) {
            return Err(format!("{} item(s), expected at most {}", len, max));
        }
        Ok(())
    }
}

impl Step for ConstraintStep {
    fn name(&self) -> &'static str {
        "constraints"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let value = self.prepare(value);
        self.check(&value).map_err(Error::coercion)?;
        Ok(Flow::Next(value))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        self.check(value).map_err(Error::validation)?;
        Ok(Check::Next)
    }
}

// ---------------------------------------------------------------------------
// Unions
// ---------------------------------------------------------------------------

/// Members tried in declaration order; the first success wins.
#[derive(Debug)]
pub(crate) struct UnionStep {
    shape: String,
    members: Vec<Arc<Protocol>>,
}

impl UnionStep {
    pub(crate) fn new(shape: impl Into<String>, members: Vec<Arc<Protocol>>) -> Self {
        Self {
            shape: shape.into(),
            members,
        }
    }

    fn matching(&self, value: &Value) -> Result<&Arc<Protocol>> {
        self.members
            .iter()
            .find(|member| member.validate(value).is_ok())
            .ok_or_else(|| {
                Error::validation(format!(
                    "{} matches no member of {}",
                    value.type_name(),
                    self.shape
                ))
            })
    }
}

impl Step for UnionStep {
    fn name(&self) -> &'static str {
        "union"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let mut failures = Vec::with_capacity(self.members.len());
        for member in &self.members {
            match member.coerce(value.clone()) {
                Ok(coerced) => return Ok(Flow::Done(coerced)),
                Err(e) => failures.push(e),
            }
        }
        Err(Error::no_candidate(
            format!("no member of {} accepts {}", self.shape, value.type_name()),
            failures,
        ))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        self.matching(value).map(|_| Check::Done)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        self.matching(value)?.serialize(value).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct SequenceStep {
    element: Arc<Protocol>,
    unique: bool,
}

impl SequenceStep {
    pub(crate) fn new(element: Arc<Protocol>, unique: bool) -> Self {
        Self { element, unique }
    }

    fn kind(&self) -> &'static str {
        if self.unique {
            "set"
        } else {
            "sequence"
        }
    }
}

impl Step for SequenceStep {
    fn name(&self) -> &'static str {
        self.kind()
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let items = match value {
            Value::Seq(items) => items,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let coerced = self.element.coerce(item).map_err(|e| e.at_index(i))?;
            if self.unique && out.contains(&coerced) {
                continue;
            }
            out.push(coerced);
        }
        Ok(Flow::Next(Value::Seq(out)))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        let Value::Seq(items) = value else {
            return Err(invalid(self.kind(), value));
        };
        for (i, item) in items.iter().enumerate() {
            self.element.validate(item).map_err(|e| e.at_index(i))?;
            if self.unique && items[..i].contains(item) {
                return Err(Error::validation("duplicate item in set").at_index(i));
            }
        }
        Ok(Check::Next)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Seq(items) = value else {
            return Err(invalid(self.kind(), value));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.element.serialize(item).map_err(|e| e.at_index(i)))
            .collect::<Result<Vec<_>>>()
            .map(|items| Some(Value::Seq(items)))
    }
}

#[derive(Debug)]
pub(crate) struct TupleStep {
    items: Vec<Arc<Protocol>>,
}

impl TupleStep {
    pub(crate) fn new(items: Vec<Arc<Protocol>>) -> Self {
        Self { items }
    }

    fn arity_error(&self, got: usize) -> String {
        format!("expected {} item(s), got {}", self.items.len(), got)
    }
}

impl Step for TupleStep {
    fn name(&self) -> &'static str {
        "tuple"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let values = match value {
            Value::Seq(values) => values,
            other => return Err(mismatch("tuple", &other)),
        };
        if values.len() != self.items.len() {
            return Err(Error::coercion(self.arity_error(values.len())));
        }
        self.items
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (item, v))| item.coerce(v).map_err(|e| e.at_index(i)))
            .collect::<Result<Vec<_>>>()
            .map(|values| Flow::Next(Value::Seq(values)))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        let Value::Seq(values) = value else {
            return Err(invalid("tuple", value));
        };
        if values.len() != self.items.len() {
            return Err(Error::validation(self.arity_error(values.len())));
        }
        for (i, (item, v)) in self.items.iter().zip(values).enumerate() {
            item.validate(v).map_err(|e| e.at_index(i))?;
        }
        Ok(Check::Next)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Seq(values) = value else {
            return Err(invalid("tuple", value));
        };
        if values.len() != self.items.len() {
            return Err(Error::validation(self.arity_error(values.len())));
        }
        self.items
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (item, v))| item.serialize(v).map_err(|e| e.at_index(i)))
            .collect::<Result<Vec<_>>>()
            .map(|values| Some(Value::Seq(values)))
    }
}

#[derive(Debug)]
pub(crate) struct MappingStep {
    key: Arc<Protocol>,
    value: Arc<Protocol>,
}

impl MappingStep {
    pub(crate) fn new(key: Arc<Protocol>, value: Arc<Protocol>) -> Self {
        Self { key, value }
    }
}

impl Step for MappingStep {
    fn name(&self) -> &'static str {
        "mapping"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let entries = match value {
            Value::Map(entries) => entries,
            Value::Record(r) => r
                .fields
                .into_iter()
                .map(|(k, v)| (Value::Str(k), v))
                .collect(),
            other => return Err(mismatch("mapping", &other)),
        };
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let label = k.key_text();
            let key = self.key.coerce(k).map_err(|e| e.at_key(label.clone()))?;
            let value = self.value.coerce(v).map_err(|e| e.at_key(label))?;
            // Keys that coerce to the same value: the last one wins
            match out.iter_mut().find(|(existing, _)| existing == &key) {
                Some(slot) => slot.1 = value,
                None => out.push((key, value)),
            }
        }
        Ok(Flow::Next(Value::Map(out)))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        let Value::Map(entries) = value else {
            return Err(invalid("mapping", value));
        };
        for (k, v) in entries {
            self.key.validate(k).map_err(|e| e.at_key(k.key_text()))?;
            self.value.validate(v).map_err(|e| e.at_key(k.key_text()))?;
        }
        Ok(Check::Next)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Map(entries) = value else {
            return Err(invalid("mapping", value));
        };
        entries
            .iter()
            .map(|(k, v)| {
                let key = self.key.serialize(k).map_err(|e| e.at_key(k.key_text()))?;
                let value = self.value.serialize(v).map_err(|e| e.at_key(k.key_text()))?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>>>()
            .map(|entries| Some(Value::Map(entries)))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One compiled record field.
#[derive(Debug)]
pub(crate) struct FieldSlot {
    field: FieldDescriptor,
    /// Output key; input accepts it or the declared name.
    wire: String,
    protocol: Arc<Protocol>,
    // Coerced on first use; the field protocol may still be a forward one
    default: OnceLock<Value>,
}

impl FieldSlot {
    pub(crate) fn new(field: FieldDescriptor, wire: String, protocol: Arc<Protocol>) -> Self {
        Self {
            field,
            wire,
            protocol,
            default: OnceLock::new(),
        }
    }

    fn missing(&self) -> Result<Value> {
        if let Some(raw) = &self.field.default {
            if let Some(value) = self.default.get() {
                return Ok(value.clone());
            }
            let value = self
                .protocol
                .coerce(raw.clone())
                .map_err(|e| e.at_field(&self.field.name))?;
            return Ok(self.default.get_or_init(|| value).clone());
        }
        if self.field.required {
            Err(Error::missing_field(self.field.name.clone()))
        } else {
            Ok(Value::Null)
        }
    }
}

#[derive(Debug)]
pub(crate) struct RecordStep {
    shape: String,
    fields: Vec<FieldSlot>,
    forbid_unknown: bool,
    /// Field values serialize leaves out.
    omit: Vec<Value>,
}

impl RecordStep {
    pub(crate) fn new(
        shape: impl Into<String>,
        fields: Vec<FieldSlot>,
        forbid_unknown: bool,
        omit: Vec<Value>,
    ) -> Self {
        Self {
            shape: shape.into(),
            fields,
            forbid_unknown,
            omit,
        }
    }

    fn declares(&self, name: &str) -> bool {
        self.fields.iter().any(|slot| slot.field.name == name)
    }
}

fn take_entry(entries: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    let pos = entries.iter().position(|(k, _)| k == key)?;
    Some(entries.remove(pos).1)
}

impl Step for RecordStep {
    fn name(&self) -> &'static str {
        "record"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        let mut entries: Vec<(String, Value)> = match value {
            Value::Map(entries) => entries.into_iter().map(|(k, v)| (k.key_text(), v)).collect(),
            Value::Record(r) => r.fields,
            other => {
                return Err(Error::coercion(format!(
                    "expected mapping for {}, got {}",
                    self.shape,
                    other.type_name()
                )))
            }
        };

        let mut fields = Vec::with_capacity(self.fields.len());
        for slot in &self.fields {
            let name = &slot.field.name;
            let raw = take_entry(&mut entries, &slot.wire).or_else(|| {
                if slot.wire == *name {
                    None
                } else {
                    take_entry(&mut entries, name)
                }
            });
            let value = match raw {
                Some(raw) => slot.protocol.coerce(raw).map_err(|e| e.at_field(name))?,
                None => slot.missing()?,
            };
            fields.push((name.clone(), value));
        }

        if self.forbid_unknown {
            if let Some((key, _)) = entries.first() {
                return Err(Error::coercion(format!(
                    "unknown field `{}` for {}",
                    key, self.shape
                ))
                .at_field(key));
            }
        }

        Ok(Flow::Next(Value::Record(Record {
            name: self.shape.clone(),
            fields,
        })))
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        let Value::Record(record) = value else {
            return Err(invalid(&self.shape, value));
        };
        if record.name != self.shape {
            return Err(Error::validation(format!(
                "expected {}, got {}",
                self.shape, record.name
            )));
        }
        for slot in &self.fields {
            let name = &slot.field.name;
            match record.get(name) {
                Some(v) => slot.protocol.validate(v).map_err(|e| e.at_field(name))?,
                None if slot.field.required => return Err(Error::missing_field(name.clone())),
                None => {}
            }
        }
        if self.forbid_unknown {
            if let Some((key, _)) = record.fields.iter().find(|(k, _)| !self.declares(k)) {
                return Err(Error::validation(format!(
                    "unknown field `{}` for {}",
                    key, self.shape
                ))
                .at_field(key));
            }
        }
        Ok(Check::Next)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        let Value::Record(record) = value else {
            return Err(invalid(&self.shape, value));
        };
        let mut out = Vec::with_capacity(self.fields.len());
        for slot in &self.fields {
            if slot.field.write_only {
                continue;
            }
            let Some(v) = record.get(&slot.field.name) else {
                continue;
            };
            if self.omit.contains(v) {
                continue;
            }
            let serialized = slot
                .protocol
                .serialize(v)
                .map_err(|e| e.at_field(&slot.field.name))?;
            out.push((Value::Str(slot.wire.clone()), serialized));
        }
        Ok(Some(Value::Map(out)))
    }
}

// ---------------------------------------------------------------------------
// Enumerations, literals, leaves
// ---------------------------------------------------------------------------

/// Accepts a member by value or by name; produces `Value::Enum(name)`.
#[derive(Debug)]
pub(crate) struct EnumStep {
    shape: String,
    variants: Vec<EnumVariant>,
}

impl EnumStep {
    pub(crate) fn new(shape: impl Into<String>, variants: Vec<EnumVariant>) -> Self {
        Self {
            shape: shape.into(),
            variants,
        }
    }

    fn by_name(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    fn member(&self, value: &Value) -> Option<&EnumVariant> {
        match value {
            Value::Enum(name) => self.by_name(name),
            other => self
                .variants
                .iter()
                .find(|v| &v.value == other)
                .or_else(|| other.as_str().and_then(|s| self.by_name(s))),
        }
    }
}

impl Step for EnumStep {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        match self.member(&value) {
            Some(variant) => Ok(Flow::Done(Value::Enum(variant.name.clone()))),
            None => Err(Error::coercion(format!(
                "{} is not a member of {}",
                value, self.shape
            ))),
        }
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        match value {
            Value::Enum(name) if self.by_name(name).is_some() => Ok(Check::Done),
            other => Err(Error::validation(format!(
                "{} is not a member of {}",
                other, self.shape
            ))),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        match value {
            Value::Enum(name) => self
                .by_name(name)
                .map(|v| Some(to_primitive(&v.value)))
                .ok_or_else(|| {
                    Error::validation(format!("{} is not a member of {}", name, self.shape))
                }),
            other => Err(invalid(&self.shape, other)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct LiteralStep {
    values: Vec<Value>,
}

impl LiteralStep {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn reject(&self, value: &Value) -> String {
        let allowed: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        format!("{} is not one of [{}]", value, allowed.join(", "))
    }
}

impl Step for LiteralStep {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        if self.values.contains(&value) {
            Ok(Flow::Done(value))
        } else {
            Err(Error::coercion(self.reject(&value)))
        }
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        if self.values.contains(value) {
            Ok(Check::Done)
        } else {
            Err(Error::validation(self.reject(value)))
        }
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        if self.values.contains(value) {
            Ok(Some(to_primitive(value)))
        } else {
            Err(Error::validation(self.reject(value)))
        }
    }
}

/// Runs a registered [`LeafCodec`].
pub(crate) struct LeafStep {
    shape: String,
    codec: Arc<dyn LeafCodec>,
}

impl LeafStep {
    pub(crate) fn new(shape: impl Into<String>, codec: Arc<dyn LeafCodec>) -> Self {
        Self {
            shape: shape.into(),
            codec,
        }
    }
}

impl fmt::Debug for LeafStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafStep").field("shape", &self.shape).finish()
    }
}

impl Step for LeafStep {
    fn name(&self) -> &'static str {
        "leaf"
    }

    fn coerce(&self, value: Value) -> Result<Flow> {
        self.codec
            .coerce(value)
            .map(Flow::Done)
            .map_err(Error::coercion)
    }

    fn validate(&self, value: &Value) -> Result<Check> {
        self.codec
            .validate(value)
            .map(|()| Check::Done)
            .map_err(Error::validation)
    }

    fn serialize(&self, value: &Value) -> Result<Option<Value>> {
        self.codec
            .serialize(value)
            .map(Some)
            .map_err(Error::validation)
    }
}
