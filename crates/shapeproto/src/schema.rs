// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON schema emission.
//!
//! The root shape is rendered inline. Named shapes (records and enums) nested
//! below it, and every shape reached through a recursive reference, are
//! rendered once under `definitions` and referenced with
//! `{"$ref": "#/definitions/<name>"}`, which keeps the document finite for
//! recursive graphs.

use crate::config::KeyCase;
use crate::descriptor::{Constraints, PrimitiveKind, ShapeKind, TypeDescriptor};
use crate::resolver::ShapeArena;
use crate::steps::to_primitive;
use crate::value::Value;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// What the emitter needs besides the descriptor itself.
#[derive(Debug, Clone)]
pub(crate) struct SchemaContext {
    arena: Arc<ShapeArena>,
    forbid_unknown: bool,
    case: Option<KeyCase>,
}

impl SchemaContext {
    pub(crate) fn new(arena: Arc<ShapeArena>, forbid_unknown: bool) -> Self {
        Self {
            arena,
            forbid_unknown,
            case: None,
        }
    }

    pub(crate) fn with_case(mut self, case: Option<KeyCase>) -> Self {
        self.case = case;
        self
    }
}

/// Renders descriptor graphs as JSON schema documents.
pub(crate) struct SchemaEmitter<'a> {
    context: &'a SchemaContext,
    definitions: BTreeMap<String, Json>,
    emitting: HashSet<String>,
    referenced: HashSet<String>,
}

fn reference(name: &str) -> Json {
    json!({ "$ref": format!("#/definitions/{}", name) })
}

impl<'a> SchemaEmitter<'a> {
    pub(crate) fn new(context: &'a SchemaContext) -> Self {
        Self {
            context,
            definitions: BTreeMap::new(),
            emitting: HashSet::new(),
            referenced: HashSet::new(),
        }
    }

    /// Schema document with `desc` inlined at the root.
    pub(crate) fn document(mut self, desc: &TypeDescriptor) -> Json {
        let root = self.root(desc);
        self.emitting.insert(root.name.clone());
        let mut doc = self.body(&root);
        self.emitting.remove(&root.name);
        if self.referenced.contains(&root.name) {
            self.definitions.insert(root.name.clone(), doc.clone());
        }
        if !self.definitions.is_empty() {
            if let Json::Object(map) = &mut doc {
                map.insert("definitions".into(), self.take_definitions());
            } else {
                doc = json!({ "allOf": [doc], "definitions": self.take_definitions() });
            }
        }
        doc
    }

    /// Document holding only `definitions` for the given named shapes.
    pub(crate) fn definitions_document<'d>(
        mut self,
        shapes: impl IntoIterator<Item = &'d TypeDescriptor>,
    ) -> Json {
        for desc in shapes {
            self.define(&desc.name, desc);
        }
        json!({ "definitions": self.take_definitions() })
    }

    fn take_definitions(&mut self) -> Json {
        Json::Object(std::mem::take(&mut self.definitions).into_iter().collect())
    }

    /// Replace a recursive root with its arena target.
    fn root(&self, desc: &TypeDescriptor) -> TypeDescriptor {
        match &desc.kind {
            ShapeKind::Recursive(r) => self
                .context
                .arena
                .get(&r.id)
                .map_or_else(|| desc.clone(), |target| (*target).clone()),
            _ => desc.clone(),
        }
    }

    /// Schema of a nested shape: a reference for named shapes, inline otherwise.
    fn emit(&mut self, desc: &TypeDescriptor) -> Json {
        match &desc.kind {
            ShapeKind::Recursive(r) => {
                if let Some(target) = self.context.arena.get(&r.id) {
                    self.define(&r.name, &target);
                }
                self.referenced.insert(r.name.clone());
                reference(&r.name)
            }
            _ if desc.is_named() => {
                self.define(&desc.name, desc);
                self.referenced.insert(desc.name.clone());
                reference(&desc.name)
            }
            _ => self.body(desc),
        }
    }

    fn define(&mut self, name: &str, desc: &TypeDescriptor) {
        if self.definitions.contains_key(name) || self.emitting.contains(name) {
            return;
        }
        self.emitting.insert(name.to_string());
        let body = self.body(desc);
        self.emitting.remove(name);
        self.definitions.insert(name.to_string(), body);
    }

    fn body(&mut self, desc: &TypeDescriptor) -> Json {
        let mut schema = match &desc.kind {
            ShapeKind::Primitive(kind) => primitive(*kind),
            ShapeKind::Optional(inner) => {
                json!({ "oneOf": [self.emit(inner), { "type": "null" }] })
            }
            ShapeKind::Union(members) => {
                let members: Vec<Json> = members.iter().map(|m| self.emit(m)).collect();
                json!({ "oneOf": members })
            }
            ShapeKind::Sequence(seq) => {
                let mut schema = json!({ "type": "array", "items": self.emit(&seq.element) });
                if seq.unique {
                    schema["uniqueItems"] = Json::Bool(true);
                }
                schema
            }
            ShapeKind::Tuple(items) => {
                let items: Vec<Json> = items.iter().map(|i| self.emit(i)).collect();
                let n = items.len();
                json!({
                    "type": "array",
                    "items": items,
                    "minItems": n,
                    "maxItems": n,
                    "additionalItems": false,
                })
            }
            ShapeKind::Mapping(m) => {
                let mut schema = json!({
                    "type": "object",
                    "additionalProperties": self.emit(&m.value),
                });
                let plain_keys = matches!(m.key.kind, ShapeKind::Primitive(PrimitiveKind::Str))
                    && m.key.constraints.is_none();
                if !plain_keys {
                    schema["propertyNames"] = self.emit(&m.key);
                }
                schema
            }
            ShapeKind::Record(record) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in &record.fields {
                    let mut schema = self.emit(&field.type_desc);
                    let mut extras = Map::new();
                    if let Some(default) = &field.default {
                        extras.insert("default".into(), to_primitive(default).to_json());
                    }
                    if field.read_only {
                        extras.insert("readOnly".into(), Json::Bool(true));
                    }
                    if field.write_only {
                        extras.insert("writeOnly".into(), Json::Bool(true));
                    }
                    if let Some(doc) = &field.doc {
                        extras.insert("description".into(), Json::String(doc.clone()));
                    }
                    if !extras.is_empty() {
                        schema = merge(schema, extras);
                    }
                    let key = field.key_in(self.context.case);
                    if field.required {
                        required.push(Json::String(key.clone()));
                    }
                    properties.insert(key, schema);
                }
                let mut schema = json!({
                    "title": desc.name,
                    "type": "object",
                    "properties": properties,
                });
                if !required.is_empty() {
                    schema["required"] = Json::Array(required);
                }
                if self.context.forbid_unknown {
                    schema["additionalProperties"] = Json::Bool(false);
                }
                schema
            }
            ShapeKind::Enum(e) => {
                let values: Vec<Json> = e.variants.iter().map(|v| v.value.to_json()).collect();
                let mut schema = json!({ "title": desc.name, "enum": values });
                if let Some(kind) = common_type(e.variants.iter().map(|v| &v.value)) {
                    schema["type"] = Json::String(kind.into());
                }
                schema
            }
            ShapeKind::Literal(values) => match values.as_slice() {
                [single] => json!({ "const": single.to_json() }),
                _ => json!({ "enum": values.iter().map(Value::to_json).collect::<Vec<_>>() }),
            },
            ShapeKind::Recursive(_) => self.emit(desc),
            ShapeKind::Leaf(leaf) => leaf.schema.clone(),
        };

        if let Some(doc) = &desc.doc {
            if let Json::Object(map) = &mut schema {
                map.insert("description".into(), Json::String(doc.clone()));
            }
        }
        if let Some(constraints) = &desc.constraints {
            apply_constraints(&mut schema, constraints, &desc.kind);
        }
        schema
    }
}

fn primitive(kind: PrimitiveKind) -> Json {
    match kind {
        PrimitiveKind::Bool => json!({ "type": "boolean" }),
        PrimitiveKind::Int => json!({ "type": "integer" }),
        PrimitiveKind::Float => json!({ "type": "number" }),
        PrimitiveKind::Str => json!({ "type": "string" }),
        PrimitiveKind::Bytes => json!({ "type": "string", "contentEncoding": "base64" }),
        PrimitiveKind::Any => json!({}),
    }
}

/// Add keywords next to a schema; `$ref` siblings are wrapped in `allOf`.
fn merge(schema: Json, extras: Map<String, Json>) -> Json {
    match schema {
        Json::Object(mut map) if !map.contains_key("$ref") => {
            map.extend(extras);
            Json::Object(map)
        }
        other => {
            let mut map = extras;
            map.insert("allOf".into(), json!([other]));
            Json::Object(map)
        }
    }
}

fn common_type<'v>(values: impl Iterator<Item = &'v Value>) -> Option<&'static str> {
    let mut kind = None;
    for value in values {
        let this = match value {
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Float(_) => "number",
            _ => return None,
        };
        match kind {
            None => kind = Some(this),
            Some(k) if k == this => {}
            Some(_) => return None,
        }
    }
    kind
}

/// 2^63, the first float past `i64::MAX`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn number(value: f64, integral: bool) -> Json {
    // Integral floats inside the i64 range convert exactly
    if integral && value.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&value) {
        Json::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Json::Null, Json::Number)
    }
}

fn apply_constraints(schema: &mut Json, c: &Constraints, kind: &ShapeKind) {
    let Json::Object(map) = schema else {
        return;
    };
    let integral = matches!(kind, ShapeKind::Primitive(PrimitiveKind::Int));
    let mut put = |key: &str, value: Json| {
        map.insert(key.to_string(), value);
    };
    if let Some(n) = c.min_length {
        put("minLength", Json::from(n));
    }
    if let Some(n) = c.max_length.or(c.curtail_length) {
        put("maxLength", Json::from(n));
    }
    if let Some(p) = &c.pattern {
        put("pattern", Json::String(format!("^(?:{})", p)));
    }
    if let Some(v) = c.minimum {
        put("minimum", number(v, integral));
    }
    if let Some(v) = c.maximum {
        put("maximum", number(v, integral));
    }
    if let Some(v) = c.exclusive_minimum {
        put("exclusiveMinimum", number(v, integral));
    }
    if let Some(v) = c.exclusive_maximum {
        put("exclusiveMaximum", number(v, integral));
    }
    if let Some(v) = c.multiple_of {
        put("multipleOf", number(v, integral));
    }
    if let Some(n) = c.min_items {
        put("minItems", Json::from(n));
    }
    if let Some(n) = c.max_items {
        put("maxItems", Json::from(n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::reference::{RecordBuilder, TypeRef};

    fn emit(resolver: &Resolver, type_ref: &TypeRef, forbid: bool) -> Json {
        let desc = resolver.resolve(type_ref).unwrap();
        let context = SchemaContext::new(Arc::clone(resolver.arena()), forbid);
        SchemaEmitter::new(&context).document(&desc)
    }

    #[test]
    fn test_primitives() {
        let r = Resolver::new(Arc::new(ShapeArena::new()));
        assert_eq!(emit(&r, &TypeRef::int(), false), json!({ "type": "integer" }));
        assert_eq!(emit(&r, &TypeRef::any(), false), json!({}));
        assert_eq!(
            emit(&r, &TypeRef::optional(TypeRef::string()), false),
            json!({ "oneOf": [{ "type": "string" }, { "type": "null" }] })
        );
    }

    #[test]
    fn test_constraint_keywords() {
        let r = Resolver::new(Arc::new(ShapeArena::new()));
        let schema = emit(
            &r,
            &TypeRef::int().with(Constraints::new().minimum(0.0).maximum(10.0)),
            false,
        );
        assert_eq!(schema, json!({ "type": "integer", "minimum": 0, "maximum": 10 }));

        let schema = emit(
            &r,
            &TypeRef::set(TypeRef::string()).with(Constraints::new().max_items(3)),
            false,
        );
        assert_eq!(schema["uniqueItems"], json!(true));
        assert_eq!(schema["maxItems"], json!(3));
    }

    #[test]
    fn test_nested_record_goes_to_definitions() {
        let r = Resolver::new(Arc::new(ShapeArena::new()));
        r.define(RecordBuilder::new("Inner").field("x", TypeRef::int()).build())
            .unwrap();
        r.define(
            RecordBuilder::new("Outer")
                .field("inner", TypeRef::named("Inner"))
                .field("note", TypeRef::optional(TypeRef::string()))
                .build(),
        )
        .unwrap();

        let schema = emit(&r, &TypeRef::named("Outer"), true);
        assert_eq!(schema["title"], json!("Outer"));
        assert_eq!(schema["required"], json!(["inner"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["inner"],
            json!({ "$ref": "#/definitions/Inner" })
        );
        assert_eq!(schema["definitions"]["Inner"]["properties"]["x"], json!({ "type": "integer" }));
    }

    #[test]
    fn test_ref_with_extras_uses_all_of() {
        let merged = merge(reference("A"), {
            let mut m = Map::new();
            m.insert("readOnly".into(), Json::Bool(true));
            m
        });
        assert_eq!(
            merged,
            json!({ "readOnly": true, "allOf": [{ "$ref": "#/definitions/A" }] })
        );
    }

    #[test]
    fn test_large_integer_bounds_stay_integral() {
        assert_eq!(number(1.0e16, true), Json::from(10_000_000_000_000_000_i64));
        assert_eq!(number(-4.0e18, true), Json::from(-4_000_000_000_000_000_000_i64));
        assert!(number(1.0e19, true).is_f64());
        assert!(number(2.0, false).is_f64());
        assert!(number(2.5, true).is_f64());
    }
}
