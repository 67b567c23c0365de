// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema documents emitted by compiled protocols.

#![allow(clippy::missing_panics_doc)]

use serde_json::json;
use shapeproto::{
    Constraints, Engine, EngineConfig, EnumBuilder, FieldDef, RecordBuilder, TypeRef,
};

fn count_refs(schema: &serde_json::Value) -> usize {
    match schema {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| usize::from(k == "$ref") + count_refs(v))
            .sum(),
        serde_json::Value::Array(items) => items.iter().map(count_refs).sum(),
        _ => 0,
    }
}

fn node_engine() -> Engine {
    let engine = Engine::default();
    engine
        .define(
            RecordBuilder::new("Node")
                .doc("A tree node.")
                .field("value", TypeRef::int())
                .field_default(
                    "children",
                    TypeRef::sequence(TypeRef::named("Node")),
                    Vec::<i64>::new(),
                )
                .build(),
        )
        .unwrap();
    engine
}

#[test]
fn test_recursive_record_schema_is_finite() {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = node_engine();
    let schema = engine.schema(&TypeRef::named("Node")).unwrap();

    assert_eq!(schema["title"], "Node");
    assert_eq!(schema["description"], "A tree node.");
    assert_eq!(schema["required"], json!(["value"]));
    assert_eq!(
        schema["properties"]["children"],
        json!({
            "type": "array",
            "items": {"$ref": "#/definitions/Node"},
            "default": []
        })
    );

    let definitions = schema["definitions"].as_object().unwrap();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions["Node"]["title"], "Node");
    assert!(definitions["Node"].get("definitions").is_none());
    // One self reference at the root, one inside the definition
    assert_eq!(count_refs(&schema), 2);
}

#[test]
fn test_schema_is_emitted_once() {
    let engine = node_engine();
    let protocol = engine.protocol_for("Node").unwrap();
    let first: *const serde_json::Value = protocol.schema();
    let second: *const serde_json::Value = protocol.schema();
    assert_eq!(first, second);
}

#[test]
fn test_mutually_recursive_schema() {
    let engine = Engine::default();
    engine
        .define_all([
            RecordBuilder::new("Person")
                .field("employer", TypeRef::optional(TypeRef::named("Company")))
                .build(),
            RecordBuilder::new("Company")
                .field("staff", TypeRef::sequence(TypeRef::named("Person")))
                .build(),
        ])
        .unwrap();

    let schema = engine.schema(&TypeRef::named("Person")).unwrap();
    assert_eq!(
        schema["properties"]["employer"],
        json!({"oneOf": [{"$ref": "#/definitions/Company"}, {"type": "null"}]})
    );
    let definitions = schema["definitions"].as_object().unwrap();
    assert!(definitions.contains_key("Company"));
    assert!(definitions.contains_key("Person"));
    assert_eq!(
        definitions["Company"]["properties"]["staff"]["items"],
        json!({"$ref": "#/definitions/Person"})
    );
}

#[test]
fn test_enum_and_literal_schema() {
    let engine = Engine::default();
    engine
        .define_all([
            EnumBuilder::new("Level")
                .variant_value("LOW", "low")
                .variant_value("HIGH", "high")
                .build(),
            RecordBuilder::new("Alarm")
                .field("level", TypeRef::named("Level"))
                .field("kind", TypeRef::literal(["smoke"]))
                .field("codes", TypeRef::literal([1, 2]))
                .build(),
        ])
        .unwrap();

    let level = engine.schema(&TypeRef::named("Level")).unwrap();
    assert_eq!(
        level,
        json!({"title": "Level", "enum": ["low", "high"], "type": "string"})
    );

    let alarm = engine.schema(&TypeRef::named("Alarm")).unwrap();
    assert_eq!(alarm["properties"]["level"], json!({"$ref": "#/definitions/Level"}));
    assert_eq!(alarm["properties"]["kind"], json!({"const": "smoke"}));
    assert_eq!(alarm["properties"]["codes"], json!({"enum": [1, 2]}));
    assert_eq!(alarm["definitions"]["Level"], level);
}

#[test]
fn test_containers_and_constraints() {
    let engine = Engine::default();

    let tuple = engine
        .schema(&TypeRef::tuple(vec![TypeRef::int(), TypeRef::bytes()]))
        .unwrap();
    assert_eq!(
        tuple,
        json!({
            "type": "array",
            "items": [{"type": "integer"}, {"type": "string", "contentEncoding": "base64"}],
            "minItems": 2,
            "maxItems": 2,
            "additionalItems": false
        })
    );

    let mapping = engine
        .schema(&TypeRef::mapping(TypeRef::int(), TypeRef::bool()))
        .unwrap();
    assert_eq!(mapping["additionalProperties"], json!({"type": "boolean"}));
    assert_eq!(mapping["propertyNames"], json!({"type": "integer"}));

    let name = engine
        .schema(&TypeRef::string().with(Constraints::new().min_length(1).pattern("[a-z]+")))
        .unwrap();
    assert_eq!(
        name,
        json!({"type": "string", "minLength": 1, "pattern": "^(?:[a-z]+)"})
    );

    let ratio = engine
        .schema(&TypeRef::float().with(Constraints::new().exclusive_minimum(0.0).maximum(1.5)))
        .unwrap();
    assert_eq!(ratio["type"], "number");
    assert_eq!(ratio["exclusiveMinimum"], json!(0.0));
    assert_eq!(ratio["maximum"], json!(1.5));
}

#[test]
fn test_field_annotations() {
    let engine = Engine::new(EngineConfig::default().forbid_unknown_fields()).unwrap();
    engine
        .define_all([
            RecordBuilder::new("Owner").field("id", TypeRef::int()).build(),
            RecordBuilder::new("Asset")
                .field_def(
                    FieldDef::new("owner", TypeRef::named("Owner"))
                        .read_only()
                        .doc("Current owner."),
                )
                .field_def(FieldDef::new("secret", TypeRef::string()).write_only().rename("key"))
                .build(),
        ])
        .unwrap();

    let schema = engine.schema(&TypeRef::named("Asset")).unwrap();
    assert_eq!(schema["additionalProperties"], json!(false));
    assert_eq!(
        schema["properties"]["owner"],
        json!({
            "allOf": [{"$ref": "#/definitions/Owner"}],
            "readOnly": true,
            "description": "Current owner."
        })
    );
    assert_eq!(
        schema["properties"]["key"],
        json!({"type": "string", "writeOnly": true})
    );
    assert_eq!(schema["required"], json!(["owner", "key"]));
    assert_eq!(
        schema["definitions"]["Owner"]["additionalProperties"],
        json!(false)
    );
}

#[test]
fn test_definitions_schema_covers_compiled_shapes() {
    let engine = node_engine();
    engine
        .define(
            EnumBuilder::new("Shade")
                .variant("LIGHT")
                .variant("DARK")
                .build(),
        )
        .unwrap();
    engine.protocol_for("Node").unwrap();
    engine.protocol_for("Shade").unwrap();
    engine.protocol(&TypeRef::sequence(TypeRef::float())).unwrap();

    let doc = engine.definitions_schema();
    let definitions = doc["definitions"].as_object().unwrap();
    let mut names: Vec<&str> = definitions.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(names, ["Node", "Shade"]);
    assert_eq!(definitions["Shade"]["type"], "integer");
}
