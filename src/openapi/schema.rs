// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Translation of OpenAPI component schemas into CRD structural schemas.
//!
//! Only keywords the API server accepts in `openAPIV3Schema` are carried over. References to
//! `#/components/schemas/*` are inlined; a reference cycle (or nesting deeper than
//! [`MAX_SCHEMA_DEPTH`]) degrades to an object that preserves unknown fields. The
//! `apiVersion`, `kind` and `metadata` properties are dropped at every level since the API
//! server owns them.
//!
//! Every emitted node carries a `type`. An untyped node gets one inferred from its other
//! keywords, or else accepts any object via `x-kubernetes-preserve-unknown-fields`. `not` is
//! dropped since structural schemas forbid types beneath it.

use crate::constants::{MAX_SCHEMA_DEPTH, SERVER_OWNED_PROPERTIES};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Keywords copied verbatim when present.
const SCALAR_KEYWORDS: &[&str] = &[
    "title",
    "description",
    "format",
    "pattern",
    "maxItems",
    "minItems",
    "maxLength",
    "minLength",
    "maximum",
    "minimum",
    "multipleOf",
    "uniqueItems",
    "maxProperties",
    "minProperties",
    "enum",
    "nullable",
    "example",
];

const COMPONENT_REF_PREFIX: &str = "#/components/schemas/";

/// Translates schemas of one OpenAPI document.
pub struct SchemaTranslator<'a> {
    components: Option<&'a Map<String, Value>>,
}

impl<'a> SchemaTranslator<'a> {
    #[must_use]
    pub fn new(document: &'a Value) -> Self {
        Self {
            components: document["components"]["schemas"].as_object(),
        }
    }

    /// Translate a top-level kind schema. The result is always an object schema.
    #[must_use]
    pub fn translate(&self, schema: &Value) -> Value {
        let mut visiting = HashSet::new();
        let mut root = self.convert(schema, 0, &mut visiting);
        if let Some(obj) = root.as_object_mut() {
            obj.entry("type").or_insert_with(|| json!("object"));
        }
        root
    }

    fn resolve(&self, reference: &str) -> Option<(&'a str, &'a Value)> {
        let name = reference.strip_prefix(COMPONENT_REF_PREFIX)?;
        self.components?
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
    }

    fn convert(&self, schema: &Value, depth: usize, visiting: &mut HashSet<String>) -> Value {
        let Some(source) = schema.as_object() else {
            return preserve_unknown();
        };
        if depth > MAX_SCHEMA_DEPTH {
            return preserve_unknown();
        }

        if let Some(reference) = source.get("$ref").and_then(Value::as_str) {
            let Some((name, target)) = self.resolve(reference) else {
                return preserve_unknown();
            };
            if !visiting.insert(name.to_string()) {
                return preserve_unknown();
            }
            let converted = self.convert(target, depth + 1, visiting);
            visiting.remove(name);
            return converted;
        }

        let mut out = Map::new();

        // A lone allOf entry is how generators wrap a nullable or described reference.
        if let Some([single]) = source.get("allOf").and_then(Value::as_array).map(Vec::as_slice) {
            if let Value::Object(inner) = self.convert(single, depth + 1, visiting) {
                out.extend(inner);
            }
        } else if let Some(parts) = source.get("allOf").and_then(Value::as_array) {
            for part in parts {
                if let Value::Object(inner) = self.convert(part, depth + 1, visiting) {
                    merge_object_schema(&mut out, inner);
                }
            }
        }

        match source.get("type") {
            Some(Value::String(ty)) => {
                out.insert("type".into(), json!(ty));
            }
            // OpenAPI 3.1 style: ["string", "null"]
            Some(Value::Array(types)) => {
                let mut concrete = types.iter().filter_map(Value::as_str).filter(|t| *t != "null");
                if let Some(ty) = concrete.next() {
                    out.insert("type".into(), json!(ty));
                }
                if types.iter().any(|t| t == "null") {
                    out.insert("nullable".into(), json!(true));
                }
            }
            _ => {}
        }

        for key in SCALAR_KEYWORDS {
            if let Some(value) = source.get(*key) {
                if !value.is_null() {
                    out.insert((*key).to_string(), value.clone());
                }
            }
        }

        for key in ["exclusiveMaximum", "exclusiveMinimum"] {
            if let Some(flag @ Value::Bool(_)) = source.get(key) {
                out.insert(key.into(), flag.clone());
            }
        }

        if let Some(docs) = source.get("externalDocs").and_then(Value::as_object) {
            let mut kept = Map::new();
            for key in ["description", "url"] {
                if let Some(v) = docs.get(key).filter(|v| v.is_string()) {
                    kept.insert(key.into(), v.clone());
                }
            }
            out.insert("externalDocs".into(), Value::Object(kept));
        }

        if let Some(items) = source.get("items") {
            out.insert("items".into(), self.convert(items, depth + 1, visiting));
        }

        if let Some(properties) = source.get("properties").and_then(Value::as_object) {
            let mut converted = out
                .remove("properties")
                .and_then(|p| match p {
                    Value::Object(m) => Some(m),
                    _ => None,
                })
                .unwrap_or_default();
            for (name, prop) in properties {
                if SERVER_OWNED_PROPERTIES.contains(&name.as_str()) {
                    continue;
                }
                converted.insert(name.clone(), self.convert(prop, depth + 1, visiting));
            }
            out.insert("properties".into(), Value::Object(converted));
        }

        if let Some(required) = source.get("required").and_then(Value::as_array) {
            let mut names: Vec<Value> = out
                .remove("required")
                .and_then(|r| r.as_array().cloned())
                .unwrap_or_default();
            for name in required.iter().filter_map(Value::as_str) {
                if !SERVER_OWNED_PROPERTIES.contains(&name) && !names.iter().any(|n| n == name) {
                    names.push(json!(name));
                }
            }
            if !names.is_empty() {
                out.insert("required".into(), Value::Array(names));
            }
        }

        match source.get("additionalProperties") {
            Some(Value::Bool(true)) if !out.contains_key("properties") => {
                out.insert("x-kubernetes-preserve-unknown-fields".into(), json!(true));
            }
            Some(extra @ Value::Object(_)) if !out.contains_key("properties") => {
                let converted = self.convert(extra, depth + 1, visiting);
                out.insert("additionalProperties".into(), converted);
            }
            _ => {}
        }

        // Alternatives are not structural; keep the data instead of guessing a shape.
        if source.contains_key("oneOf") || source.contains_key("anyOf") {
            if !out.contains_key("type") {
                out.insert("type".into(), json!("object"));
            }
            out.insert("x-kubernetes-preserve-unknown-fields".into(), json!(true));
        }

        if !out.contains_key("type") {
            match inferred_type(&out) {
                Some(ty) => {
                    out.insert("type".into(), json!(ty));
                }
                None => {
                    out.insert("type".into(), json!("object"));
                    out.insert("x-kubernetes-preserve-unknown-fields".into(), json!(true));
                }
            }
        }

        Value::Object(out)
    }
}

/// Type implied by the keywords already collected for an untyped node.
fn inferred_type(node: &Map<String, Value>) -> Option<&'static str> {
    if node.contains_key("properties") || node.contains_key("additionalProperties") {
        return Some("object");
    }
    if node.contains_key("items") {
        return Some("array");
    }
    match node.get("enum").and_then(Value::as_array)?.first()? {
        Value::String(_) => Some("string"),
        Value::Bool(_) => Some("boolean"),
        Value::Number(n) if n.is_f64() => Some("number"),
        Value::Number(_) => Some("integer"),
        _ => None,
    }
}

fn preserve_unknown() -> Value {
    json!({ "type": "object", "x-kubernetes-preserve-unknown-fields": true })
}

fn merge_object_schema(out: &mut Map<String, Value>, part: Map<String, Value>) {
    for (key, value) in part {
        match out.get_mut(&key) {
            None => {
                out.insert(key, value);
            }
            Some(Value::Object(existing)) if key == "properties" => {
                if let Value::Object(more) = value {
                    existing.extend(more);
                }
            }
            Some(Value::Array(existing)) if key == "required" => {
                if let Value::Array(more) = value {
                    for name in more {
                        if !existing.contains(&name) {
                            existing.push(name);
                        }
                    }
                }
            }
            Some(_) => {}
        }
    }
}

/// Serialize `value` with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            scalar => out.push_str(&scalar.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// SHA-256 (lowercase hex) of the canonical serialization of `schema`.
#[must_use]
pub fn content_hash(schema: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(schema).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod schema_tests;
