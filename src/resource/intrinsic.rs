//! CloudFormation intrinsic functions
//!
//! Helpers that build `Ref`, `Fn::GetAtt`, `Fn::Join` and friends as JSON,
//! and the scanner the graph uses to find which resources a property block
//! points at.

use super::graph::ResourceRef;
use serde_json::{json, Value};

/// Pseudo parameters are resolved by CloudFormation, never by the graph
const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

/// A reference from one resource's properties to another resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    Ref(String),
    GetAtt(String, String),
}

impl Reference {
    /// Logical id of the referenced resource
    pub fn target(&self) -> &str {
        match self {
            Reference::Ref(id) | Reference::GetAtt(id, _) => id,
        }
    }
}

/// `{"Ref": "<logical id>"}`
pub fn reference(target: &ResourceRef) -> Value {
    json!({ "Ref": target.logical_id })
}

/// `{"Fn::GetAtt": ["<logical id>", "<attribute>"]}`
pub fn get_att(target: &ResourceRef, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [target.logical_id, attribute] })
}

/// `{"Ref": "AWS::<name>"}`
pub fn pseudo(name: &str) -> Value {
    json!({ "Ref": format!("{}{}", PSEUDO_PARAMETER_PREFIX, name) })
}

/// `{"Fn::Join": ["<delimiter>", [parts...]]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// Availability zone `index` of the stack's region
pub fn select_az(index: usize) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

/// Collect every resource reference inside a property tree.
///
/// Pseudo parameters (`AWS::Region`, `AWS::AccountId`, ...) are skipped.
pub fn collect_references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    walk(value, &mut found);
    found.sort();
    found.dedup();
    found
}

fn walk(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    if !id.starts_with(PSEUDO_PARAMETER_PREFIX) {
                        found.push(Reference::Ref(id.clone()));
                    }
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                    if let [Value::String(id), Value::String(attr)] = args.as_slice() {
                        found.push(Reference::GetAtt(id.clone(), attr.clone()));
                        return;
                    }
                }
            }
            for v in map.values() {
                walk(v, found);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk(v, found);
            }
        }
        _ => {}
    }
}
