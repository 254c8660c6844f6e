use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::schema::{DocumentSchema, SchemaNode};

#[derive(Clone, Copy)]
enum Towards {
    Storage,
    Attributes,
}

impl DocumentSchema {
    /// Renames declared attributes of a document to their storage keys,
    /// recursing into embedded groups (and arrays of them). Undeclared fields
    /// are kept as they are.
    pub fn to_storage(&self, document: &Value) -> Value {
        map_value(document, self.attributes(), Towards::Storage)
    }

    /// Inverse of [`DocumentSchema::to_storage`].
    pub fn from_storage(&self, document: &Value) -> Value {
        map_value(document, self.attributes(), Towards::Attributes)
    }
}

fn map_value(value: &Value, level: &BTreeMap<String, SchemaNode>, towards: Towards) -> Value {
    match value {
        Value::Object(fields) => Value::Object(map_object(fields, level, towards)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| map_value(item, level, towards))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn map_object(
    fields: &Map<String, Value>,
    level: &BTreeMap<String, SchemaNode>,
    towards: Towards,
) -> Map<String, Value> {
    fields
        .iter()
        .map(|(field, value)| {
            let declared = match towards {
                Towards::Storage => level
                    .get(field)
                    .and_then(|node| node.storage_key().map(|key| (key, node))),
                Towards::Attributes => level
                    .iter()
                    .find(|(_, node)| node.storage_key() == Some(field.as_str()))
                    .map(|(name, node)| (name.as_str(), node)),
            };
            match declared {
                Some((renamed, SchemaNode::Embedded { children, .. })) => {
                    (renamed.to_string(), map_value(value, children, towards))
                }
                Some((renamed, SchemaNode::Scalar { .. })) => (renamed.to_string(), value.clone()),
                None => (field.clone(), value.clone()),
            }
        })
        .collect()
}
