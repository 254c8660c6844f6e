use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::index::IndexDescriptor;
use crate::resolve::{resolve_path, ResolveError};

/// One declared attribute (or embedded group) of a document.
///
/// Scalars keep whatever value was declared for them. Only string values are
/// storage keys; anything else is accepted here and rejected when a path
/// resolution runs into it.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaNode {
    Scalar {
        declared: Value,
    },
    Embedded {
        storage_key: String,
        children: BTreeMap<String, SchemaNode>,
    },
}

impl SchemaNode {
    pub fn scalar(declared: impl Into<Value>) -> Self {
        SchemaNode::Scalar {
            declared: declared.into(),
        }
    }

    /// The storage key of this node, or `None` for a scalar declared with a
    /// non-string value.
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            SchemaNode::Scalar { declared } => declared.as_str(),
            SchemaNode::Embedded { storage_key, .. } => Some(storage_key),
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match self {
            SchemaNode::Scalar { .. } => None,
            SchemaNode::Embedded { children, .. } => Some(children),
        }
    }

    fn from_declaration(declaration: &AttributeDeclaration) -> Self {
        match declaration {
            AttributeDeclaration::Embedded { key, attributes } => SchemaNode::Embedded {
                storage_key: key.clone(),
                children: nodes_from_declarations(attributes),
            },
            AttributeDeclaration::Value(declared) => SchemaNode::Scalar {
                declared: declared.clone(),
            },
        }
    }
}

fn nodes_from_declarations(
    declarations: &BTreeMap<String, AttributeDeclaration>,
) -> BTreeMap<String, SchemaNode> {
    declarations
        .iter()
        .map(|(name, declaration)| (name.clone(), SchemaNode::from_declaration(declaration)))
        .collect()
}

/// Attribute declaration as written in configuration: either an embedded group
/// `{ key, attributes }` or a plain value (normally the storage key string).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeDeclaration {
    Embedded {
        key: String,
        #[serde(default)]
        attributes: BTreeMap<String, AttributeDeclaration>,
    },
    Value(Value),
}

/// Everything a document class declares, in serializable form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentDefinition {
    pub name: String,
    #[serde(default)]
    pub database: String,
    pub collection: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDeclaration>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

/// The immutable schema of one document class: its attribute tree plus the
/// index descriptors declared against it.
///
/// Index descriptors are stored raw and only resolved against the tree when
/// the indexes are ensured.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSchema {
    name: String,
    database: String,
    collection: String,
    attributes: BTreeMap<String, SchemaNode>,
    indexes: Vec<IndexDescriptor>,
}

impl DocumentSchema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            database: String::new(),
            collection: String::new(),
            attributes: AttributesBuilder::default(),
            indexes: Vec::new(),
        }
    }

    pub fn from_definition(definition: &DocumentDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            database: definition.database.clone(),
            collection: definition.collection.clone(),
            attributes: nodes_from_declarations(&definition.attributes),
            indexes: definition.indexes.clone(),
        }
    }

    /// Identity of the document class.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn attributes(&self) -> &BTreeMap<String, SchemaNode> {
        &self.attributes
    }

    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    pub fn attribute(&self, name: &str) -> Option<&SchemaNode> {
        self.attributes.get(name)
    }

    /// Storage key of a top-level attribute.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(SchemaNode::storage_key)
    }

    /// Resolves a dotted attribute path to the dotted storage-key path.
    pub fn resolve(&self, path: &str) -> Result<String, ResolveError> {
        resolve_path(&self.attributes, path)
    }
}

/// Collects attribute declarations for a document or an embedded group.
#[derive(Clone, Debug, Default)]
pub struct AttributesBuilder {
    attributes: BTreeMap<String, SchemaNode>,
}

impl AttributesBuilder {
    pub fn attribute(mut self, name: impl Into<String>, declared: impl Into<Value>) -> Self {
        self.attributes
            .insert(name.into(), SchemaNode::scalar(declared));
        self
    }

    pub fn embed(
        mut self,
        name: impl Into<String>,
        storage_key: impl Into<String>,
        build: impl FnOnce(AttributesBuilder) -> AttributesBuilder,
    ) -> Self {
        let children = build(AttributesBuilder::default()).attributes;
        self.attributes.insert(
            name.into(),
            SchemaNode::Embedded {
                storage_key: storage_key.into(),
                children,
            },
        );
        self
    }
}

pub struct SchemaBuilder {
    name: String,
    database: String,
    collection: String,
    attributes: AttributesBuilder,
    indexes: Vec<IndexDescriptor>,
}

impl SchemaBuilder {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, declared: impl Into<Value>) -> Self {
        self.attributes = self.attributes.attribute(name, declared);
        self
    }

    pub fn embed(
        mut self,
        name: impl Into<String>,
        storage_key: impl Into<String>,
        build: impl FnOnce(AttributesBuilder) -> AttributesBuilder,
    ) -> Self {
        self.attributes = self.attributes.embed(name, storage_key, build);
        self
    }

    pub fn index(mut self, descriptor: IndexDescriptor) -> Self {
        self.indexes.push(descriptor);
        self
    }

    pub fn build(self) -> DocumentSchema {
        DocumentSchema {
            name: self.name,
            database: self.database,
            collection: self.collection,
            attributes: self.attributes.attributes,
            indexes: self.indexes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> DocumentDefinition {
        serde_json::from_value(json!({
            "name": "Post",
            "database": "blog",
            "collection": "posts",
            "attributes": {
                "user_name": "u",
                "published": true,
                "meta": {
                    "key": "m",
                    "attributes": {
                        "tag": "t",
                        "deep": { "key": "d", "attributes": { "tag": "t" } }
                    }
                }
            },
            "indexes": [{ "keys": "user_name" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_definition_builds_nested_tree() {
        let schema = DocumentSchema::from_definition(&definition());
        assert_eq!(schema.name(), "Post");
        assert_eq!(schema.database(), "blog");
        assert_eq!(schema.collection(), "posts");
        assert_eq!(schema.key("user_name"), Some("u"));
        assert_eq!(schema.key("published"), None);
        assert_eq!(schema.key("meta"), Some("m"));
        assert_eq!(schema.key("missing"), None);

        let meta = schema.attribute("meta").unwrap();
        let deep = meta.children().unwrap().get("deep").unwrap();
        assert_eq!(deep.storage_key(), Some("d"));
        assert_eq!(
            deep.children().unwrap().get("tag"),
            Some(&SchemaNode::scalar("t"))
        );
        assert_eq!(schema.indexes().len(), 1);
    }

    #[test]
    fn test_building_is_idempotent() {
        let definition = definition();
        assert_eq!(
            DocumentSchema::from_definition(&definition),
            DocumentSchema::from_definition(&definition)
        );
    }

    #[test]
    fn test_builder_matches_definition() {
        let built = DocumentSchema::builder("Post")
            .database("blog")
            .collection("posts")
            .attribute("user_name", "u")
            .attribute("published", true)
            .embed("meta", "m", |meta| {
                meta.attribute("tag", "t")
                    .embed("deep", "d", |deep| deep.attribute("tag", "t"))
            })
            .index(IndexDescriptor::path("user_name"))
            .build();
        assert_eq!(built, DocumentSchema::from_definition(&definition()));
    }

    #[test]
    fn test_non_string_scalar_is_accepted_at_build_time() {
        let schema = DocumentSchema::builder("Flags")
            .attribute("value", true)
            .attribute("count", 3)
            .build();
        assert_eq!(
            schema.attribute("value"),
            Some(&SchemaNode::Scalar {
                declared: json!(true)
            })
        );
        assert_eq!(schema.key("count"), None);
    }
}
