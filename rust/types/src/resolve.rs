use serde_json::Value;
use shortkey_error::{ErrorCodes, ShortkeyError};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::schema::SchemaNode;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error(
        "Cannot resolve '{path}': attribute '{attribute}' is declared as {declared}, which is not a storage key"
    )]
    NonStringAttribute {
        path: String,
        attribute: String,
        declared: Value,
    },
}

impl ShortkeyError for ResolveError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Resolves a dotted attribute path against a tree of schema nodes.
///
/// Segments are looked up level by level. Embedded groups contribute their
/// storage key and the walk continues in their children. A scalar must be the
/// last segment and contributes its key. If any segment is not declared at its
/// level, including a segment past a scalar, the whole input path is returned
/// unchanged, so fields the schema does not model can still be addressed.
///
/// A terminal scalar whose declared value is not a string cannot be a storage
/// key and fails the resolution.
pub fn resolve_path(
    attributes: &BTreeMap<String, SchemaNode>,
    path: &str,
) -> Result<String, ResolveError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut resolved: Vec<&str> = Vec::with_capacity(segments.len());
    let mut level = attributes;

    for (position, segment) in segments.iter().enumerate() {
        let Some(node) = level.get(*segment) else {
            return Ok(path.to_string());
        };
        let terminal = position + 1 == segments.len();
        match node {
            SchemaNode::Embedded {
                storage_key,
                children,
            } => {
                resolved.push(storage_key);
                level = children;
            }
            // Scalars have no children, so the next segment cannot be declared.
            SchemaNode::Scalar { .. } if !terminal => return Ok(path.to_string()),
            SchemaNode::Scalar { declared } => match declared.as_str() {
                Some(storage_key) => resolved.push(storage_key),
                None => {
                    return Err(ResolveError::NonStringAttribute {
                        path: path.to_string(),
                        attribute: segments[..=position].join("."),
                        declared: declared.clone(),
                    })
                }
            },
        }
    }

    Ok(resolved.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DocumentSchema;
    use proptest::prelude::*;
    use serde_json::json;

    fn meta_schema() -> DocumentSchema {
        DocumentSchema::builder("ResolveTest")
            .attribute("user_name", "u")
            .attribute("value", true)
            .embed("meta", "m", |meta| {
                meta.attribute("tag", "t").embed("deep", "d", |deep| {
                    deep.embed("deeper", "d", |deeper| {
                        deeper.embed("deeper_still", "d", |still| still.attribute("tag", "t"))
                    })
                })
            })
            .build()
    }

    #[test]
    fn test_resolve_scalar() {
        assert_eq!(meta_schema().resolve("user_name").unwrap(), "u");
    }

    #[test]
    fn test_resolve_embedded_group_alone() {
        assert_eq!(meta_schema().resolve("meta").unwrap(), "m");
    }

    #[test]
    fn test_resolve_dotted() {
        let schema = meta_schema();
        assert_eq!(schema.resolve("meta.tag").unwrap(), "m.t");
        assert_eq!(schema.resolve("meta.foo").unwrap(), "meta.foo");
    }

    #[test]
    fn test_resolve_deep_dotted() {
        let schema = meta_schema();
        assert_eq!(schema.resolve("meta.deep").unwrap(), "m.d");
        assert_eq!(schema.resolve("meta.deep.deeper").unwrap(), "m.d.d");
        assert_eq!(
            schema.resolve("meta.deep.deeper.deeper_still").unwrap(),
            "m.d.d.d"
        );
        assert_eq!(
            schema.resolve("meta.deep.deeper.deeper_still.tag").unwrap(),
            "m.d.d.d.t"
        );
    }

    #[test]
    fn test_undeclared_first_segment_passes_through() {
        let schema = DocumentSchema::builder("Passthrough")
            .attribute("user_name", "u")
            .build();
        assert_eq!(schema.resolve("meta.foo").unwrap(), "meta.foo");
    }

    #[test]
    fn test_passthrough_keeps_whole_suffix() {
        // `tag` is declared under `meta`, but once `nope` misses, the path is
        // returned as written.
        assert_eq!(
            meta_schema().resolve("meta.nope.tag").unwrap(),
            "meta.nope.tag"
        );
    }

    #[test]
    fn test_segments_after_scalar_pass_through() {
        assert_eq!(
            meta_schema().resolve("user_name.first").unwrap(),
            "user_name.first"
        );
    }

    #[test]
    fn test_segments_after_non_string_scalar_pass_through() {
        let schema = meta_schema();
        assert_eq!(schema.resolve("value.x").unwrap(), "value.x");
        assert_eq!(schema.resolve("value.x.y").unwrap(), "value.x.y");
        assert!(schema.resolve("value").is_err());
    }

    #[test]
    fn test_undeclared_embedded_child_keeps_literal_path() {
        let schema = DocumentSchema::builder("Post")
            .attribute("user_name", "u")
            .embed("meta", "m", |meta| meta.attribute("tag", "t"))
            .build();
        assert_eq!(schema.resolve("meta.tag").unwrap(), "m.t");
        assert_eq!(schema.resolve("meta.foo").unwrap(), "meta.foo");
        assert_eq!(schema.resolve("meta.tag.x").unwrap(), "meta.tag.x");
    }

    #[test]
    fn test_resolve_empty_path() {
        assert_eq!(meta_schema().resolve("").unwrap(), "");
    }

    #[test]
    fn test_non_string_attribute_fails() {
        let err = meta_schema().resolve("value").unwrap_err();
        assert_eq!(
            err,
            ResolveError::NonStringAttribute {
                path: "value".to_string(),
                attribute: "value".to_string(),
                declared: json!(true),
            }
        );
        assert_eq!(err.code(), ErrorCodes::InvalidArgument);
    }

    #[test]
    fn test_non_string_nested_attribute_fails() {
        let schema = DocumentSchema::builder("Nested")
            .embed("meta", "m", |meta| meta.attribute("count", 3))
            .build();
        let err = schema.resolve("meta.count").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NonStringAttribute { ref attribute, .. } if attribute == "meta.count"
        ));
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z_]{1,8}"
    }

    proptest! {
        #[test]
        fn test_declared_scalar_resolves_to_its_key(
            attributes in proptest::collection::btree_map(segment(), segment(), 1..10),
        ) {
            let schema = attributes
                .iter()
                .fold(DocumentSchema::builder("Flat"), |builder, (name, key)| {
                    builder.attribute(name.clone(), key.clone())
                })
                .build();
            for (name, key) in &attributes {
                prop_assert_eq!(&schema.resolve(name).unwrap(), key);
            }
        }

        #[test]
        fn test_nested_keys_compose_in_segment_order(
            levels in proptest::collection::vec((segment(), segment()), 1..6),
            leaf in (segment(), segment()),
        ) {
            fn nest(levels: &[(String, String)], leaf: &(String, String), builder: crate::schema::AttributesBuilder) -> crate::schema::AttributesBuilder {
                match levels.split_first() {
                    None => builder.attribute(leaf.0.clone(), leaf.1.clone()),
                    Some(((name, key), rest)) => {
                        builder.embed(name.clone(), key.clone(), |inner| nest(rest, leaf, inner))
                    }
                }
            }
            let ((first_name, first_key), rest) = levels.split_first().unwrap();
            let schema = DocumentSchema::builder("Deep")
                .embed(first_name.clone(), first_key.clone(), |inner| nest(rest, &leaf, inner))
                .build();

            let path = levels
                .iter()
                .map(|(name, _)| name.as_str())
                .chain(std::iter::once(leaf.0.as_str()))
                .collect::<Vec<_>>()
                .join(".");
            let expected = levels
                .iter()
                .map(|(_, key)| key.as_str())
                .chain(std::iter::once(leaf.1.as_str()))
                .collect::<Vec<_>>()
                .join(".");
            prop_assert_eq!(schema.resolve(&path).unwrap(), expected);
        }

        #[test]
        fn test_undeclared_paths_pass_through(
            segments in proptest::collection::vec("[A-Z]{1,6}", 1..5),
        ) {
            // Declared names are lowercase, so an uppercase path never matches.
            let path = segments.join(".");
            prop_assert_eq!(meta_schema().resolve(&path).unwrap(), path);
        }
    }
}
