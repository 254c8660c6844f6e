use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shortkey_error::{ErrorCodes, ShortkeyError};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::resolve::ResolveError;
use crate::schema::DocumentSchema;

pub const DEFAULT_BACKGROUND: bool = true;
pub const DEFAULT_CACHE_FOR: Duration = Duration::from_secs(60 * 60 * 24);

pub const BACKGROUND_OPTION: &str = "background";
pub const CACHE_FOR_OPTION: &str = "cache_for";
pub const SPARSE_OPTION: &str = "sparse";
pub const UNIQUE_OPTION: &str = "unique";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("Compound index element {position} must be a (path, direction) pair, got {element}")]
    MalformedPair { position: usize, element: Value },
    #[error("Compound index element {position} has a non-string path: {path}")]
    NonStringPath { position: usize, path: Value },
    #[error("Compound index element {position} has an unknown direction: {direction}")]
    InvalidDirection { position: usize, direction: Value },
    #[error("Compound index declares no keys")]
    EmptyCompound,
}

impl ShortkeyError for DescriptorError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Anything that prevents a descriptor from being turned into an ensure-index
/// request. Both cases are declaration defects.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexSpecError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl ShortkeyError for IndexSpecError {
    fn code(&self) -> ErrorCodes {
        match self {
            IndexSpecError::Descriptor(err) => err.code(),
            IndexSpecError::Resolve(err) => err.code(),
        }
    }
}

// ============================================================================
// DIRECTION
// ============================================================================

/// Sort direction of one key of a compound index. Serialized as `1` / `-1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Error)]
#[error("unknown index direction {0}, expected 1 or -1")]
pub struct UnknownDirection(i64);

impl TryFrom<i64> for Direction {
    type Error = UnknownDirection;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Ascending),
            -1 => Ok(Direction::Descending),
            other => Err(UnknownDirection(other)),
        }
    }
}

impl From<Direction> for i64 {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }
}

impl From<Direction> for Value {
    fn from(direction: Direction) -> Self {
        Value::from(i64::from(direction))
    }
}

// ============================================================================
// DECLARATION
// ============================================================================

/// One element of a compound index as declared. Expected to be
/// `[path, direction]`; checked only when the descriptor is normalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyDeclaration(pub Vec<Value>);

impl<P: Into<String>> From<(P, Direction)> for KeyDeclaration {
    fn from((path, direction): (P, Direction)) -> Self {
        KeyDeclaration(vec![Value::String(path.into()), direction.into()])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexKeys {
    /// A single attribute path.
    Path(String),
    /// Ordered `(path, direction)` pairs. Order is significant.
    Compound(Vec<KeyDeclaration>),
}

/// Options as declared on a descriptor. Unset options stay unset; defaults
/// are applied by [`IndexDescriptor::options`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredIndexOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_for: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    /// Options forwarded to the database untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Declarative description of one secondary index of a document class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub keys: IndexKeys,
    #[serde(flatten)]
    pub options: DeclaredIndexOptions,
}

/// Keys after shape validation, paths not yet resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedKeys<'a> {
    Path(&'a str),
    Compound(Vec<(&'a str, Direction)>),
}

impl IndexDescriptor {
    pub fn new(keys: IndexKeys) -> Self {
        Self {
            keys,
            options: DeclaredIndexOptions::default(),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::new(IndexKeys::Path(path.into()))
    }

    pub fn compound<K: Into<KeyDeclaration>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self::new(IndexKeys::Compound(
            keys.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn background(mut self, background: bool) -> Self {
        self.options.background = Some(background);
        self
    }

    pub fn cache_for(mut self, cache_for: Duration) -> Self {
        self.options.cache_for = Some(cache_for.as_secs());
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.options.sparse = Some(sparse);
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.options.unique = Some(unique);
        self
    }

    /// Sets a pass-through option. Recognized names go to their typed field
    /// when the value has the matching type.
    pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        let typed = match (name.as_str(), &value) {
            (BACKGROUND_OPTION, Value::Bool(b)) => {
                self.options.background = Some(*b);
                true
            }
            (SPARSE_OPTION, Value::Bool(b)) => {
                self.options.sparse = Some(*b);
                true
            }
            (UNIQUE_OPTION, Value::Bool(b)) => {
                self.options.unique = Some(*b);
                true
            }
            (CACHE_FOR_OPTION, Value::Number(n)) => match n.as_u64() {
                Some(secs) => {
                    self.options.cache_for = Some(secs);
                    true
                }
                None => false,
            },
            _ => false,
        };
        if !typed {
            self.options.extra.insert(name, value);
        }
        self
    }

    /// How long an ensured index is trusted before it is ensured again.
    pub fn cache_window(&self) -> Duration {
        self.options
            .cache_for
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_FOR)
    }

    /// Declared options merged over the defaults.
    pub fn options(&self) -> IndexOptions {
        IndexOptions {
            background: self.options.background.unwrap_or(DEFAULT_BACKGROUND),
            cache_for: self.cache_window(),
            sparse: self.options.sparse,
            unique: self.options.unique,
            extra: self.options.extra.clone(),
        }
    }

    /// Checks the shape of the declared keys.
    pub fn normalize(&self) -> Result<NormalizedKeys<'_>, DescriptorError> {
        match &self.keys {
            IndexKeys::Path(path) => Ok(NormalizedKeys::Path(path)),
            IndexKeys::Compound(declarations) => {
                if declarations.is_empty() {
                    return Err(DescriptorError::EmptyCompound);
                }
                declarations
                    .iter()
                    .enumerate()
                    .map(|(position, declaration)| normalize_pair(position, declaration))
                    .collect::<Result<Vec<_>, _>>()
                    .map(NormalizedKeys::Compound)
            }
        }
    }

    /// Normalizes the keys and resolves every path against `schema`.
    pub fn resolve(&self, schema: &DocumentSchema) -> Result<EnsureIndexRequest, IndexSpecError> {
        let spec = match self.normalize()? {
            NormalizedKeys::Path(path) => ResolvedIndexSpec::Key(schema.resolve(path)?),
            NormalizedKeys::Compound(pairs) => ResolvedIndexSpec::Compound(
                pairs
                    .into_iter()
                    .map(|(path, direction)| Ok((schema.resolve(path)?, direction)))
                    .collect::<Result<Vec<_>, ResolveError>>()?,
            ),
        };
        Ok(EnsureIndexRequest {
            spec,
            options: self.options(),
        })
    }
}

fn normalize_pair(
    position: usize,
    declaration: &KeyDeclaration,
) -> Result<(&str, Direction), DescriptorError> {
    let [path, direction] = declaration.0.as_slice() else {
        return Err(DescriptorError::MalformedPair {
            position,
            element: Value::Array(declaration.0.clone()),
        });
    };
    let path = path.as_str().ok_or_else(|| DescriptorError::NonStringPath {
        position,
        path: path.clone(),
    })?;
    let direction = direction
        .as_i64()
        .and_then(|value| Direction::try_from(value).ok())
        .ok_or_else(|| DescriptorError::InvalidDirection {
            position,
            direction: direction.clone(),
        })?;
    Ok((path, direction))
}

// ============================================================================
// RESOLVED FORM
// ============================================================================

/// Merged options as handed to the database. `background` and `cache_for`
/// are always present, the others only when declared.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexOptions {
    pub background: bool,
    pub cache_for: Duration,
    pub sparse: Option<bool>,
    pub unique: Option<bool>,
    pub extra: BTreeMap<String, Value>,
}

impl IndexOptions {
    /// The options as a flat map, `cache_for` in whole seconds.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self
            .extra
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        map.insert(BACKGROUND_OPTION.to_string(), self.background.into());
        map.insert(
            CACHE_FOR_OPTION.to_string(),
            self.cache_for.as_secs().into(),
        );
        if let Some(sparse) = self.sparse {
            map.insert(SPARSE_OPTION.to_string(), sparse.into());
        }
        if let Some(unique) = self.unique {
            map.insert(UNIQUE_OPTION.to_string(), unique.into());
        }
        map
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedIndexSpec {
    Key(String),
    Compound(Vec<(String, Direction)>),
}

impl ResolvedIndexSpec {
    /// `"key"` or `[["key", 1], ...]`.
    pub fn to_value(&self) -> Value {
        match self {
            ResolvedIndexSpec::Key(key) => Value::String(key.clone()),
            ResolvedIndexSpec::Compound(pairs) => Value::Array(
                pairs
                    .iter()
                    .map(|(key, direction)| {
                        Value::Array(vec![Value::String(key.clone()), (*direction).into()])
                    })
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ResolvedIndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedIndexSpec::Key(key) => f.write_str(key),
            ResolvedIndexSpec::Compound(pairs) => {
                let keys = pairs
                    .iter()
                    .map(|(key, direction)| format!("{key}: {}", i64::from(*direction)))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({keys})")
            }
        }
    }
}

/// One ensure-index call: the resolved keys and the merged options.
#[derive(Clone, Debug, PartialEq)]
pub struct EnsureIndexRequest {
    pub spec: ResolvedIndexSpec,
    pub options: IndexOptions,
}
