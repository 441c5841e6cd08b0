//! Performance oriented JSON manipulation.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
pub use serde_json_bytes::Value;

use crate::error::ProtocolError;

/// A JSON object.
pub type Object = serde_json_bytes::Map<serde_json_bytes::ByteString, Value>;

/// A GraphQL path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

/// A path into the result tree of a query execution.
///
/// Paths address the location at which an incremental response must be
/// merged. They are stable for the same logical position across all patches
/// of one execution.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn from_slice<T: AsRef<str>>(segments: &[T]) -> Path {
        Path(
            segments
                .iter()
                .map(|segment| PathElement::Key(segment.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a new path with `other` appended.
    pub fn join(&self, other: impl AsRef<Path>) -> Path {
        let other = other.as_ref();
        let mut elements = Vec::with_capacity(self.0.len() + other.0.len());
        elements.extend_from_slice(&self.0);
        elements.extend_from_slice(&other.0);
        Path(elements)
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element);
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path(
            s.split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    if let Ok(index) = segment.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(segment.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        Path::from(s.as_str())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

/// Extension trait for [`Value`].
pub trait ValueExt {
    /// Deep merge `other` into the value.
    ///
    /// Objects are merged field-wise, arrays element-wise by index. An
    /// incoming `null` never overwrites existing data: `null` is the
    /// pending marker for fields that have not arrived yet.
    fn deep_merge(&mut self, other: Value);

    /// Get a reference to the value at a path, if present.
    fn get_at<'a>(&'a self, path: &Path) -> Option<&'a Value>;

    /// Get a mutable reference to the value at a path, creating missing
    /// ancestors along the way: keys materialize objects, indices
    /// materialize arrays padded with `null` pending markers.
    fn at_path_mut<'a>(&'a mut self, path: &Path) -> Result<&'a mut Value, ProtocolError>;
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b {
                    match a.get_mut(&key) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (index, value) in b.into_iter().enumerate() {
                    match a.get_mut(index) {
                        Some(existing) => existing.deep_merge(value),
                        None => a.push(value),
                    }
                }
            }
            (_, Value::Null) => {}
            (a, b) => {
                *a = b;
            }
        }
    }

    fn get_at<'a>(&'a self, path: &Path) -> Option<&'a Value> {
        let mut current = self;
        for element in path.iter() {
            current = match element {
                PathElement::Key(key) => current.as_object()?.get(key.as_str())?,
                PathElement::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }

    fn at_path_mut<'a>(&'a mut self, path: &Path) -> Result<&'a mut Value, ProtocolError> {
        let mut current = self;
        for element in path.iter() {
            match element {
                PathElement::Key(key) => {
                    if current.is_null() {
                        *current = Value::Object(Object::default());
                    }
                    current = match current {
                        Value::Object(object) => object.entry(key.as_str()).or_insert(Value::Null),
                        _ => {
                            return Err(ProtocolError::InvalidPath {
                                path: path.to_string(),
                                reason: format!("expected an object at key '{key}'"),
                            });
                        }
                    };
                }
                PathElement::Index(index) => {
                    if current.is_null() {
                        *current = Value::Array(Vec::new());
                    }
                    current = match current {
                        Value::Array(array) => {
                            while array.len() <= *index {
                                array.push(Value::Null);
                            }
                            &mut array[*index]
                        }
                        _ => {
                            return Err(ProtocolError::InvalidPath {
                                path: path.to_string(),
                                reason: format!("expected an array at index {index}"),
                            });
                        }
                    };
                }
            }
        }
        Ok(current)
    }
}
