use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dotted path (`a.b.0.c`) used to read values out of an event payload.
///
/// Map keys are matched literally and numeric segments index into arrays.
/// Resolution returns `None` for a missing path, which is distinct from
/// `Some(Value::Null)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|segment| !segment.is_empty())
    }

    /// Resolves the path against `root`.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in self.segments() {
            match current {
                Value::Object(map) => match map.get(segment) {
                    Some(value) => current = value,
                    None => return None,
                },
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    current = items.get(index)?;
                }
                _ => return None,
            }
        }
        Some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        FieldPath::new(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        FieldPath::new(value)
    }
}

/// Convenience wrapper around [`FieldPath::resolve`].
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    FieldPath::from(path).resolve(root)
}
