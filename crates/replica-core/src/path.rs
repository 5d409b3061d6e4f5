//! Typed dot-separated paths into a state tree
//!
//! A `Path` is parsed once (for example when a subscription is registered)
//! and then resolved every tick without re-parsing.

use crate::{Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a [`Path`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    key: String,
    index: Option<usize>,
}

impl Segment {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            index: key.parse().ok(),
        }
    }

    /// The segment text, used as a map key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The segment as a list index, when it is numeric
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    fn step<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match value {
            Value::Map(map) => map.get(&self.key),
            Value::List(list) => self.index.and_then(|i| list.get(i)),
            _ => None,
        }
    }
}

/// A parsed path such as `controller.child.age`
///
/// The empty string parses to the root path, which resolves to the value
/// itself. Numeric segments index into lists and act as plain keys on maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-separated path
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(Error::invalid_path(raw, "empty segment"));
            }
            segments.push(Segment::new(part));
        }
        Ok(Self { segments })
    }

    /// Extend this path with one more key
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::new(key));
        Self { segments }
    }

    /// Check if this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the path segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve this path against a value
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| segment.step(current))
    }

    /// Expand `value` into the nested map structure this path describes
    ///
    /// `a.b` with value `1` becomes `{a: {b: 1}}`.
    pub fn to_patch(&self, value: Value) -> Value {
        self.segments
            .iter()
            .rev()
            .fold(value, |inner, segment| Value::map([(segment.key.clone(), inner)]))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment.key)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Path::parse(&raw)
    }
}

impl TryFrom<&str> for Path {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        Path::parse(raw)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::map([
            (
                "controller",
                Value::map([("child", Value::map([("age", 5)]))]),
            ),
            (
                "numbers",
                Value::list([Value::map([("id", 1), ("value", 7)])]),
            ),
        ])
    }

    #[test]
    fn test_parse_and_display() {
        let path = Path::parse("controller.child.age").unwrap();
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "controller.child.age");
        assert!(Path::parse("").unwrap().is_root());
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert!(matches!(
            Path::parse("a..b"),
            Err(Error::InvalidPath { .. })
        ));
        assert!(Path::parse(".a").is_err());
        assert!(Path::parse("a.").is_err());
    }

    #[test]
    fn test_resolve() {
        let value = sample();
        let age = Path::parse("controller.child.age").unwrap();
        assert_eq!(age.resolve(&value), Some(&Value::Int(5)));

        let nested = Path::parse("numbers.0.value").unwrap();
        assert_eq!(nested.resolve(&value), Some(&Value::Int(7)));

        let missing = Path::parse("controller.parent").unwrap();
        assert_eq!(missing.resolve(&value), None);

        assert_eq!(Path::root().resolve(&value), Some(&value));
    }

    #[test]
    fn test_to_patch() {
        let path = Path::parse("controller.child.age").unwrap();
        let patch = path.to_patch(Value::Int(6));
        assert_eq!(
            patch,
            Value::map([(
                "controller",
                Value::map([("child", Value::map([("age", 6)]))])
            )])
        );
    }

    #[test]
    fn test_child() {
        let path = Path::parse("session").unwrap().child("paused");
        assert_eq!(path.to_string(), "session.paused");
    }

    #[test]
    fn test_serde_as_string() {
        let path = Path::parse("session.id").unwrap();
        let text = ron::to_string(&path).unwrap();
        assert_eq!(text, "\"session.id\"");
        let back: Path = ron::from_str(&text).unwrap();
        assert_eq!(back, path);
        assert!(ron::from_str::<Path>("\"a..b\"").is_err());
    }
}
