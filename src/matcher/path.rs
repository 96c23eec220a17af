//! Structured paths into value trees
//!
//! Paths are sequences of segments compared segment by segment, so a map key
//! containing the separator can never collide with a nested path.

use std::fmt;

use crate::script::Value;

/// One step into a value tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Map key
    Key(String),
    /// 0-based list index
    Index(usize),
}

/// Location of a node inside a value tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The root of a tree
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Child path through a map key
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.into()));
        Self(segments)
    }

    /// Child path through a list index
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Self(segments)
    }

    /// Walk `root` along this path
    pub fn extract<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.0 {
            current = match (segment, current) {
                (Segment::Key(k), Value::Map(entries)) => entries.get(k)?,
                (Segment::Index(i), Value::List(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(root)");
        }
        for segment in &self.0 {
            match segment {
                Segment::Key(k) => write!(f, ".{}", k)?,
                Segment::Index(i) => write!(f, ".{}", i)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display() {
        let p = Path::root().key("items").index(2).key("id");
        assert_eq!(p.to_string(), ".items.2.id");
        assert_eq!(Path::root().to_string(), "(root)");
    }

    #[test]
    fn test_keys_with_separator_do_not_collide() {
        let dotted = Path::root().key("a.b");
        let nested = Path::root().key("a").key("b");
        assert_eq!(dotted.to_string(), nested.to_string());
        assert_ne!(dotted, nested);
    }

    #[test]
    fn test_extract_nested() {
        let v = Value::from(json!({"a": {"b": 7}, "xs": [{"id": "x"}]}));
        assert_eq!(
            Path::root().key("a").key("b").extract(&v),
            Some(&Value::Number(7.0))
        );
        assert_eq!(
            Path::root().key("xs").index(0).key("id").extract(&v),
            Some(&Value::from("x"))
        );
        assert_eq!(Path::root().key("missing").extract(&v), None);
        assert_eq!(Path::root().extract(&v), Some(&v));
    }
}
