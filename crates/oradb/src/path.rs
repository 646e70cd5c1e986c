//! Paths into a JSON document: dotted keys with bracketed indices (`a.b[0].c`).
//!
//! Writes create whatever containers are missing along the way: an array when the next
//! segment is an index, an object otherwise. Scalars in the way are replaced.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::ValidationError;

/// How many `null`s a write may insert to reach an index past the end of an array.
pub const MAX_ARRAY_PADDING: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed document path. The empty path addresses the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocPath {
    segments: Vec<Segment>,
}

impl DocPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(path: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        if path.is_empty() {
            return Ok(Self { segments });
        }

        for part in path.split('.') {
            if part.is_empty() {
                return Err(invalid("empty segment"));
            }
            let (head, mut rest) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            if !head.is_empty() {
                segments.push(key_segment(head));
            }
            while !rest.is_empty() {
                let Some(inner) = rest.strip_prefix('[') else {
                    return Err(invalid("unexpected text after `]`"));
                };
                let Some(close) = inner.find(']') else {
                    return Err(invalid("unclosed `[`"));
                };
                let index = inner[..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = &inner[close + 1..];
            }
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(doc, |current, segment| child(current, segment))
    }

    /// Replace the value at this path, creating intermediate containers.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<(), ValidationError> {
        let Some((last, parents)) = self.segments.split_last() else {
            *doc = value;
            return Ok(());
        };

        let mut current = doc;
        for (i, segment) in parents.iter().enumerate() {
            let next = &self.segments[i + 1];
            current = child_mut_or_insert(current, segment, next, self)?;
        }
        let slot = slot_mut(current, last, self)?;
        *slot = value;
        Ok(())
    }

    /// Remove the value at this path and return it. Removing the root empties the document.
    pub fn unset(&self, doc: &mut Value) -> Option<Value> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Some(std::mem::replace(doc, Value::Object(Map::new())));
        };

        let mut current = doc;
        for segment in parents {
            current = child_mut(current, segment)?;
        }
        match (current, last) {
            (Value::Object(map), segment) => map.remove(&segment_key(segment)),
            (Value::Array(items), segment) => {
                let index = segment_index(segment)?;
                (index < items.len()).then(|| items.remove(index))
            }
            _ => None,
        }
    }
}

impl FromStr for DocPath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocPath::parse(s)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn key_segment(part: &str) -> Segment {
    // `a.0` addresses index 0 of an array, or key "0" of an object.
    match part.parse::<usize>() {
        Ok(index) if part.bytes().all(|b| b.is_ascii_digit()) => Segment::Index(index),
        _ => Segment::Key(part.to_string()),
    }
}

fn segment_key(segment: &Segment) -> String {
    match segment {
        Segment::Key(key) => key.clone(),
        Segment::Index(index) => index.to_string(),
    }
}

fn segment_index(segment: &Segment) -> Option<usize> {
    match segment {
        Segment::Index(index) => Some(*index),
        Segment::Key(key) => key.parse().ok(),
    }
}

fn child<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(&segment_key(segment)),
        Value::Array(items) => items.get(segment_index(segment)?),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(&segment_key(segment)),
        Value::Array(items) => items.get_mut(segment_index(segment)?),
        _ => None,
    }
}

fn empty_container_for(next: &Segment) -> Value {
    match next {
        Segment::Index(_) => Value::Array(Vec::new()),
        Segment::Key(_) => Value::Object(Map::new()),
    }
}

fn child_mut_or_insert<'a>(
    value: &'a mut Value,
    segment: &Segment,
    next: &Segment,
    path: &DocPath,
) -> Result<&'a mut Value, ValidationError> {
    let slot = slot_mut(value, segment, path)?;
    if !slot.is_object() && !slot.is_array() {
        *slot = empty_container_for(next);
    }
    Ok(slot)
}

/// Mutable slot for `segment` inside `value`, creating it (as null) when absent.
fn slot_mut<'a>(
    value: &'a mut Value,
    segment: &Segment,
    path: &DocPath,
) -> Result<&'a mut Value, ValidationError> {
    if !value.is_object() && !value.is_array() {
        *value = empty_container_for(segment);
    }
    match value {
        Value::Object(map) => Ok(map.entry(segment_key(segment)).or_insert(Value::Null)),
        Value::Array(items) => {
            let Some(index) = segment_index(segment) else {
                return Err(ValidationError::InvalidPath {
                    path: path.to_string(),
                    reason: format!("`{}` addresses an array", segment_key(segment)),
                });
            };
            if index >= items.len() {
                if index - items.len() > MAX_ARRAY_PADDING {
                    return Err(ValidationError::InvalidPath {
                        path: path.to_string(),
                        reason: format!(
                            "index {index} is more than {MAX_ARRAY_PADDING} past the end of an array of {}",
                            items.len()
                        ),
                    });
                }
                items.resize(index + 1, Value::Null);
            }
            Ok(&mut items[index])
        }
        _ => unreachable!("containers were created above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn path(s: &str) -> DocPath {
        DocPath::parse(s).expect("valid path")
    }

    #[test]
    fn parses_keys_and_indices() {
        assert_eq!(
            path("a.b[2].c").segments(),
            &[
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
            ]
        );
        assert_eq!(path("[0][1]").segments(), &[Segment::Index(0), Segment::Index(1)]);
        assert_eq!(path("a.0").segments(), &[Segment::Key("a".into()), Segment::Index(0)]);
        assert!(path("").is_root());
        assert_eq!(path("a.b[2].c").to_string(), "a.b[2].c");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["a..b", "a.", "a[", "a[x]", "a[1]b", "a[-1]"] {
            assert!(DocPath::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn get_walks_objects_and_arrays() {
        let doc = json!({"a": {"list": [10, {"b": true}]}, "0": "zero"});
        assert_eq!(path("a.list[1].b").get(&doc), Some(&json!(true)));
        assert_eq!(path("a.list.0").get(&doc), Some(&json!(10)));
        assert_eq!(path("0").get(&doc), Some(&json!("zero")));
        assert_eq!(path("a.missing").get(&doc), None);
        assert_eq!(path("").get(&doc), Some(&doc));
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut doc = json!({"a": 5});
        path("a.b").set(&mut doc, json!(1)).unwrap();
        path("list[2].name").set(&mut doc, json!("x")).unwrap();
        assert_eq!(
            doc,
            json!({"a": {"b": 1}, "list": [null, null, {"name": "x"}]})
        );
    }

    #[test]
    fn set_on_root_replaces_document() {
        let mut doc = json!({"a": 1});
        DocPath::root().set(&mut doc, json!([1, 2])).unwrap();
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn set_key_on_array_is_rejected() {
        let mut doc = json!({"list": [1]});
        let err = path("list.name").set(&mut doc, json!(1)).expect_err("key on array");
        assert!(matches!(err, ValidationError::InvalidPath { .. }));
    }

    #[test]
    fn set_refuses_indices_far_past_the_end() {
        let mut doc = json!({"list": [1]});
        for bad in ["list[18446744073709551615]", "list[10000000000]", "fresh[1026]"] {
            let err = path(bad).set(&mut doc, json!(1)).expect_err(bad);
            assert!(matches!(err, ValidationError::InvalidPath { .. }), "{bad}");
        }
        assert_eq!(doc, json!({"list": [1], "fresh": []}));

        path("list[1025]").set(&mut doc, json!(2)).unwrap();
        let list = doc["list"].as_array().unwrap();
        assert_eq!(list.len(), 1026);
        assert_eq!(list[1025], json!(2));
    }

    #[test]
    fn unset_removes_keys_and_elements() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "list": [1, 2, 3]});
        assert_eq!(path("a.b").unset(&mut doc), Some(json!(1)));
        assert_eq!(path("list[1]").unset(&mut doc), Some(json!(2)));
        assert_eq!(path("missing.x").unset(&mut doc), None);
        assert_eq!(doc, json!({"a": {"c": 2}, "list": [1, 3]}));
    }
}
