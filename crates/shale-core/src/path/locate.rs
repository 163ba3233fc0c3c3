//! Resolving a [`DotPath`] against a concrete document.

use serde_json::{Map, Value};

use crate::error::{ApiError, ErrorCode, Result};
use crate::json::node_type_name;

use super::{DotPath, Segment};

/// The result of locating a path inside a document.
///
/// A match borrows the parent container so the caller can read, replace or
/// remove the addressed value in place.
#[derive(Debug)]
pub enum PathMatch<'a> {
    /// The last segment addresses a property of an object.
    ViaObject {
        /// The object holding (or about to hold) the property.
        parent: &'a mut Map<String, Value>,
        /// Property name.
        key: String,
    },
    /// The last segment addresses an element of an array.
    ViaArray {
        /// The array holding the element slot.
        parent: &'a mut Vec<Value>,
        /// Element index; may point past the end.
        index: usize,
    },
    /// The path does not exist and was not created.
    Missing,
}

impl PathMatch<'_> {
    /// The current value at the matched location, if any.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::ViaObject { parent, key } => parent.get(key.as_str()),
            Self::ViaArray { parent, index } => parent.get(*index),
            Self::Missing => None,
        }
    }

    /// Replace or insert the value at the matched location.
    ///
    /// Setting past the end of an array pads the gap with nulls, matching
    /// the auto-vivification rules of [`DotPath::find_or_create`].
    /// Returns the previous value when one was replaced.
    pub fn set(self, value: Value) -> Option<Value> {
        match self {
            Self::ViaObject { parent, key } => parent.insert(key, value),
            Self::ViaArray { parent, index } => {
                if index < parent.len() {
                    Some(std::mem::replace(&mut parent[index], value))
                } else {
                    while parent.len() < index {
                        parent.push(Value::Null);
                    }
                    parent.push(value);
                    None
                }
            }
            Self::Missing => None,
        }
    }

    /// Remove the value at the matched location.
    ///
    /// Object properties are removed outright; array elements are replaced
    /// with `null` so sibling indexes stay stable.
    pub fn remove(self) -> Option<Value> {
        match self {
            Self::ViaObject { parent, key } => parent.remove(key.as_str()),
            Self::ViaArray { parent, index } => {
                if index < parent.len() {
                    Some(std::mem::replace(&mut parent[index], Value::Null))
                } else {
                    None
                }
            }
            Self::Missing => None,
        }
    }
}

impl DotPath {
    /// Locate this path in `document` without creating anything.
    ///
    /// Traversal through a non-container, an absent property, or an array
    /// addressed by a non-index segment yields [`PathMatch::Missing`].
    pub fn find_if_exists<'a>(&self, document: &'a mut Value) -> PathMatch<'a> {
        let (last, ancestors) = match self.segments().split_last() {
            Some(split) => split,
            None => return PathMatch::Missing,
        };

        let mut context = document;
        for segment in ancestors {
            let next = match (context, segment) {
                (Value::Object(map), segment) => map.get_mut(&*segment.as_object_key()),
                (Value::Array(items), Segment::Index(index)) => items.get_mut(*index as usize),
                _ => None,
            };
            context = match next {
                Some(next) => next,
                None => return PathMatch::Missing,
            };
        }

        match (context, last) {
            (Value::Object(parent), segment) => PathMatch::ViaObject {
                parent,
                key: segment.as_object_key().into_owned(),
            },
            (Value::Array(parent), Segment::Index(index)) => {
                PathMatch::ViaArray { parent, index: *index as usize }
            }
            _ => PathMatch::Missing,
        }
    }

    /// Locate this path in `document`, creating missing object parents.
    ///
    /// Missing intermediate object properties are created as empty objects.
    /// A missing intermediate array slot is null-padded up to (but not
    /// including) the index, then filled with an empty object.
    ///
    /// # Errors
    ///
    /// `UNSUPPORTED_UPDATE_OPERATION_PATH` when the path would create a named
    /// property on an array or an atomic value.
    pub fn find_or_create<'a>(&self, document: &'a mut Value) -> Result<PathMatch<'a>> {
        let (last, ancestors) = match self.segments().split_last() {
            Some(split) => split,
            None => return Ok(PathMatch::Missing),
        };

        let mut context = document;
        for segment in ancestors {
            context = match (context, segment) {
                (Value::Object(map), segment) => map
                    .entry(segment.as_object_key().into_owned())
                    .or_insert_with(|| Value::Object(Map::new())),
                (Value::Array(items), Segment::Index(index)) => {
                    let index = *index as usize;
                    if index >= items.len() {
                        while items.len() < index {
                            items.push(Value::Null);
                        }
                        items.push(Value::Object(Map::new()));
                    }
                    &mut items[index]
                }
                (context, segment) => return Err(cannot_create(self, segment, context)),
            };
        }

        match (context, last) {
            (Value::Object(parent), segment) => Ok(PathMatch::ViaObject {
                parent,
                key: segment.as_object_key().into_owned(),
            }),
            (Value::Array(parent), Segment::Index(index)) => {
                Ok(PathMatch::ViaArray { parent, index: *index as usize })
            }
            (context, segment) => Err(cannot_create(self, segment, context)),
        }
    }

    /// Non-mutating lookup, used by projection and sort.
    #[must_use]
    pub fn find_value<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        let mut context = document;
        for segment in self.segments() {
            context = match (context, segment) {
                (Value::Array(items), Segment::Index(index)) => items.get(*index as usize)?,
                (Value::Object(map), segment) => map.get(&*segment.as_object_key())?,
                _ => return None,
            };
        }
        Some(context)
    }
}

fn cannot_create(path: &DotPath, segment: &Segment, context: &Value) -> ApiError {
    ApiError::with_detail(
        ErrorCode::UnsupportedUpdateOperationPath,
        format!(
            "cannot create field ('{}') in path '{}'; only OBJECT nodes have properties (got {})",
            segment.as_object_key(),
            path,
            node_type_name(context)
        ),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> DotPath {
        DotPath::parse(raw).expect("valid path")
    }

    #[test]
    fn find_if_exists_via_object() {
        let mut doc = json!({"a": {"b": 3}});
        let m = path("a.b").find_if_exists(&mut doc);
        assert_eq!(m.value(), Some(&json!(3)));
    }

    #[test]
    fn find_if_exists_via_array() {
        let mut doc = json!({"a": [1, 2, 3]});
        let m = path("a.1").find_if_exists(&mut doc);
        assert_eq!(m.value(), Some(&json!(2)));
    }

    #[test]
    fn find_if_exists_missing_cases() {
        let mut doc = json!({"a": [1], "s": "x"});
        assert!(matches!(path("b").find_if_exists(&mut doc).value(), None));
        assert!(matches!(path("a.name").find_if_exists(&mut doc), PathMatch::Missing));
        assert!(matches!(path("s.b").find_if_exists(&mut doc), PathMatch::Missing));
        // Index past the end still matches the array slot, with no value.
        let m = path("a.5").find_if_exists(&mut doc);
        assert!(matches!(m, PathMatch::ViaArray { .. }));
        assert_eq!(m.value(), None);
    }

    #[test]
    fn find_or_create_vivifies_objects() {
        let mut doc = json!({});
        let m = path("a.b.c").find_or_create(&mut doc).unwrap();
        m.set(json!(42));
        assert_eq!(doc, json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn find_or_create_pads_arrays_with_nulls() {
        let mut doc = json!({"arr": [1]});
        let m = path("arr.3.x").find_or_create(&mut doc).unwrap();
        m.set(json!(true));
        assert_eq!(doc, json!({"arr": [1, null, null, {"x": true}]}));
    }

    #[test]
    fn find_or_create_rejects_property_on_array() {
        let mut doc = json!({"arr": [1]});
        let err = path("arr.name").find_or_create(&mut doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperationPath);
        assert!(err.message.contains("cannot create field"), "{}", err.message);
        assert!(err.message.contains("ARRAY"), "{}", err.message);
    }

    #[test]
    fn find_or_create_rejects_property_on_atomic() {
        let mut doc = json!({"s": "hello"});
        let err = path("s.sub").find_or_create(&mut doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperationPath);
        assert!(err.message.contains("STRING"), "{}", err.message);
    }

    #[test]
    fn set_pads_trailing_array_slot() {
        let mut doc = json!({"arr": []});
        let m = path("arr.2").find_or_create(&mut doc).unwrap();
        assert_eq!(m.set(json!(9)), None);
        assert_eq!(doc, json!({"arr": [null, null, 9]}));
    }

    #[test]
    fn remove_object_property_and_array_element() {
        let mut doc = json!({"a": {"b": 1}, "arr": [1, 2]});
        assert_eq!(path("a.b").find_if_exists(&mut doc).remove(), Some(json!(1)));
        assert_eq!(path("arr.0").find_if_exists(&mut doc).remove(), Some(json!(1)));
        // Array removal nulls the slot, preserving sibling indexes.
        assert_eq!(doc, json!({"a": {}, "arr": [null, 2]}));
    }

    #[test]
    fn find_value_walks_without_mutating() {
        let doc = json!({"a": {"b": [10, {"c": 11}]}});
        assert_eq!(path("a.b.1.c").find_value(&doc), Some(&json!(11)));
        assert_eq!(path("a.b.5").find_value(&doc), None);
        assert_eq!(path("a.x").find_value(&doc), None);
    }
}
