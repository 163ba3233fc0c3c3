//! Property-based tests for shredding invariants.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use serde_json::{Map, Value};

use crate::path::DotPath;
use crate::shred::Shredder;

/// Strategy for JSON values small enough to stay inside the default limits.
fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::vec(("[a-zA-Z][a-zA-Z0-9_]{0,8}", inner), 0..5).prop_map(|fields| {
                let mut map = Map::new();
                for (key, value) in fields {
                    map.insert(key, value);
                }
                Value::Object(map)
            }),
        ]
    })
}

/// Strategy for shreddable documents: an object with a string `_id`.
fn arb_document() -> impl Strategy<Value = Value> {
    ("[a-z0-9]{1,8}", prop::collection::vec(("[a-zA-Z][a-zA-Z0-9_]{0,8}", arb_value()), 0..6))
        .prop_map(|(id, fields)| {
            let mut map = Map::new();
            map.insert("_id".to_owned(), Value::String(id));
            for (key, value) in fields {
                map.insert(key, value);
            }
            Value::Object(map)
        })
}

proptest! {
    /// Reshredding `doc_json` yields an equal shredded form.
    #[test]
    fn reshred_is_idempotent(document in arb_document()) {
        let shredder = Shredder::default();
        let first = shredder.shred(&document).unwrap();
        let reparsed: Value = serde_json::from_str(&first.doc_json).unwrap();
        let second = shredder.shred(&reparsed).unwrap();

        prop_assert_eq!(&first.doc_json, &second.doc_json);
        prop_assert_eq!(&first.doc_field_order, &second.doc_field_order);
        prop_assert_eq!(&first.exist_keys, &second.exist_keys);
        prop_assert_eq!(&first.array_contains, &second.array_contains);
        prop_assert_eq!(&first.query_bool_values, &second.query_bool_values);
        prop_assert_eq!(&first.query_number_values, &second.query_number_values);
        prop_assert_eq!(&first.query_text_values, &second.query_text_values);
        prop_assert_eq!(&first.query_null_values, &second.query_null_values);
    }

    /// A path is in `exist_keys` iff `find_value` resolves it.
    #[test]
    fn exist_keys_match_find_value(document in arb_document()) {
        let shredded = Shredder::default().shred(&document).unwrap();
        for path in &shredded.exist_keys {
            prop_assert!(
                path.find_value(&document).is_some(),
                "existing path {} must resolve", path
            );
        }
    }

    /// Sorting paths places every parent immediately before its first
    /// descendant.
    #[test]
    fn path_order_groups_ancestors(document in arb_document()) {
        let shredded = Shredder::default().shred(&document).unwrap();
        let sorted: Vec<DotPath> = shredded.exist_keys.iter().cloned().collect();
        for window in sorted.windows(2) {
            // Any descendant of sorted[i] appearing later must be adjacent to
            // its ancestor run: if the next path is not a descendant, no later
            // path may be one either.
            if !window[1].is_sub_path_of(&window[0]) {
                let later_descendant = sorted
                    .iter()
                    .skip_while(|p| *p != &window[1])
                    .any(|p| p.is_sub_path_of(&window[0]));
                prop_assert!(!later_descendant, "descendants of {} not contiguous", window[0]);
            }
        }
    }

    /// Every atomic leaf lands in exactly one `query_*` container.
    #[test]
    fn atomics_shred_once(document in arb_document()) {
        let shredded = Shredder::default().shred(&document).unwrap();
        for path in &shredded.exist_keys {
            let value = path.find_value(&document).unwrap();
            let occurrences = usize::from(shredded.query_bool_values.contains_key(path))
                + usize::from(shredded.query_number_values.contains_key(path))
                + usize::from(shredded.query_text_values.contains_key(path))
                + usize::from(shredded.query_timestamp_values.contains_key(path))
                + usize::from(shredded.query_null_values.contains(path));
            let expected = usize::from(crate::json::is_atomic(value));
            prop_assert_eq!(occurrences, expected, "path {}", path);
        }
    }
}
