//! Update application: mutate a document in memory, then re-shred.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use shale_core::{ApiError, DotPath, ErrorCode, PathMatch, Result};

use crate::command::clause::{UpdateAssignment, UpdateClause, UpdateOperator};

/// Apply an update clause to a document.
///
/// `is_insert` is true when the enclosing operation is an upsert inserting a
/// new document; `$setOnInsert` assignments apply only then. Returns whether
/// the document changed.
///
/// # Errors
///
/// `UNSUPPORTED_UPDATE_OPERATION_PATH` when two locators overlap as
/// ancestor/descendant or a path cannot be created;
/// `UNSUPPORTED_UPDATE_OPERATION` for `_id` mutation and operand/target type
/// mismatches.
pub fn apply_update(clause: &UpdateClause, document: &mut Value, is_insert: bool) -> Result<bool> {
    check_locators(clause)?;

    let mut modified = false;
    for operation in &clause.operations {
        for assignment in &operation.assignments {
            modified |= match operation.operator {
                UpdateOperator::Set => apply_set(assignment, document)?,
                UpdateOperator::SetOnInsert => {
                    is_insert && apply_set(assignment, document)?
                }
                UpdateOperator::Unset => apply_unset(assignment, document),
                UpdateOperator::Inc => apply_arithmetic(assignment, document, Arithmetic::Add)?,
                UpdateOperator::Mul => {
                    apply_arithmetic(assignment, document, Arithmetic::Multiply)?
                }
                UpdateOperator::Min => apply_extremum(assignment, document, Ordering::Less)?,
                UpdateOperator::Max => apply_extremum(assignment, document, Ordering::Greater)?,
                UpdateOperator::Push => apply_push(assignment, document)?,
                UpdateOperator::Pop => apply_pop(assignment, document)?,
                UpdateOperator::AddToSet => apply_add_to_set(assignment, document)?,
                UpdateOperator::Rename => apply_rename(assignment, document)?,
            };
        }
    }
    Ok(modified)
}

/// Reject `_id` targets and overlapping locators.
fn check_locators(clause: &UpdateClause) -> Result<()> {
    let mut locators: Vec<DotPath> = Vec::new();
    for operation in &clause.operations {
        for assignment in &operation.assignments {
            locators.push(assignment.path.clone());
            if operation.operator == UpdateOperator::Rename {
                locators.push(rename_target(assignment)?);
            }
        }
    }
    for locator in &locators {
        if locator.is_document_id() {
            return Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperation,
                "document id cannot be updated",
            ));
        }
    }
    // Sorted, a parent lands immediately before its descendants, so one
    // adjacent check finds every overlap.
    locators.sort();
    for pair in locators.windows(2) {
        if pair[1].is_sub_path_of(&pair[0]) {
            return Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperationPath,
                format!("update operators using conflicting paths '{}' and '{}'", pair[0], pair[1]),
            ));
        }
    }
    Ok(())
}

fn apply_set(assignment: &UpdateAssignment, document: &mut Value) -> Result<bool> {
    let target = assignment.path.find_or_create(document)?;
    if target.value() == Some(&assignment.operand) {
        return Ok(false);
    }
    target.set(assignment.operand.clone());
    Ok(true)
}

fn apply_unset(assignment: &UpdateAssignment, document: &mut Value) -> bool {
    assignment.path.find_if_exists(document).remove().is_some()
}

#[derive(Clone, Copy)]
enum Arithmetic {
    Add,
    Multiply,
}

fn apply_arithmetic(
    assignment: &UpdateAssignment,
    document: &mut Value,
    arithmetic: Arithmetic,
) -> Result<bool> {
    let operator = match arithmetic {
        Arithmetic::Add => UpdateOperator::Inc,
        Arithmetic::Multiply => UpdateOperator::Mul,
    };
    let operand = require_number_operand(operator, assignment)?;
    let target = assignment.path.find_or_create(document)?;
    let current = match target.value() {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.clone()),
        Some(other) => return Err(non_numeric_target(operator, &assignment.path, other)),
    };
    let next = match (arithmetic, current) {
        (Arithmetic::Add, None) => operand,
        (Arithmetic::Add, Some(current)) => combine(&current, &operand, f64_add, i64_add)?,
        // Multiplying a missing value follows the convention of seeding
        // with zero.
        (Arithmetic::Multiply, None) => Number::from(0),
        (Arithmetic::Multiply, Some(current)) => combine(&current, &operand, f64_mul, i64_mul)?,
    };
    let next = Value::Number(next);
    if target.value() == Some(&next) {
        return Ok(false);
    }
    target.set(next);
    Ok(true)
}

fn apply_extremum(
    assignment: &UpdateAssignment,
    document: &mut Value,
    keep_when: Ordering,
) -> Result<bool> {
    let operator =
        if keep_when == Ordering::Less { UpdateOperator::Min } else { UpdateOperator::Max };
    let operand = require_number_operand(operator, assignment)?;
    let target = assignment.path.find_or_create(document)?;
    let replace = match target.value() {
        None | Some(Value::Null) => true,
        Some(Value::Number(current)) => compare_numbers(&operand, current)
            .is_some_and(|ordering| ordering == keep_when),
        Some(other) => return Err(non_numeric_target(operator, &assignment.path, other)),
    };
    if !replace {
        return Ok(false);
    }
    target.set(Value::Number(operand));
    Ok(true)
}

fn apply_push(assignment: &UpdateAssignment, document: &mut Value) -> Result<bool> {
    let values = each_values(UpdateOperator::Push, &assignment.operand)?;
    if values.is_empty() {
        return Ok(false);
    }
    let items = array_target(UpdateOperator::Push, assignment, document)?;
    items.extend(values);
    Ok(true)
}

fn apply_add_to_set(assignment: &UpdateAssignment, document: &mut Value) -> Result<bool> {
    let values = each_values(UpdateOperator::AddToSet, &assignment.operand)?;
    if values.is_empty() {
        return Ok(false);
    }
    let items = array_target(UpdateOperator::AddToSet, assignment, document)?;
    let mut modified = false;
    for value in values {
        if !items.contains(&value) {
            items.push(value);
            modified = true;
        }
    }
    Ok(modified)
}

fn apply_pop(assignment: &UpdateAssignment, document: &mut Value) -> Result<bool> {
    let from_front = match assignment.operand.as_i64() {
        Some(1) => false,
        Some(-1) => true,
        _ => {
            return Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperation,
                "$pop requires 1 (last) or -1 (first) as parameter",
            ))
        }
    };
    let target = assignment.path.find_if_exists(document);
    match target.value() {
        None | Some(Value::Null) => return Ok(false),
        Some(Value::Array(_)) => {}
        Some(other) => return Err(non_array_target(UpdateOperator::Pop, &assignment.path, other)),
    }
    let Some(Value::Array(items)) = target_value_mut(target) else { return Ok(false) };
    if items.is_empty() {
        return Ok(false);
    }
    if from_front {
        items.remove(0);
    } else {
        items.pop();
    }
    Ok(true)
}

fn apply_rename(assignment: &UpdateAssignment, document: &mut Value) -> Result<bool> {
    let target_path = rename_target(assignment)?;
    let Some(value) = assignment.path.find_if_exists(document).remove() else {
        return Ok(false);
    };
    target_path.find_or_create(document)?.set(value);
    Ok(true)
}

fn rename_target(assignment: &UpdateAssignment) -> Result<DotPath> {
    let target = assignment.operand.as_str().ok_or_else(|| {
        ApiError::with_detail(
            ErrorCode::UnsupportedUpdateOperation,
            "$rename requires a STRING target path",
        )
    })?;
    let target = DotPath::parse(target)?;
    if target == assignment.path {
        return Err(ApiError::with_detail(
            ErrorCode::UnsupportedUpdateOperation,
            format!("$rename source and target are the same path '{target}'"),
        ));
    }
    Ok(target)
}

/// `$push`/`$addToSet` operands: a plain value, or `{"$each": [...]}`.
fn each_values(operator: UpdateOperator, operand: &Value) -> Result<Vec<Value>> {
    let Some(map) = operand.as_object() else { return Ok(vec![operand.clone()]) };
    let Some(each) = map.get("$each") else {
        if map.keys().any(|key| key.starts_with('$')) {
            return Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperation,
                format!("unsupported modifier for {}", operator.as_str()),
            ));
        }
        return Ok(vec![operand.clone()]);
    };
    if map.len() > 1 {
        return Err(ApiError::with_detail(
            ErrorCode::UnsupportedUpdateOperation,
            format!("{} with $each accepts no other modifiers", operator.as_str()),
        ));
    }
    each.as_array().cloned().ok_or_else(|| {
        ApiError::with_detail(
            ErrorCode::UnsupportedUpdateOperation,
            format!("{} $each requires an ARRAY", operator.as_str()),
        )
    })
}

/// Resolve the target of an array-appending operator, creating an empty
/// array at a missing path.
fn array_target<'a>(
    operator: UpdateOperator,
    assignment: &UpdateAssignment,
    document: &'a mut Value,
) -> Result<&'a mut Vec<Value>> {
    {
        let target = assignment.path.find_or_create(document)?;
        let seed = match target.value() {
            None | Some(Value::Null) => true,
            Some(Value::Array(_)) => false,
            Some(other) => return Err(non_array_target(operator, &assignment.path, other)),
        };
        if seed {
            target.set(Value::Array(Vec::new()));
        }
    }
    // Re-resolve for a direct handle on the (possibly fresh) array.
    match target_value_mut(assignment.path.find_if_exists(document)) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ApiError::new(ErrorCode::InternalServerError)),
    }
}

/// Mutable access to the matched value, if present.
fn target_value_mut(target: PathMatch<'_>) -> Option<&mut Value> {
    match target {
        PathMatch::ViaObject { parent, key } => parent.get_mut(&key),
        PathMatch::ViaArray { parent, index } => parent.get_mut(index),
        PathMatch::Missing => None,
    }
}

fn require_number_operand(operator: UpdateOperator, assignment: &UpdateAssignment) -> Result<Number> {
    match &assignment.operand {
        Value::Number(n) => Ok(n.clone()),
        other => Err(ApiError::with_detail(
            ErrorCode::UnsupportedUpdateOperation,
            format!(
                "{} requires a numeric parameter, got {}",
                operator.as_str(),
                shale_core::json::node_type_name(other)
            ),
        )),
    }
}

fn non_numeric_target(operator: UpdateOperator, path: &DotPath, value: &Value) -> ApiError {
    ApiError::with_detail(
        ErrorCode::UnsupportedUpdateOperation,
        format!(
            "{} requires the target of path '{path}' to be numeric, got {}",
            operator.as_str(),
            shale_core::json::node_type_name(value)
        ),
    )
}

fn non_array_target(operator: UpdateOperator, path: &DotPath, value: &Value) -> ApiError {
    ApiError::with_detail(
        ErrorCode::UnsupportedUpdateOperation,
        format!(
            "{} requires the target of path '{path}' to be an ARRAY, got {}",
            operator.as_str(),
            shale_core::json::node_type_name(value)
        ),
    )
}

fn combine(
    a: &Number,
    b: &Number,
    float_op: fn(f64, f64) -> f64,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Ok(Number::from(result));
        }
    }
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Err(ApiError::new(ErrorCode::InternalServerError));
    };
    Number::from_f64(float_op(x, y)).ok_or_else(|| {
        ApiError::with_detail(
            ErrorCode::UnsupportedUpdateOperation,
            "numeric update produced a non-finite value",
        )
    })
}

fn f64_add(a: f64, b: f64) -> f64 {
    a + b
}

fn f64_mul(a: f64, b: f64) -> f64 {
    a * b
}

fn i64_add(a: i64, b: i64) -> Option<i64> {
    a.checked_add(b)
}

fn i64_mul(a: i64, b: i64) -> Option<i64> {
    a.checked_mul(b)
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn clause(raw: Value) -> UpdateClause {
        UpdateClause::from_json(&raw).unwrap()
    }

    #[test]
    fn set_creates_and_overwrites() {
        let mut doc = json!({"_id": 1, "a": 1});
        let modified =
            apply_update(&clause(json!({"$set": {"a": 2, "b.c": true}})), &mut doc, false).unwrap();
        assert!(modified);
        assert_eq!(doc, json!({"_id": 1, "a": 2, "b": {"c": true}}));
    }

    #[test]
    fn set_same_value_is_not_a_modification() {
        let mut doc = json!({"_id": 1, "a": 1});
        let modified = apply_update(&clause(json!({"$set": {"a": 1}})), &mut doc, false).unwrap();
        assert!(!modified);
    }

    #[test]
    fn unset_removes_property() {
        let mut doc = json!({"_id": 1, "a": 1, "b": 2});
        let modified = apply_update(&clause(json!({"$unset": {"a": ""}})), &mut doc, false).unwrap();
        assert!(modified);
        assert_eq!(doc, json!({"_id": 1, "b": 2}));
        // Unsetting again is a no-op.
        assert!(!apply_update(&clause(json!({"$unset": {"a": ""}})), &mut doc, false).unwrap());
    }

    #[test]
    fn inc_adds_and_seeds() {
        let mut doc = json!({"_id": 1, "n": 5});
        apply_update(&clause(json!({"$inc": {"n": 3, "fresh": 2}})), &mut doc, false).unwrap();
        assert_eq!(doc, json!({"_id": 1, "n": 8, "fresh": 2}));
    }

    #[test]
    fn inc_rejects_non_numeric_target() {
        let mut doc = json!({"_id": 1, "s": "x"});
        let err = apply_update(&clause(json!({"$inc": {"s": 1}})), &mut doc, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
        assert!(err.message.contains("$inc"), "{}", err.message);
    }

    #[test]
    fn inc_rejects_non_numeric_operand() {
        let mut doc = json!({"_id": 1});
        let err = apply_update(&clause(json!({"$inc": {"n": "1"}})), &mut doc, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
    }

    #[test]
    fn mul_seeds_missing_with_zero() {
        let mut doc = json!({"_id": 1, "n": 4});
        apply_update(&clause(json!({"$mul": {"n": 2.5, "fresh": 3}})), &mut doc, false).unwrap();
        assert_eq!(doc, json!({"_id": 1, "n": 10.0, "fresh": 0}));
    }

    #[test]
    fn min_max_replace_only_when_beyond() {
        let mut doc = json!({"_id": 1, "lo": 5, "hi": 5});
        let modified = apply_update(
            &clause(json!({"$min": {"lo": 3}, "$max": {"hi": 9}})),
            &mut doc,
            false,
        )
        .unwrap();
        assert!(modified);
        assert_eq!(doc, json!({"_id": 1, "lo": 3, "hi": 9}));

        let modified = apply_update(
            &clause(json!({"$min": {"lo": 4}, "$max": {"hi": 2}})),
            &mut doc,
            false,
        )
        .unwrap();
        assert!(!modified);
    }

    #[test]
    fn push_appends_and_creates() {
        let mut doc = json!({"_id": 1, "tags": ["a"]});
        apply_update(
            &clause(json!({"$push": {"tags": "b", "fresh": 1}})),
            &mut doc,
            false,
        )
        .unwrap();
        assert_eq!(doc, json!({"_id": 1, "tags": ["a", "b"], "fresh": [1]}));
    }

    #[test]
    fn push_each_appends_all() {
        let mut doc = json!({"_id": 1, "tags": []});
        apply_update(&clause(json!({"$push": {"tags": {"$each": [1, 2]}}})), &mut doc, false)
            .unwrap();
        assert_eq!(doc, json!({"_id": 1, "tags": [1, 2]}));
    }

    #[test]
    fn push_rejects_non_array_target() {
        let mut doc = json!({"_id": 1, "s": "x"});
        let err = apply_update(&clause(json!({"$push": {"s": 1}})), &mut doc, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
        assert!(err.message.contains("ARRAY"), "{}", err.message);
    }

    #[test]
    fn add_to_set_deduplicates() {
        let mut doc = json!({"_id": 1, "tags": ["a"]});
        let modified =
            apply_update(&clause(json!({"$addToSet": {"tags": "a"}})), &mut doc, false).unwrap();
        assert!(!modified);
        let modified =
            apply_update(&clause(json!({"$addToSet": {"tags": "b"}})), &mut doc, false).unwrap();
        assert!(modified);
        assert_eq!(doc, json!({"_id": 1, "tags": ["a", "b"]}));
    }

    #[test]
    fn pop_front_and_back() {
        let mut doc = json!({"_id": 1, "tags": [1, 2, 3]});
        apply_update(&clause(json!({"$pop": {"tags": -1}})), &mut doc, false).unwrap();
        assert_eq!(doc, json!({"_id": 1, "tags": [2, 3]}));
        apply_update(&clause(json!({"$pop": {"tags": 1}})), &mut doc, false).unwrap();
        assert_eq!(doc, json!({"_id": 1, "tags": [2]}));
        // Missing target is a no-op.
        assert!(!apply_update(&clause(json!({"$pop": {"gone": 1}})), &mut doc, false).unwrap());
    }

    #[test]
    fn rename_moves_value() {
        let mut doc = json!({"_id": 1, "old": {"x": 1}});
        apply_update(&clause(json!({"$rename": {"old": "fresh.spot"}})), &mut doc, false).unwrap();
        assert_eq!(doc, json!({"_id": 1, "fresh": {"spot": {"x": 1}}}));
    }

    #[test]
    fn rename_missing_source_is_noop() {
        let mut doc = json!({"_id": 1});
        assert!(!apply_update(&clause(json!({"$rename": {"a": "b"}})), &mut doc, false).unwrap());
    }

    #[test]
    fn set_on_insert_applies_only_on_insert() {
        let mut doc = json!({"_id": 1});
        let modified = apply_update(
            &clause(json!({"$setOnInsert": {"created": true}})),
            &mut doc,
            false,
        )
        .unwrap();
        assert!(!modified);
        assert_eq!(doc, json!({"_id": 1}));

        let modified = apply_update(
            &clause(json!({"$setOnInsert": {"created": true}})),
            &mut doc,
            true,
        )
        .unwrap();
        assert!(modified);
        assert_eq!(doc, json!({"_id": 1, "created": true}));
    }

    #[test]
    fn overlapping_locators_rejected() {
        let mut doc = json!({"_id": 1});
        let err = apply_update(
            &clause(json!({"$set": {"a.b": 1}, "$inc": {"a": 1}})),
            &mut doc,
            false,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperationPath);
        assert!(err.message.contains("'a'"), "{}", err.message);
        assert!(err.message.contains("'a.b'"), "{}", err.message);
    }

    #[test]
    fn sibling_locators_allowed() {
        let mut doc = json!({"_id": 1});
        apply_update(&clause(json!({"$set": {"a.b": 1, "a.c": 2}})), &mut doc, false).unwrap();
        assert_eq!(doc, json!({"_id": 1, "a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn document_id_is_immutable() {
        let mut doc = json!({"_id": 1});
        for update in [
            json!({"$set": {"_id": 2}}),
            json!({"$unset": {"_id": ""}}),
            json!({"$rename": {"a": "_id"}}),
        ] {
            let err = apply_update(&clause(update), &mut doc, false).unwrap_err();
            assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
        }
    }
}
