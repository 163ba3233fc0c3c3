//! Filter clause parsing.
//!
//! A filter clause is a JSON object whose entries are either the shorthand
//! `{field: value}` (equality) or an operator object
//! `{field: {"$gt": 10, "$lt": 50}}`. Entries combine with implicit AND.

use serde_json::Value;

use shale_core::{ApiError, DotPath, ErrorCode, Result};

/// A comparison operator inside a filter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// `$eq` - equality, also the shorthand form.
    Eq,
    /// `$ne` - negated equality, evaluated post-read.
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$in` - membership in an array field.
    In,
    /// `$all` - array field contains all operands.
    All,
    /// `$size` - array length equality.
    Size,
    /// `$exists` - path presence or absence.
    Exists,
}

impl FilterOperator {
    /// Parse a `$`-prefixed operator name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "$eq" => Ok(Self::Eq),
            "$ne" => Ok(Self::Ne),
            "$gt" => Ok(Self::Gt),
            "$gte" => Ok(Self::Gte),
            "$lt" => Ok(Self::Lt),
            "$lte" => Ok(Self::Lte),
            "$in" => Ok(Self::In),
            "$all" => Ok(Self::All),
            "$size" => Ok(Self::Size),
            "$exists" => Ok(Self::Exists),
            other => Err(ApiError::with_detail(
                ErrorCode::UnsupportedFilterOperation,
                format!("unsupported filter operator '{other}'"),
            )),
        }
    }
}

/// One operator applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOperation {
    /// The operator.
    pub operator: FilterOperator,
    /// The operand value, validated per operator.
    pub operand: Value,
}

/// All predicates on a single field path.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonExpression {
    /// The field path.
    pub path: DotPath,
    /// The predicates, ANDed together.
    pub operations: Vec<FilterOperation>,
}

/// A parsed filter clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterClause {
    /// Per-field predicate groups, ANDed together.
    pub expressions: Vec<ComparisonExpression>,
}

impl FilterClause {
    /// Parse a filter clause from its JSON form.
    ///
    /// # Errors
    ///
    /// `UNSUPPORTED_FILTER_DATA_TYPE` when the clause is not an object or an
    /// operand has an invalid type, `UNSUPPORTED_FILTER_OPERATION` for
    /// unknown `$` operators.
    pub fn from_json(value: &Value) -> Result<Self> {
        let entries = value.as_object().ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::UnsupportedFilterDataType,
                format!("filter clause must be a JSON Object, got {}", shale_core::json::node_type_name(value)),
            )
        })?;

        let mut expressions = Vec::with_capacity(entries.len());
        for (field, entry) in entries {
            let path = DotPath::parse(field)?;
            let operations = match entry {
                // A date wrapper is a value, not an operator object.
                Value::Object(fields) if !fields.is_empty() && !is_date_wrapper(entry) => {
                    match operator_operations(fields)? {
                        Some(operations) => operations,
                        // Not an operator object after all: the whole value
                        // is sub-document equality.
                        None => vec![equality(entry)],
                    }
                }
                // Shorthand equality.
                other => vec![equality(other)],
            };
            expressions.push(ComparisonExpression { path, operations });
        }
        Ok(Self { expressions })
    }

    /// True when the clause has no predicates (matches everything).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

fn equality(operand: &Value) -> FilterOperation {
    FilterOperation { operator: FilterOperator::Eq, operand: operand.clone() }
}

/// Interpret an entry value as an operator object.
///
/// Commits only when every key resolves as an operator: a key that fails to
/// resolve and does not start with `$` turns the whole entry into
/// sub-document equality (`None`, discarding any operators already seen),
/// while an unresolvable `$` key is an error.
fn operator_operations(
    fields: &serde_json::Map<String, Value>,
) -> Result<Option<Vec<FilterOperation>>> {
    let mut operations = Vec::with_capacity(fields.len());
    for (name, operand) in fields {
        let operator = match FilterOperator::parse(name) {
            Ok(operator) => operator,
            Err(err) if name.starts_with('$') => return Err(err),
            Err(_) => return Ok(None),
        };
        validate_operand(operator, operand)?;
        operations.push(FilterOperation { operator, operand: operand.clone() });
    }
    Ok(Some(operations))
}

fn validate_operand(operator: FilterOperator, operand: &Value) -> Result<()> {
    let expectation = match operator {
        FilterOperator::In | FilterOperator::All if !operand.is_array() => Some("ARRAY"),
        FilterOperator::Size
            if !operand.as_u64().is_some_and(|n| u32::try_from(n).is_ok()) =>
        {
            Some("non-negative INTEGER")
        }
        FilterOperator::Exists if !operand.is_boolean() => Some("BOOLEAN"),
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
            if !is_comparable(operand) =>
        {
            Some("NUMBER or date")
        }
        _ => None,
    };
    match expectation {
        Some(expected) => Err(ApiError::with_detail(
            ErrorCode::UnsupportedFilterDataType,
            format!(
                "operand for {operator:?} must be {expected}, got {}",
                shale_core::json::node_type_name(operand)
            ),
        )),
        None => Ok(()),
    }
}

/// Range comparisons accept numbers and `{"$date": millis}` wrappers.
fn is_comparable(operand: &Value) -> bool {
    operand.is_number() || is_date_wrapper(operand)
}

fn is_date_wrapper(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.len() == 1
            && map.get(shale_core::shred::DATE_WRAPPER_FIELD).is_some_and(Value::is_i64)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn shorthand_is_equality() {
        let clause = FilterClause::from_json(&json!({"name": "Bob"})).unwrap();
        assert_eq!(clause.expressions.len(), 1);
        assert_eq!(clause.expressions[0].path.to_string(), "name");
        assert_eq!(
            clause.expressions[0].operations,
            vec![FilterOperation { operator: FilterOperator::Eq, operand: json!("Bob") }]
        );
    }

    #[test]
    fn multi_operator_entry() {
        let clause = FilterClause::from_json(&json!({"age": {"$gt": 10, "$lt": 50}})).unwrap();
        let ops = &clause.expressions[0].operations;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].operator, FilterOperator::Gt);
        assert_eq!(ops[1].operator, FilterOperator::Lt);
    }

    #[test]
    fn non_operator_object_is_sub_doc_equality() {
        let clause = FilterClause::from_json(&json!({"size": {"w": 21, "h": 14}})).unwrap();
        let ops = &clause.expressions[0].operations;
        assert_eq!(ops[0].operator, FilterOperator::Eq);
        assert_eq!(ops[0].operand, json!({"w": 21, "h": 14}));
    }

    #[test]
    fn mixed_operator_and_field_falls_back_to_equality() {
        // An operator followed by a plain field is not an operator object;
        // the accumulated operators are discarded.
        let clause = FilterClause::from_json(&json!({"age": {"$gt": 10, "w": 1}})).unwrap();
        let ops = &clause.expressions[0].operations;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operator, FilterOperator::Eq);
        assert_eq!(ops[0].operand, json!({"$gt": 10, "w": 1}));
    }

    #[test]
    fn unknown_operator_rejected() {
        let err = FilterClause::from_json(&json!({"a": {"$regex": "x"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFilterOperation);
        assert!(err.message.contains("$regex"), "{}", err.message);
    }

    #[test]
    fn non_object_clause_rejected() {
        let err = FilterClause::from_json(&json!([1])).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFilterDataType);
    }

    #[test]
    fn in_requires_array() {
        let err = FilterClause::from_json(&json!({"a": {"$in": 3}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFilterDataType);
        assert!(err.message.contains("ARRAY"), "{}", err.message);
    }

    #[test]
    fn size_requires_non_negative_integer() {
        assert!(FilterClause::from_json(&json!({"a": {"$size": 2}})).is_ok());
        for bad in [json!({"a": {"$size": -1}}), json!({"a": {"$size": 1.5}})] {
            let err = FilterClause::from_json(&bad).unwrap_err();
            assert_eq!(err.code, ErrorCode::UnsupportedFilterDataType);
        }
    }

    #[test]
    fn exists_requires_boolean() {
        let err = FilterClause::from_json(&json!({"a": {"$exists": "yes"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFilterDataType);
    }

    #[test]
    fn range_accepts_dates() {
        let clause =
            FilterClause::from_json(&json!({"created": {"$gte": {"$date": 1000}}})).unwrap();
        assert_eq!(clause.expressions[0].operations[0].operator, FilterOperator::Gte);
    }

    #[test]
    fn empty_clause_matches_everything() {
        assert!(FilterClause::from_json(&json!({})).unwrap().is_empty());
    }
}
