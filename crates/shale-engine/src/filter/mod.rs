//! Filter resolution: from parsed clauses to store-side predicates.
//!
//! A [`DbFilter`] binds one predicate to the shredded column that serves it.
//! Every filter carries two evaluations that must agree: the CQL conditions
//! pushed down to the store ([`DbFilter::conditions`]) and an in-memory
//! check over `doc_json` ([`DbFilter::matches`]). Predicates with no
//! pushdown form (`$ne`, `$exists: false`, structured equality, multi-value
//! `$in`) are applied post-read.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use shale_core::shred::{array_contains_entry, DATE_WRAPPER_FIELD};
use shale_core::{DocumentId, DotPath, ErrorCode, Result, DOC_ID_FIELD};

use crate::command::clause::{FilterClause, FilterOperator};
use crate::executor::CqlValue;

/// A comparison direction for range predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeComparison {
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
}

impl RangeComparison {
    const fn as_cql(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// One predicate bound to a shredded column.
#[derive(Debug, Clone, PartialEq)]
pub enum DbFilter {
    /// `_id` equality; binds to the primary key.
    IdEquals(DocumentId),
    /// `_id` membership; binds to the primary key.
    IdIn(Vec<DocumentId>),
    /// String equality via `query_text_values`.
    TextEquals {
        /// Field path.
        path: DotPath,
        /// Expected value.
        value: String,
    },
    /// Boolean equality via `query_bool_values`.
    BoolEquals {
        /// Field path.
        path: DotPath,
        /// Expected value.
        value: bool,
    },
    /// Numeric equality via `query_dbl_values`.
    NumberEquals {
        /// Field path.
        path: DotPath,
        /// Expected value.
        value: Number,
    },
    /// Timestamp equality via `query_timestamp_values`.
    TimestampEquals {
        /// Field path.
        path: DotPath,
        /// Epoch milliseconds.
        value: i64,
    },
    /// Null match via `query_null_values`.
    NullEquals {
        /// Field path.
        path: DotPath,
    },
    /// Deep equality against an object or array value; post-read.
    StructuredEquals {
        /// Field path.
        path: DotPath,
        /// Expected value.
        value: Value,
    },
    /// Numeric range via `query_dbl_values`.
    NumberRange {
        /// Field path.
        path: DotPath,
        /// Direction.
        cmp: RangeComparison,
        /// Bound.
        value: Number,
    },
    /// Timestamp range via `query_timestamp_values`.
    TimestampRange {
        /// Field path.
        path: DotPath,
        /// Direction.
        cmp: RangeComparison,
        /// Bound, epoch milliseconds.
        value: i64,
    },
    /// `$in`: any operand present in the array at the path, via
    /// `array_contains`. Pushed down only for a single operand; the union
    /// of several memberships is applied post-read.
    ArrayContainsAny {
        /// Field path.
        path: DotPath,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// `$all`: every operand present in the array at the path; each
    /// membership is one `array_contains` condition.
    ArrayContainsAll {
        /// Field path.
        path: DotPath,
        /// Required values.
        values: Vec<Value>,
    },
    /// `$size` via `array_size`.
    SizeEquals {
        /// Field path.
        path: DotPath,
        /// Expected element count.
        size: u32,
    },
    /// `$exists: true` via `exist_keys`.
    Exists {
        /// Field path.
        path: DotPath,
    },
    /// `$exists: false`; post-read.
    NotExists {
        /// Field path.
        path: DotPath,
    },
    /// `$ne`: negation of the wrapped equality; post-read.
    Ne(Box<DbFilter>),
}

impl DbFilter {
    /// The CQL conditions this predicate pushes down, possibly none.
    #[must_use]
    pub fn conditions(&self) -> Vec<(String, Vec<CqlValue>)> {
        match self {
            Self::IdEquals(id) => {
                vec![("key = ?".to_owned(), vec![id_tuple(id)])]
            }
            Self::IdIn(ids) => {
                if ids.is_empty() {
                    return Vec::new();
                }
                let markers = vec!["?"; ids.len()].join(", ");
                vec![(format!("key IN ({markers})"), ids.iter().map(id_tuple).collect())]
            }
            Self::TextEquals { path, value } => vec![(
                "query_text_values[?] = ?".to_owned(),
                vec![CqlValue::Text(path.to_string()), CqlValue::Text(value.clone())],
            )],
            Self::BoolEquals { path, value } => vec![(
                "query_bool_values[?] = ?".to_owned(),
                vec![CqlValue::Text(path.to_string()), CqlValue::TinyInt(i8::from(*value))],
            )],
            Self::NumberEquals { path, value } => vec![(
                "query_dbl_values[?] = ?".to_owned(),
                vec![CqlValue::Text(path.to_string()), CqlValue::Decimal(value.to_string())],
            )],
            Self::TimestampEquals { path, value } => vec![(
                "query_timestamp_values[?] = ?".to_owned(),
                vec![CqlValue::Text(path.to_string()), CqlValue::Timestamp(*value)],
            )],
            Self::NullEquals { path } => vec![(
                "query_null_values CONTAINS ?".to_owned(),
                vec![CqlValue::Text(path.to_string())],
            )],
            Self::NumberRange { path, cmp, value } => vec![(
                format!("query_dbl_values[?] {} ?", cmp.as_cql()),
                vec![CqlValue::Text(path.to_string()), CqlValue::Decimal(value.to_string())],
            )],
            Self::TimestampRange { path, cmp, value } => vec![(
                format!("query_timestamp_values[?] {} ?", cmp.as_cql()),
                vec![CqlValue::Text(path.to_string()), CqlValue::Timestamp(*value)],
            )],
            Self::ArrayContainsAny { path, values } => match values.as_slice() {
                [single] => vec![(
                    "array_contains CONTAINS ?".to_owned(),
                    vec![CqlValue::Text(array_contains_entry(path, single))],
                )],
                _ => Vec::new(),
            },
            Self::ArrayContainsAll { path, values } => values
                .iter()
                .map(|value| {
                    (
                        "array_contains CONTAINS ?".to_owned(),
                        vec![CqlValue::Text(array_contains_entry(path, value))],
                    )
                })
                .collect(),
            Self::SizeEquals { path, size } => vec![(
                "array_size[?] = ?".to_owned(),
                vec![CqlValue::Text(path.to_string()), CqlValue::Int(*size as i32)],
            )],
            Self::Exists { path } => vec![(
                "exist_keys CONTAINS ?".to_owned(),
                vec![CqlValue::Text(path.to_string())],
            )],
            Self::StructuredEquals { .. } | Self::NotExists { .. } | Self::Ne(_) => Vec::new(),
        }
    }

    /// True when this predicate must be re-checked after the read.
    #[must_use]
    pub fn needs_post_read(&self) -> bool {
        match self {
            Self::Ne(_) | Self::NotExists { .. } | Self::StructuredEquals { .. } => true,
            Self::ArrayContainsAny { values, .. } => values.len() != 1,
            _ => false,
        }
    }

    /// Evaluate this predicate over a materialized document.
    ///
    /// This mirrors the store-side semantics exactly: for any document, a
    /// predicate's pushed-down conditions accept the document's row iff
    /// `matches` accepts `doc_json`.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::IdEquals(id) => document_id(document).is_some_and(|actual| actual == *id),
            Self::IdIn(ids) => {
                document_id(document).is_some_and(|actual| ids.contains(&actual))
            }
            Self::TextEquals { path, value } => {
                matches!(path.find_value(document), Some(Value::String(s)) if s == value)
            }
            Self::BoolEquals { path, value } => {
                matches!(path.find_value(document), Some(Value::Bool(b)) if b == value)
            }
            Self::NumberEquals { path, value } => match path.find_value(document) {
                Some(Value::Number(actual)) => {
                    compare_numbers(actual, value) == Some(Ordering::Equal)
                }
                _ => false,
            },
            Self::TimestampEquals { path, value } => {
                date_at(path, document).is_some_and(|millis| millis == *value)
            }
            Self::NullEquals { path } => {
                matches!(path.find_value(document), Some(Value::Null))
            }
            Self::StructuredEquals { path, value } => {
                path.find_value(document).is_some_and(|actual| actual == value)
            }
            Self::NumberRange { path, cmp, value } => match path.find_value(document) {
                Some(Value::Number(actual)) => {
                    compare_numbers(actual, value).is_some_and(|o| cmp.accepts(o))
                }
                _ => false,
            },
            Self::TimestampRange { path, cmp, value } => date_at(path, document)
                .is_some_and(|millis| cmp.accepts(millis.cmp(value))),
            Self::ArrayContainsAny { path, values } => array_entries(path, document)
                .is_some_and(|entries| {
                    values
                        .iter()
                        .any(|value| entries.contains(&array_contains_entry(path, value)))
                }),
            Self::ArrayContainsAll { path, values } => array_entries(path, document)
                .is_some_and(|entries| {
                    values
                        .iter()
                        .all(|value| entries.contains(&array_contains_entry(path, value)))
                }),
            Self::SizeEquals { path, size } => {
                matches!(path.find_value(document), Some(Value::Array(items)) if items.len() == *size as usize)
            }
            Self::Exists { path } => path.find_value(document).is_some(),
            Self::NotExists { path } => path.find_value(document).is_none(),
            Self::Ne(inner) => !inner.matches(document),
        }
    }
}

/// Resolve a parsed filter clause into column-bound predicates.
pub fn resolve_filter(clause: &FilterClause) -> Result<Vec<DbFilter>> {
    let mut filters = Vec::new();
    for expression in &clause.expressions {
        let path = &expression.path;
        for operation in &expression.operations {
            let filter = match operation.operator {
                FilterOperator::Eq => equality_filter(path, &operation.operand)?,
                FilterOperator::Ne => {
                    DbFilter::Ne(Box::new(equality_filter(path, &operation.operand)?))
                }
                FilterOperator::Gt => range_filter(path, RangeComparison::Gt, &operation.operand)?,
                FilterOperator::Gte => {
                    range_filter(path, RangeComparison::Gte, &operation.operand)?
                }
                FilterOperator::Lt => range_filter(path, RangeComparison::Lt, &operation.operand)?,
                FilterOperator::Lte => {
                    range_filter(path, RangeComparison::Lte, &operation.operand)?
                }
                FilterOperator::In => {
                    let values = operand_array(&operation.operand);
                    if path.is_document_id() {
                        let ids = values
                            .iter()
                            .map(DocumentId::from_json)
                            .collect::<Result<Vec<_>>>()?;
                        DbFilter::IdIn(ids)
                    } else {
                        DbFilter::ArrayContainsAny { path: path.clone(), values }
                    }
                }
                FilterOperator::All => DbFilter::ArrayContainsAll {
                    path: path.clone(),
                    values: operand_array(&operation.operand),
                },
                FilterOperator::Size => DbFilter::SizeEquals {
                    path: path.clone(),
                    // Operand validated at clause parse time.
                    size: operation.operand.as_u64().unwrap_or_default() as u32,
                },
                FilterOperator::Exists => {
                    if operation.operand.as_bool() == Some(false) {
                        DbFilter::NotExists { path: path.clone() }
                    } else {
                        DbFilter::Exists { path: path.clone() }
                    }
                }
            };
            filters.push(filter);
        }
    }
    Ok(filters)
}

/// True iff every predicate accepts the document.
#[must_use]
pub fn matches_all(filters: &[DbFilter], document: &Value) -> bool {
    filters.iter().all(|filter| filter.matches(document))
}

/// Collect the pushdown conditions of a predicate set and report whether any
/// predicate needs a post-read pass.
#[must_use]
pub fn split_conditions(filters: &[DbFilter]) -> (Vec<(String, Vec<CqlValue>)>, bool) {
    let mut conditions = Vec::new();
    let mut post_read = false;
    for filter in filters {
        conditions.extend(filter.conditions());
        post_read |= filter.needs_post_read();
    }
    (conditions, post_read)
}

fn equality_filter(path: &DotPath, operand: &Value) -> Result<DbFilter> {
    if path.is_document_id() {
        return Ok(DbFilter::IdEquals(DocumentId::from_json(operand).map_err(|err| {
            shale_core::ApiError::with_message(ErrorCode::UnsupportedFilterDataType, err.message)
        })?));
    }
    Ok(match operand {
        Value::Null => DbFilter::NullEquals { path: path.clone() },
        Value::Bool(b) => DbFilter::BoolEquals { path: path.clone(), value: *b },
        Value::Number(n) => DbFilter::NumberEquals { path: path.clone(), value: n.clone() },
        Value::String(s) => DbFilter::TextEquals { path: path.clone(), value: s.clone() },
        Value::Object(map) => match date_millis(map) {
            Some(millis) => DbFilter::TimestampEquals { path: path.clone(), value: millis },
            None => DbFilter::StructuredEquals { path: path.clone(), value: operand.clone() },
        },
        Value::Array(_) => DbFilter::StructuredEquals { path: path.clone(), value: operand.clone() },
    })
}

fn range_filter(path: &DotPath, cmp: RangeComparison, operand: &Value) -> Result<DbFilter> {
    match operand {
        Value::Number(n) => {
            Ok(DbFilter::NumberRange { path: path.clone(), cmp, value: n.clone() })
        }
        Value::Object(map) => match date_millis(map) {
            Some(millis) => {
                Ok(DbFilter::TimestampRange { path: path.clone(), cmp, value: millis })
            }
            // Operands are validated at clause parse time; reaching here
            // means the clause was built by hand.
            None => Err(shale_core::ApiError::with_detail(
                ErrorCode::UnsupportedFilterDataType,
                "range operand must be a NUMBER or date",
            )),
        },
        _ => Err(shale_core::ApiError::with_detail(
            ErrorCode::UnsupportedFilterDataType,
            "range operand must be a NUMBER or date",
        )),
    }
}

fn operand_array(operand: &Value) -> Vec<Value> {
    operand.as_array().cloned().unwrap_or_default()
}

// Key encoding shared with the write path, so filters and writes can never
// disagree on the `key` column format.
fn id_tuple(id: &DocumentId) -> CqlValue {
    crate::operation::key_tuple(id)
}

fn document_id(document: &Value) -> Option<DocumentId> {
    DocumentId::from_json(document.get(DOC_ID_FIELD)?).ok()
}

fn date_millis(map: &serde_json::Map<String, Value>) -> Option<i64> {
    if map.len() != 1 {
        return None;
    }
    map.get(DATE_WRAPPER_FIELD)?.as_i64()
}

fn date_at(path: &DotPath, document: &Value) -> Option<i64> {
    path.find_value(document)?.as_object().and_then(date_millis)
}

/// The `array_contains` entries of the array at `path`, if the path holds
/// an array.
fn array_entries(path: &DotPath, document: &Value) -> Option<Vec<String>> {
    let items = path.find_value(document)?.as_array()?;
    Some(items.iter().map(|item| array_contains_entry(path, item)).collect())
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}
