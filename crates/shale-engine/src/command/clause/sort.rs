//! Sort clause parsing.

use serde_json::Value;

use shale_core::{ApiError, DotPath, ErrorCode, Result};

/// The `$vector` sort key routing a read to ANN search.
pub const VECTOR_SORT_FIELD: &str = "$vector";

/// One field ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct SortExpression {
    /// The field path.
    pub path: DotPath,
    /// `true` for `1`, `false` for `-1`.
    pub ascending: bool,
}

/// A parsed sort clause: either field orderings evaluated post-read, or a
/// vector similarity sort pushed down to the ANN index.
#[derive(Debug, Clone, PartialEq)]
pub enum SortClause {
    /// `{"field": 1, "other": -1}`
    Fields(Vec<SortExpression>),
    /// `{"$vector": [0.1, 0.2, ...]}`
    Vector(Vec<f32>),
}

impl SortClause {
    /// Parse a sort clause from its JSON form.
    ///
    /// # Errors
    ///
    /// `UNSUPPORTED_FILTER_DATA_TYPE` when the clause is not an object, an
    /// ordering is not `1`/`-1`, or a `$vector` operand is not a float
    /// array; `$vector` cannot be combined with field orderings.
    pub fn from_json(value: &Value) -> Result<Self> {
        let entries = value.as_object().ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::UnsupportedFilterDataType,
                "sort clause must be a JSON Object",
            )
        })?;

        if let Some(operand) = entries.get(VECTOR_SORT_FIELD) {
            if entries.len() > 1 {
                return Err(ApiError::with_detail(
                    ErrorCode::UnsupportedFilterDataType,
                    "$vector sort cannot be combined with other sort fields",
                ));
            }
            let components = operand
                .as_array()
                .map(|elements| {
                    elements
                        .iter()
                        .map(|e| e.as_f64().map(|f| f as f32))
                        .collect::<Option<Vec<f32>>>()
                })
                .unwrap_or_default()
                .filter(|components| !components.is_empty())
                .ok_or_else(|| {
                    ApiError::with_detail(
                        ErrorCode::UnsupportedFilterDataType,
                        "$vector sort requires a non-empty ARRAY of numbers",
                    )
                })?;
            return Ok(Self::Vector(components));
        }

        let mut expressions = Vec::with_capacity(entries.len());
        for (field, ordering) in entries {
            let ascending = match ordering.as_i64() {
                Some(1) => true,
                Some(-1) => false,
                _ => {
                    return Err(ApiError::with_detail(
                        ErrorCode::UnsupportedFilterDataType,
                        format!("sort ordering for '{field}' must be 1 or -1"),
                    ))
                }
            };
            expressions.push(SortExpression { path: DotPath::parse(field)?, ascending });
        }
        Ok(Self::Fields(expressions))
    }
}
