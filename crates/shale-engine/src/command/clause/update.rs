//! Update clause parsing.
//!
//! An update clause maps operator names to assignment objects:
//! `{"$set": {"a.b": 1}, "$unset": {"c": ""}}`. Application lives in
//! [`crate::update`].

use serde_json::Value;

use shale_core::{ApiError, DotPath, ErrorCode, Result};

/// An update operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    /// `$set`
    Set,
    /// `$setOnInsert` - applies only when an upsert inserts.
    SetOnInsert,
    /// `$unset`
    Unset,
    /// `$inc`
    Inc,
    /// `$mul`
    Mul,
    /// `$min`
    Min,
    /// `$max`
    Max,
    /// `$push`
    Push,
    /// `$pop`
    Pop,
    /// `$addToSet`
    AddToSet,
    /// `$rename`
    Rename,
}

impl UpdateOperator {
    /// Parse a `$`-prefixed operator name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "$set" => Ok(Self::Set),
            "$setOnInsert" => Ok(Self::SetOnInsert),
            "$unset" => Ok(Self::Unset),
            "$inc" => Ok(Self::Inc),
            "$mul" => Ok(Self::Mul),
            "$min" => Ok(Self::Min),
            "$max" => Ok(Self::Max),
            "$push" => Ok(Self::Push),
            "$pop" => Ok(Self::Pop),
            "$addToSet" => Ok(Self::AddToSet),
            "$rename" => Ok(Self::Rename),
            other if other.starts_with('$') => Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperation,
                format!("unrecognized update operator '{other}'"),
            )),
            other => Err(ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperation,
                format!("invalid update operator '{other}' (update operators must start with '$')"),
            )),
        }
    }

    /// Operator name with the `$` prefix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::SetOnInsert => "$setOnInsert",
            Self::Unset => "$unset",
            Self::Inc => "$inc",
            Self::Mul => "$mul",
            Self::Min => "$min",
            Self::Max => "$max",
            Self::Push => "$push",
            Self::Pop => "$pop",
            Self::AddToSet => "$addToSet",
            Self::Rename => "$rename",
        }
    }
}

/// One `(locator, operand)` pair under an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAssignment {
    /// Target locator.
    pub path: DotPath,
    /// Operator-specific operand.
    pub operand: Value,
}

/// All assignments of one operator.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    /// The operator.
    pub operator: UpdateOperator,
    /// Assignments in clause order.
    pub assignments: Vec<UpdateAssignment>,
}

/// A parsed update clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateClause {
    /// Operations in clause order.
    pub operations: Vec<UpdateOperation>,
}

impl UpdateClause {
    /// Parse an update clause from its JSON form.
    ///
    /// # Errors
    ///
    /// `UNSUPPORTED_UPDATE_OPERATION` for unknown operators or malformed
    /// assignment objects, `UNSUPPORTED_UPDATE_OPERATION_PATH` for invalid
    /// locators.
    pub fn from_json(value: &Value) -> Result<Self> {
        let entries = value.as_object().ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::UnsupportedUpdateOperation,
                format!(
                    "update clause must be a JSON Object, got {}",
                    shale_core::json::node_type_name(value)
                ),
            )
        })?;

        let mut operations = Vec::with_capacity(entries.len());
        for (name, assignments) in entries {
            let operator = UpdateOperator::parse(name)?;
            let fields = assignments.as_object().ok_or_else(|| {
                ApiError::with_detail(
                    ErrorCode::UnsupportedUpdateOperation,
                    format!("{name} requires a JSON Object of path/value pairs"),
                )
            })?;
            let mut parsed = Vec::with_capacity(fields.len());
            for (field, operand) in fields {
                parsed.push(UpdateAssignment {
                    path: DotPath::parse(field)?,
                    operand: operand.clone(),
                });
            }
            operations.push(UpdateOperation { operator, assignments: parsed });
        }
        Ok(Self { operations })
    }

    /// True when the clause carries no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_multiple_operators() {
        let clause =
            UpdateClause::from_json(&json!({"$set": {"a": 1}, "$unset": {"b": ""}})).unwrap();
        assert_eq!(clause.operations.len(), 2);
        assert_eq!(clause.operations[0].operator, UpdateOperator::Set);
        assert_eq!(clause.operations[1].operator, UpdateOperator::Unset);
        assert_eq!(clause.operations[0].assignments[0].path.to_string(), "a");
    }

    #[test]
    fn unknown_operator_rejected() {
        let err = UpdateClause::from_json(&json!({"$bogus": {"a": 1}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
        assert!(err.message.contains("$bogus"), "{}", err.message);
    }

    #[test]
    fn plain_field_rejected() {
        let err = UpdateClause::from_json(&json!({"a": 1})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
        assert!(err.message.contains("must start with '$'"), "{}", err.message);
    }

    #[test]
    fn non_object_assignments_rejected() {
        let err = UpdateClause::from_json(&json!({"$set": 1})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedUpdateOperation);
    }

    #[test]
    fn dotted_locators_parse() {
        let clause = UpdateClause::from_json(&json!({"$inc": {"stats.views": 2}})).unwrap();
        assert_eq!(clause.operations[0].assignments[0].path.segments().len(), 2);
    }
}
