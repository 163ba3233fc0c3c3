//! Command clauses: filter, update and sort.

mod filter;
mod sort;
mod update;

pub use filter::{ComparisonExpression, FilterClause, FilterOperation, FilterOperator};
pub use sort::{SortClause, SortExpression, VECTOR_SORT_FIELD};
pub use update::{UpdateAssignment, UpdateClause, UpdateOperation, UpdateOperator};
