//! The shredded form of a document.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Number;
use uuid::Uuid;

use crate::docid::DocumentId;
use crate::path::DotPath;

/// One row's worth of index entries, produced by the shredder.
///
/// Every atomic value of the source document appears in exactly one of the
/// `query_*` containers; every materialized path (including intermediate
/// objects, arrays and array indexes) appears in `exist_keys`. `doc_json` is
/// the canonical serialization and the source of truth for reads: reshredding
/// it yields an equal shredded form.
#[derive(Debug, Clone, PartialEq)]
pub struct WritableShreddedDocument {
    /// Typed `_id`; encoded only into the `key` column and `doc_json`.
    pub id: DocumentId,
    /// Fresh optimistic-concurrency token for the write carrying this form.
    pub next_tx_id: Uuid,
    /// Canonical document text: compact, `_id` first, key order preserved.
    pub doc_json: String,
    /// All materialized paths in document encounter order.
    pub doc_field_order: Vec<DotPath>,
    /// All materialized paths; backs `$exists`.
    pub exist_keys: BTreeSet<DotPath>,
    /// Content hash per object-valued path; backs sub-document equality.
    pub sub_doc_equals: BTreeMap<DotPath, String>,
    /// Element count per array-valued path; backs `$size`.
    pub array_size: BTreeMap<DotPath, u32>,
    /// Content hash per array-valued path; backs whole-array equality.
    pub array_equals: BTreeMap<DotPath, String>,
    /// `path|type-tag|value-or-hash` entries; backs `$in`, `$all` and
    /// equality into arrays.
    pub array_contains: BTreeSet<String>,
    /// Boolean leaves.
    pub query_bool_values: BTreeMap<DotPath, bool>,
    /// Numeric leaves, decimal form preserved.
    pub query_number_values: BTreeMap<DotPath, Number>,
    /// String leaves.
    pub query_text_values: BTreeMap<DotPath, String>,
    /// Timestamp leaves (`{"$date": millis}`), epoch milliseconds.
    pub query_timestamp_values: BTreeMap<DotPath, i64>,
    /// Null leaves.
    pub query_null_values: BTreeSet<DotPath>,
    /// The `$vector` field, destined for the ANN column; not indexed
    /// anywhere else.
    pub query_vector_value: Option<Vec<f32>>,
}

impl WritableShreddedDocument {
    pub(super) fn new(id: DocumentId, next_tx_id: Uuid, doc_json: String) -> Self {
        Self {
            id,
            next_tx_id,
            doc_json,
            doc_field_order: Vec::new(),
            exist_keys: BTreeSet::new(),
            sub_doc_equals: BTreeMap::new(),
            array_size: BTreeMap::new(),
            array_equals: BTreeMap::new(),
            array_contains: BTreeSet::new(),
            query_bool_values: BTreeMap::new(),
            query_number_values: BTreeMap::new(),
            query_text_values: BTreeMap::new(),
            query_timestamp_values: BTreeMap::new(),
            query_null_values: BTreeSet::new(),
            query_vector_value: None,
        }
    }

    /// Number of atomic (leaf) entries across the `query_*` containers.
    #[must_use]
    pub fn atomic_field_count(&self) -> usize {
        self.query_bool_values.len()
            + self.query_number_values.len()
            + self.query_text_values.len()
            + self.query_timestamp_values.len()
            + self.query_null_values.len()
    }
}
