//! Core types for Shale, a JSON document API over a wide-column store.
//!
//! This crate carries the pieces every other crate builds on:
//!
//! - [`path`] - dotted-path locators ([`path::DotPath`]) and in-document
//!   resolution ([`path::PathMatch`])
//! - [`shred`] - the shredder, which decomposes a document into the typed
//!   per-path containers backing the index columns
//! - [`docid`] - typed document ids and their `key`-column encoding
//! - [`error`] - the closed error taxonomy surfaced in response envelopes
//! - [`txid`] - time-ordered optimistic-concurrency tokens
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use shale_core::shred::Shredder;
//!
//! let shredded = Shredder::default()
//!     .shred(&json!({"_id": "a", "tags": ["x"]}))
//!     .unwrap();
//! assert!(shredded.array_contains.contains("tags|S|x"));
//! ```

// Deny unwrap in library code; tests may take shortcuts.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod docid;
pub mod error;
pub mod json;
pub mod path;
pub mod shred;
pub mod txid;

pub use docid::DocumentId;
pub use error::{ApiError, ErrorCode, Result};
pub use path::{DotPath, PathMatch, Segment};
pub use shred::{DocumentLimits, Shredder, WritableShreddedDocument};

/// The reserved document id field.
pub const DOC_ID_FIELD: &str = "_id";
