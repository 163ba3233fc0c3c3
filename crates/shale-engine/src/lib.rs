//! The Shale engine: command pipeline, operation executors and caches.
//!
//! This crate turns JSON command envelopes into parameterized statements
//! against a wide-column store and shapes the answers into the uniform
//! response envelope. The store itself sits behind the
//! [`executor::StoreExecutor`] trait; production wires a driver session in,
//! tests inject [`testing::InMemoryStore`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use shale_engine::command::CommandContext;
//! use shale_engine::config::EngineConfig;
//! use shale_engine::executor::StoreExecutor;
//! use shale_engine::processor::CommandProcessor;
//! use shale_engine::testing::InMemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryStore::with_namespaces(&["app"]);
//! let processor = CommandProcessor::new(
//!     EngineConfig::default(),
//!     Box::new(move |_tenant| Ok(Arc::clone(&store) as Arc<dyn StoreExecutor>)),
//! );
//!
//! let result = processor
//!     .process(
//!         CommandContext::for_namespace("app"),
//!         &json!({"createCollection": {"name": "docs"}}),
//!     )
//!     .await;
//! assert!(result.errors.is_none());
//! # }
//! ```

// Deny unwrap in library code; tests may take shortcuts.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod command;
pub mod config;
pub mod executor;
pub mod filter;
pub mod operation;
pub mod processor;
pub mod resolver;
pub mod result;
pub mod schema;
pub mod testing;
pub mod update;

pub use command::CommandContext;
pub use config::EngineConfig;
pub use processor::CommandProcessor;
pub use result::{CommandError, CommandResult};
