//! ersatzlite: an embedded connection broker emulating a handle-based
//! native SQLite binding.
//!
//! Connections, prepared statements, and cursor windows are addressed by
//! opaque `i64` handles issued from monotonic registries. Each connection
//! owns a dedicated worker thread; all engine work for that connection runs
//! there, so concurrent callers of one handle serialize while distinct
//! connections proceed in parallel. Query results are materialized whole
//! into in-memory cursor windows with typed, coercing reads.
//!
//! The three layers live in their own crates and are re-exported here:
//! [`ErsatzError`] (the closed error taxonomy), [`Value`] and friends (value
//! cells and coercions), and [`WindowStore`] (cursor windows). This crate
//! adds the [`Broker`] tying them to the engine.

pub mod broker;
mod engine;
pub mod worker;

pub use broker::{Broker, IGNORED_REINDEX_STATEMENT, IN_MEMORY_PATH};
pub use engine::rewrite_localized_collators;
pub use ersatzlite_error::{
    code_mnemonic, codes, format_engine_message, translate_engine_error, ErsatzError, Result,
};
pub use ersatzlite_types::{format_double, HandleTable, Value, ValueKind};
pub use ersatzlite_window::{Window, WindowStore};
