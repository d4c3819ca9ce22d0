//! Leaf types shared across the ersatzlite crates: the five-way value cell
//! with its documented coercion rules, and the generic monotonic handle
//! table that stands in for native pointers.

pub mod handle;
pub mod value;

pub use handle::HandleTable;
pub use value::{format_double, InvalidConversion, Value, ValueKind};
