//! Schema-driven field diffs.
//!
//! # Module Structure
//!
//! - `comparator`: one equivalence function per `FieldKind`, plus the
//!   `FieldComparator` trait for custom fields
//! - `engine`: `DiffEngine`, which walks a schema in declaration order

mod comparator;
mod engine;

pub use comparator::FieldComparator;
pub use engine::{DiffEngine, DiffEntry};
