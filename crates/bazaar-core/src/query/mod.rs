//! Query composition.
//!
//! `QueryComposer` turns filter/sort/page state into an immutable `Query`.
//! Identical state always produces an identical plan, so `Query::plan_key`
//! can key caches and memoized reads upstream.
//!
//! # Module Structure
//!
//! - `model`: `Query`, `Filter`, `SortKey`, `Page`
//! - `composer`: `QueryComposer` builder
//! - `eval`: value ordering and in-memory evaluation of a `Query`

mod composer;
mod eval;
mod model;

pub use composer::QueryComposer;
pub use eval::compare_values;
pub use model::{EqualityClause, Filter, Page, Query, SortDirection, SortKey};
