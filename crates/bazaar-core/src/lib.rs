//! Domain layer for Bazaar.
//!
//! Holds the types, traits and pure logic shared by the infrastructure and
//! application crates: sessions and credentials, collection schemas,
//! records and their change events, query composition, field diffs and
//! amendments.

pub mod amendment;
pub mod config;
pub mod diff;
pub mod error;
pub mod listener;
pub mod query;
pub mod record;
pub mod schema;
pub mod session;

// Re-export common error type
pub use error::{BazaarError, ErrorKind, Result};
