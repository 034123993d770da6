//! Record domain module.
//!
//! # Module Structure
//!
//! - `model`: `Record`, `Fields`/`Patch`, change events
//! - `backend`: `RecordBackend`, the transport seam behind the record store
//! - `live`: `LiveCollection`, caller-side reconciliation of change events

mod backend;
mod live;
mod model;

pub use backend::{EventSink, RecordBackend, WatchHandle};
pub use live::LiveCollection;
pub use model::{ChangeKind, Fields, Patch, Record, RecordEvent};
