//! Amendment domain module.
//!
//! An amendment is a stored, reviewable patch proposal against one record.
//! It is persisted as an ordinary record in [`AMENDMENTS_COLLECTION`].

mod model;

pub use model::{AMENDMENTS_COLLECTION, Amendment, AmendmentDraft, AmendmentStatus, Decision};
