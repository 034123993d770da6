//! Collection schemas.
//!
//! A schema is the ordered list of field descriptors for a collection or
//! view. Declaration order is significant: diffs are reported in it.

mod model;

pub use model::{CollectionSchema, FieldDescriptor, FieldKind, ID_FIELD};
