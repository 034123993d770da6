//! Application layer of the bazaar data access stack.
//!
//! Composes the core domain types and infrastructure adapters into the
//! services an application holds for its lifetime:
//!
//! - [`SessionTokenManager`]: keeps the identity token fresh
//! - [`RecordStore`]: authenticated record access with one refresh-and-retry
//! - [`AmendmentService`]: propose, review and resolve record changes
//! - [`DataServices`]: builds and tears down all of the above

pub mod amendment_service;
pub mod record_store;
pub mod services;
pub mod token_manager;

pub use amendment_service::AmendmentService;
pub use record_store::{RecordStore, Subscription};
pub use services::DataServices;
pub use token_manager::{SessionTokenManager, compute_refresh_delay};
