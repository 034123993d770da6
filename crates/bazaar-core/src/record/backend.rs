//! Record backend trait.
//!
//! Defines the transport seam the record store talks through. Every call
//! carries the caller's current token; an implementation rejects a missing or
//! unacceptable token with `PermissionDenied`.

use super::model::{Fields, Patch, Record, RecordEvent};
use crate::error::Result;
use crate::query::Query;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback receiving change events for one watched collection.
pub type EventSink = Arc<dyn Fn(&RecordEvent) + Send + Sync>;

/// An abstract remote record store.
///
/// Collections and views share the read contract; views reject writes.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Reads one record.
    ///
    /// # Returns
    ///
    /// - `Ok(Record)`: record found
    /// - `Err(NotFound)`: no record with that id
    /// - `Err(PermissionDenied)`: token rejected
    async fn read(&self, token: Option<&str>, collection: &str, id: &str) -> Result<Record>;

    /// Executes a query (filters, ordering, page) and returns the page.
    async fn list(&self, token: Option<&str>, query: &Query) -> Result<Vec<Record>>;

    /// Creates a record with a caller-chosen id.
    async fn create(
        &self,
        token: Option<&str>,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<Record>;

    /// Merges `patch` into an existing record and returns the merged record.
    async fn write(
        &self,
        token: Option<&str>,
        collection: &str,
        id: &str,
        patch: &Patch,
    ) -> Result<Record>;

    async fn delete(&self, token: Option<&str>, collection: &str, id: &str) -> Result<()>;

    /// Starts delivering change events of `collection` to `sink`.
    async fn watch(
        &self,
        token: Option<&str>,
        collection: &str,
        sink: EventSink,
    ) -> Result<WatchHandle>;
}

/// Cancels a backend watch. Release is explicit via [`WatchHandle::cancel`].
pub struct WatchHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}
