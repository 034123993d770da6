//! Amendment workflow: propose, review, resolve.
//!
//! An amendment is a stored proposal to patch one parent record. It starts
//! `Waiting` and is resolved exactly once. Approving applies the persisted
//! patch to the parent before the status is written, so a failed parent write
//! leaves the amendment `Waiting`.

use crate::record_store::RecordStore;
use bazaar_core::amendment::{
    AMENDMENTS_COLLECTION, Amendment, AmendmentDraft, AmendmentStatus, Decision,
};
use bazaar_core::diff::{DiffEngine, DiffEntry};
use bazaar_core::error::{BazaarError, Result};
use bazaar_core::query::{QueryComposer, SortDirection};
use bazaar_core::record::{Fields, Patch};
use bazaar_core::schema::CollectionSchema;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AmendmentService {
    store: Arc<RecordStore>,
    engine: DiffEngine,
    // Serializes resolutions within this process.
    resolve_lock: Mutex<()>,
}

impl AmendmentService {
    pub fn new(store: Arc<RecordStore>, engine: DiffEngine) -> Self {
        Self {
            store,
            engine,
            resolve_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &DiffEngine {
        &self.engine
    }

    /// Registers a parent schema with the record store after checking that
    /// every custom field has a comparator.
    pub fn register_schema(&self, schema: CollectionSchema) -> Result<()> {
        self.engine.check_schema(&schema)?;
        self.store.register_schema(schema);
        Ok(())
    }

    /// Field-level diff of two versions of a record of `schema`.
    pub fn diff(
        &self,
        schema: &CollectionSchema,
        old: &Fields,
        new: &Fields,
    ) -> Result<Vec<DiffEntry>> {
        self.engine.diff_schema(schema, old, new)
    }

    /// Stores a new `Waiting` amendment against `parent_table/parent_id`.
    ///
    /// # Returns
    ///
    /// - `Ok(Amendment)`: the stored amendment with its generated id
    /// - `Err(ValidationFailed)`: empty patch, or a patch the parent schema rejects
    pub async fn create_amendment(
        &self,
        parent_table: &str,
        parent_id: &str,
        fields_patch: Patch,
        comments: &str,
        created_by: &str,
    ) -> Result<Amendment> {
        if fields_patch.is_empty() {
            return Err(BazaarError::validation("an amendment needs at least one field"));
        }
        if let Some(schema) = self.store.schema(parent_table) {
            schema.validate_patch(&fields_patch)?;
        }

        let draft = AmendmentDraft {
            parent_table: parent_table.to_string(),
            parent_id: parent_id.to_string(),
            fields_patch,
            comments: comments.to_string(),
            created_by: created_by.to_string(),
        };
        let record = self
            .store
            .create_record(AMENDMENTS_COLLECTION, &draft.into_fields(Utc::now())?)
            .await?;
        let amendment = Amendment::from_record(&record)?;

        tracing::info!(
            "[Amendments] {} proposed changes to {}/{} ({})",
            amendment.created_by,
            amendment.parent_table,
            amendment.parent_id,
            amendment.id
        );
        Ok(amendment)
    }

    /// Diffs `old` against `new` and files the changed fields as an amendment.
    pub async fn propose_changes(
        &self,
        schema: &CollectionSchema,
        parent_id: &str,
        old: &Fields,
        new: &Fields,
        comments: &str,
        created_by: &str,
    ) -> Result<Amendment> {
        let entries = self.engine.diff_schema(schema, old, new)?;
        let patch = DiffEngine::to_patch(&entries);
        if patch.is_empty() {
            return Err(BazaarError::validation("no changes to propose"));
        }
        self.create_amendment(schema.collection(), parent_id, patch, comments, created_by)
            .await
    }

    pub async fn get_amendment(&self, id: &str) -> Result<Amendment> {
        let record = self.store.read_record(AMENDMENTS_COLLECTION, id).await?;
        Amendment::from_record(&record)
    }

    /// Amendments of one parent record, newest first, optionally by status.
    pub async fn list_amendments(
        &self,
        parent_table: &str,
        parent_id: &str,
        status: Option<AmendmentStatus>,
    ) -> Result<Vec<Amendment>> {
        let mut composer = QueryComposer::new(AMENDMENTS_COLLECTION)
            .where_eq("parenttable", parent_table)
            .where_eq("parentid", parent_id)
            .sort_by("createdat", SortDirection::Desc);
        if let Some(status) = status {
            composer = composer.where_eq("approvalstatus", status.as_str());
        }

        let records = self.store.list_records(&composer.build()?).await?;
        records.iter().map(Amendment::from_record).collect()
    }

    /// Resolves an amendment exactly once.
    ///
    /// The persisted status is re-read first; if it is no longer `Waiting`
    /// this returns `AlreadyResolved` and writes nothing. Approval applies the
    /// persisted patch to the parent, then records the status.
    pub async fn resolve_amendment(
        &self,
        amendment: &Amendment,
        decision: Decision,
    ) -> Result<Amendment> {
        let _guard = self.resolve_lock.lock().await;

        let current = self.get_amendment(&amendment.id).await?;
        if !current.is_waiting() {
            tracing::info!(
                "[Amendments] {} already resolved as {}, ignoring {:?}",
                current.id,
                current.status.as_str(),
                decision
            );
            return Err(BazaarError::already_resolved(current.id));
        }

        if decision == Decision::Approved {
            if let Err(e) = self
                .store
                .write_record(&current.parent_table, &current.parent_id, &current.fields_patch)
                .await
            {
                tracing::warn!(
                    "[Amendments] Applying {} to {}/{} failed, amendment stays waiting: {}",
                    current.id,
                    current.parent_table,
                    current.parent_id,
                    e
                );
                return Err(e);
            }
        }

        let status = decision.status();
        let record = match self
            .store
            .write_record(AMENDMENTS_COLLECTION, &current.id, &status.to_patch())
            .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    "[Amendments] Recording {} as {} failed: {}",
                    current.id,
                    status.as_str(),
                    e
                );
                return Err(e);
            }
        };

        tracing::info!("[Amendments] {} resolved as {}", current.id, status.as_str());
        Amendment::from_record(&record)
    }
}
