//! In-process `RecordBackend`.
//!
//! Holds collections as ordered maps, derives read-only views on demand,
//! delivers change events to watchers and can gate every call on an accepted
//! token. Used for offline mode, demos and tests.

use async_trait::async_trait;
use bazaar_core::error::{BazaarError, Result};
use bazaar_core::query::Query;
use bazaar_core::record::{
    EventSink, Fields, Patch, Record, RecordBackend, RecordEvent, WatchHandle,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

type Collections = HashMap<String, BTreeMap<String, Record>>;

/// Read access to backing collections handed to view definitions.
pub struct Snapshot<'a> {
    collections: &'a Collections,
}

impl<'a> Snapshot<'a> {
    pub fn records(&self, collection: &str) -> impl Iterator<Item = &'a Record> {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(BTreeMap::values)
    }
}

type ViewFn = Arc<dyn Fn(&Snapshot<'_>) -> Vec<Record> + Send + Sync>;

type WatcherMap = HashMap<String, Vec<(u64, EventSink)>>;

fn lock_watchers(watchers: &Mutex<WatcherMap>) -> MutexGuard<'_, WatcherMap> {
    watchers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Call counters, mostly for assertions in tests.
#[derive(Debug, Default)]
pub struct BackendStats {
    pub reads: AtomicUsize,
    pub lists: AtomicUsize,
    pub creates: AtomicUsize,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
    pub rejected: AtomicUsize,
}

pub struct InMemoryRecordBackend {
    collections: RwLock<Collections>,
    views: RwLock<HashMap<String, ViewFn>>,
    watchers: Arc<Mutex<WatcherMap>>,
    next_watch_id: AtomicU64,
    accepted_tokens: RwLock<Option<HashSet<String>>>,
    stats: BackendStats,
}

impl Default for InMemoryRecordBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            watchers: Arc::new(Mutex::new(HashMap::new())),
            next_watch_id: AtomicU64::new(0),
            accepted_tokens: RwLock::new(None),
            stats: BackendStats::default(),
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Inserts records directly, without events or token checks.
    pub async fn seed<I>(&self, collection: &str, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        for record in records {
            target.insert(record.id.clone(), record);
        }
    }

    /// Registers a read-only view computed from the backing collections.
    pub async fn define_view<F>(&self, name: impl Into<String>, view: F)
    where
        F: Fn(&Snapshot<'_>) -> Vec<Record> + Send + Sync + 'static,
    {
        self.views.write().await.insert(name.into(), Arc::new(view));
    }

    /// From now on, only calls carrying an accepted token succeed.
    pub async fn accept_token(&self, token: impl Into<String>) {
        self.accepted_tokens
            .write()
            .await
            .get_or_insert_with(HashSet::new)
            .insert(token.into());
    }

    pub async fn revoke_token(&self, token: &str) {
        if let Some(accepted) = self.accepted_tokens.write().await.as_mut() {
            accepted.remove(token);
        }
    }

    pub fn watcher_count(&self, collection: &str) -> usize {
        lock_watchers(&self.watchers)
            .get(collection)
            .map_or(0, Vec::len)
    }

    async fn authorize(&self, token: Option<&str>) -> Result<()> {
        let accepted = self.accepted_tokens.read().await;
        let Some(accepted) = accepted.as_ref() else {
            return Ok(());
        };
        match token {
            Some(token) if accepted.contains(token) => Ok(()),
            Some(_) => {
                self.stats.rejected.fetch_add(1, Ordering::SeqCst);
                Err(BazaarError::permission_denied("token rejected"))
            }
            None => {
                self.stats.rejected.fetch_add(1, Ordering::SeqCst);
                Err(BazaarError::permission_denied("no token attached"))
            }
        }
    }

    async fn reject_view_write(&self, collection: &str) -> Result<()> {
        if self.views.read().await.contains_key(collection) {
            return Err(BazaarError::permission_denied(format!(
                "'{}' is a read-only view",
                collection
            )));
        }
        Ok(())
    }

    fn emit(&self, collection: &str, event: RecordEvent) {
        let sinks: Vec<EventSink> = lock_watchers(&self.watchers)
            .get(collection)
            .map(|sinks| sinks.iter().map(|(_, sink)| Arc::clone(sink)).collect())
            .unwrap_or_default();

        tracing::trace!(
            "[InMemoryBackend] {:?} '{}' in '{}' to {} watcher(s)",
            event.kind,
            event.record.id,
            collection,
            sinks.len()
        );
        for sink in sinks {
            sink(&event);
        }
    }

    async fn view_records(&self, name: &str) -> Option<Vec<Record>> {
        let view = self.views.read().await.get(name).cloned()?;
        let collections = self.collections.read().await;
        Some(view(&Snapshot {
            collections: &collections,
        }))
    }
}

#[async_trait]
impl RecordBackend for InMemoryRecordBackend {
    async fn read(&self, token: Option<&str>, collection: &str, id: &str) -> Result<Record> {
        self.authorize(token).await?;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(records) = self.view_records(collection).await {
            return records
                .into_iter()
                .find(|record| record.id == id)
                .ok_or_else(|| BazaarError::not_found(collection, id));
        }

        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned()
            .ok_or_else(|| BazaarError::not_found(collection, id))
    }

    async fn list(&self, token: Option<&str>, query: &Query) -> Result<Vec<Record>> {
        self.authorize(token).await?;
        self.stats.lists.fetch_add(1, Ordering::SeqCst);

        let records = match self.view_records(query.collection()).await {
            Some(records) => records,
            None => self
                .collections
                .read()
                .await
                .get(query.collection())
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default(),
        };
        Ok(query.apply(records))
    }

    async fn create(
        &self,
        token: Option<&str>,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<Record> {
        self.authorize(token).await?;
        self.reject_view_write(collection).await?;

        let record = {
            let mut collections = self.collections.write().await;
            let target = collections.entry(collection.to_string()).or_default();
            if target.contains_key(id) {
                return Err(BazaarError::validation(format!(
                    "record '{}' already exists in '{}'",
                    id, collection
                )));
            }
            let record = Record::new(id, fields.clone());
            target.insert(id.to_string(), record.clone());
            record
        };
        self.stats.creates.fetch_add(1, Ordering::SeqCst);

        self.emit(collection, RecordEvent::inserted(record.clone()));
        Ok(record)
    }

    async fn write(
        &self,
        token: Option<&str>,
        collection: &str,
        id: &str,
        patch: &Patch,
    ) -> Result<Record> {
        self.authorize(token).await?;
        self.reject_view_write(collection).await?;

        let record = {
            let mut collections = self.collections.write().await;
            let record = collections
                .get_mut(collection)
                .and_then(|records| records.get_mut(id))
                .ok_or_else(|| BazaarError::not_found(collection, id))?;
            record.apply_patch(patch);
            record.clone()
        };
        self.stats.writes.fetch_add(1, Ordering::SeqCst);

        self.emit(collection, RecordEvent::updated(record.clone()));
        Ok(record)
    }

    async fn delete(&self, token: Option<&str>, collection: &str, id: &str) -> Result<()> {
        self.authorize(token).await?;
        self.reject_view_write(collection).await?;

        let removed = self
            .collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .ok_or_else(|| BazaarError::not_found(collection, id))?;
        self.stats.deletes.fetch_add(1, Ordering::SeqCst);

        self.emit(collection, RecordEvent::deleted(removed));
        Ok(())
    }

    async fn watch(
        &self,
        token: Option<&str>,
        collection: &str,
        sink: EventSink,
    ) -> Result<WatchHandle> {
        self.authorize(token).await?;
        if self.views.read().await.contains_key(collection) {
            return Err(BazaarError::validation(format!(
                "view '{}' does not deliver live updates",
                collection
            )));
        }

        let watch_id = self.next_watch_id.fetch_add(1, Ordering::SeqCst);
        lock_watchers(&self.watchers)
            .entry(collection.to_string())
            .or_default()
            .push((watch_id, sink));

        let watchers = Arc::clone(&self.watchers);
        let collection = collection.to_string();
        Ok(WatchHandle::new(move || {
            let mut watchers = lock_watchers(&watchers);
            if let Some(sinks) = watchers.get_mut(&collection) {
                sinks.retain(|(id, _)| *id != watch_id);
                if sinks.is_empty() {
                    watchers.remove(&collection);
                }
            }
        }))
    }
}
