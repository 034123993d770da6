//! Authenticated access to records.
//!
//! Every backend call carries the current session token. A call rejected as
//! unauthorized triggers one token refresh and one retry; a second rejection
//! is returned to the caller.

use bazaar_core::error::{BazaarError, Result};
use bazaar_core::query::Query;
use bazaar_core::record::{
    EventSink, Fields, Patch, Record, RecordBackend, RecordEvent, WatchHandle,
};
use bazaar_core::schema::{CollectionSchema, ID_FIELD};
use bazaar_core::session::TokenSource;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use uuid::Uuid;

struct LiveSubscription {
    collection: String,
    active: Arc<AtomicBool>,
    watch: WatchHandle,
}

type SubscriptionMap = HashMap<u64, LiveSubscription>;

fn lock_subscriptions(map: &Mutex<SubscriptionMap>) -> MutexGuard<'_, SubscriptionMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle of a live subscription.
///
/// Release is explicit: dropping the handle keeps the subscription alive
/// until [`Subscription::unsubscribe`] or [`RecordStore::teardown`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Mutex<SubscriptionMap>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops delivery. No new delivery starts after this returns; one that
    /// already passed the gate on another thread may still finish.
    pub fn unsubscribe(self) {
        self.active.store(false, Ordering::SeqCst);
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = lock_subscriptions(&registry).remove(&self.id);
        if let Some(live) = removed {
            tracing::debug!(
                "[RecordStore] Unsubscribed {} from '{}'",
                self.id,
                live.collection
            );
            live.watch.cancel();
        }
    }
}

pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    tokens: Arc<dyn TokenSource>,
    schemas: RwLock<HashMap<String, CollectionSchema>>,
    subscriptions: Arc<Mutex<SubscriptionMap>>,
    next_subscription_id: AtomicU64,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn RecordBackend>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            backend,
            tokens,
            schemas: RwLock::new(HashMap::new()),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_subscription_id: AtomicU64::new(0),
        }
    }

    /// Registers the schema writes to its collection are validated against.
    pub fn register_schema(&self, schema: CollectionSchema) {
        tracing::debug!("[RecordStore] Registered schema for '{}'", schema.collection());
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema.collection().to_string(), schema);
    }

    pub fn schema(&self, collection: &str) -> Option<CollectionSchema> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
    }

    /// Reads one record by id.
    ///
    /// # Returns
    ///
    /// - `Ok(Record)`: record found
    /// - `Err(NotFound)`: no record with that id
    /// - `Err(PermissionDenied)`: still rejected after one refresh
    pub async fn read_record(&self, collection: &str, id: &str) -> Result<Record> {
        let backend = &self.backend;
        self.with_auth_retry("read", |token| async move {
            backend.read(token.as_deref(), collection, id).await
        })
        .await
    }

    /// Runs a composed query and returns the requested page.
    pub async fn list_records(&self, query: &Query) -> Result<Vec<Record>> {
        let backend = &self.backend;
        let records = self
            .with_auth_retry("list", |token| async move {
                backend.list(token.as_deref(), query).await
            })
            .await?;
        tracing::debug!(
            "[RecordStore] Listed {} records from '{}'",
            records.len(),
            query.collection()
        );
        Ok(records)
    }

    /// Merges `patch` into a record. Last write wins; there is no version check.
    pub async fn write_record(&self, collection: &str, id: &str, patch: &Patch) -> Result<Record> {
        if patch.contains_key(ID_FIELD) {
            return Err(BazaarError::validation("the 'id' field cannot be written"));
        }
        if let Some(schema) = self.schema(collection) {
            schema.validate_patch(patch)?;
        }

        let backend = &self.backend;
        self.with_auth_retry("write", |token| async move {
            backend.write(token.as_deref(), collection, id, patch).await
        })
        .await
    }

    /// Creates a record under a freshly generated id.
    pub async fn create_record(&self, collection: &str, fields: &Fields) -> Result<Record> {
        if fields.contains_key(ID_FIELD) {
            return Err(BazaarError::validation(
                "new records get a generated id; remove the 'id' field",
            ));
        }
        if let Some(schema) = self.schema(collection) {
            schema.validate_new(fields)?;
        }

        let id = Uuid::new_v4().to_string();
        let backend = &self.backend;
        let id_ref = id.as_str();
        let record = self
            .with_auth_retry("create", |token| async move {
                backend.create(token.as_deref(), collection, id_ref, fields).await
            })
            .await?;
        tracing::debug!("[RecordStore] Created {}/{}", collection, record.id);
        Ok(record)
    }

    pub async fn delete_record(&self, collection: &str, id: &str) -> Result<()> {
        let backend = &self.backend;
        self.with_auth_retry("delete", |token| async move {
            backend.delete(token.as_deref(), collection, id).await
        })
        .await
    }

    /// Delivers change events of `collection` whose record satisfies
    /// `predicate`.
    ///
    /// Events are delivered in backend order. No new delivery starts after
    /// [`Subscription::unsubscribe`] returns.
    pub async fn subscribe<P, C>(
        &self,
        collection: &str,
        predicate: P,
        callback: C,
    ) -> Result<Subscription>
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
        C: Fn(&RecordEvent) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&active);
        let sink: EventSink = Arc::new(move |event: &RecordEvent| {
            if gate.load(Ordering::SeqCst) && predicate(&event.record) {
                callback(event);
            }
        });

        let backend = &self.backend;
        let watch = self
            .with_auth_retry("subscribe", |token| {
                let sink = Arc::clone(&sink);
                async move { backend.watch(token.as_deref(), collection, sink).await }
            })
            .await?;

        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        lock_subscriptions(&self.subscriptions).insert(
            id,
            LiveSubscription {
                collection: collection.to_string(),
                active: Arc::clone(&active),
                watch,
            },
        );
        tracing::debug!("[RecordStore] Subscription {} on '{}'", id, collection);

        Ok(Subscription {
            id,
            active,
            registry: Arc::downgrade(&self.subscriptions),
        })
    }

    /// Subscribes with the filters of `query` as predicate.
    ///
    /// Ordering and paging do not apply to events. An update that moves a
    /// record out of the filters is not delivered; to track departures,
    /// subscribe to the whole collection and let a `LiveCollection` filter.
    pub async fn subscribe_query<C>(&self, query: &Query, callback: C) -> Result<Subscription>
    where
        C: Fn(&RecordEvent) + Send + Sync + 'static,
    {
        let filter = query.without_page();
        self.subscribe(
            query.collection(),
            move |record| filter.matches(record),
            callback,
        )
        .await
    }

    pub fn active_subscriptions(&self) -> usize {
        lock_subscriptions(&self.subscriptions).len()
    }

    /// Releases every subscription.
    pub fn teardown(&self) {
        let drained: Vec<LiveSubscription> = lock_subscriptions(&self.subscriptions)
            .drain()
            .map(|(_, live)| live)
            .collect();
        let count = drained.len();
        for live in drained {
            live.active.store(false, Ordering::SeqCst);
            live.watch.cancel();
        }
        tracing::debug!("[RecordStore] Torn down, released {} subscriptions", count);
    }

    /// Runs `call` with the current token; on an authorization failure,
    /// refreshes once and retries once with the new token.
    async fn with_auth_retry<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let rejected = match call(self.tokens.current_token()).await {
            Err(err) if err.is_authorization() => err,
            other => return other,
        };

        tracing::warn!(
            "[RecordStore] {} rejected ({}), refreshing token and retrying once",
            operation,
            rejected
        );
        match self.tokens.refresh_token().await {
            Ok(issued) => call(Some(issued.token)).await,
            Err(refresh_err) => {
                tracing::warn!(
                    "[RecordStore] Token refresh before {} retry failed: {}",
                    operation,
                    refresh_err
                );
                Err(rejected)
            }
        }
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("active_subscriptions", &self.active_subscriptions())
            .finish()
    }
}
