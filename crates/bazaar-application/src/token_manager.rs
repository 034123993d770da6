//! Session token lifecycle.
//!
//! `SessionTokenManager` owns the process-wide [`Session`], keeps it fresh
//! with a single refresh timer and notifies token listeners. Sign-in/sign-out
//! events bump a generation counter; a refresh started under an older
//! generation never stores its token or schedules a timer.

use async_trait::async_trait;
use bazaar_core::config::SessionSettings;
use bazaar_core::error::{BazaarError, Result};
use bazaar_core::listener::{ListenerHandle, ListenerRegistry};
use bazaar_core::session::{CredentialEndpoint, Identity, IssuedToken, Session, TokenSource};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Delay until the refresh for a token expiring at `expires_at`, floored at zero.
pub fn compute_refresh_delay(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    safety_gap: Duration,
) -> Duration {
    let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
    remaining.saturating_sub(safety_gap)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingRefresh {
    id: u64,
    handle: AbortHandle,
}

struct TokenManagerInner {
    endpoint: Arc<dyn CredentialEndpoint>,
    settings: SessionSettings,
    identity: Mutex<Option<Identity>>,
    session: RwLock<Session>,
    generation: AtomicU64,
    pending: Mutex<Option<PendingRefresh>>,
    next_timer_id: AtomicU64,
    immediate_streak: AtomicU32,
    listeners: ListenerRegistry<Option<String>>,
}

/// Keeps the identity token fresh.
///
/// Cheap to clone; clones share the same session, timer and listeners.
/// Refresh timers run on the ambient Tokio runtime.
#[derive(Clone)]
pub struct SessionTokenManager {
    inner: Arc<TokenManagerInner>,
}

impl SessionTokenManager {
    pub fn new(endpoint: Arc<dyn CredentialEndpoint>, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(TokenManagerInner {
                endpoint,
                settings,
                identity: Mutex::new(None),
                session: RwLock::new(Session::default()),
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                next_timer_id: AtomicU64::new(0),
                immediate_streak: AtomicU32::new(0),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.inner.identity).clone()
    }

    /// Registers a token listener. It receives `Some(token)` after every
    /// successful refresh and `None` on sign-out.
    pub fn on_token_changed<F>(&self, listener: F) -> ListenerHandle<Option<String>>
    where
        F: Fn(&Option<String>) + Send + Sync + 'static,
    {
        self.inner.listeners.register(listener)
    }

    /// Entry point for the external auth provider.
    ///
    /// `None` signs out: the pending timer is cancelled, the session cleared
    /// and listeners receive `None`. `Some` signs in and fetches a token
    /// immediately.
    pub async fn on_identity_changed(&self, identity: Option<Identity>) -> Result<()> {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_pending_refresh();
        self.inner.immediate_streak.store(0, Ordering::SeqCst);

        match identity {
            None => {
                *lock(&self.inner.identity) = None;
                self.store_session(Session::default());
                tracing::info!("[TokenManager] Signed out, session cleared");
                self.inner.listeners.notify(&None);
                Ok(())
            }
            Some(identity) => {
                tracing::info!("[TokenManager] Signed in as {}", identity.uid);
                *lock(&self.inner.identity) = Some(identity);
                self.refresh_for_current_generation().await.map(|_| ())
            }
        }
    }

    /// Fetches a token for the signed-in identity and stores it.
    ///
    /// A `NotProvisioned` answer is retried once after the configured delay;
    /// any other failure is returned immediately. On failure the last known
    /// token stays in place.
    pub async fn refresh_token(&self) -> Result<IssuedToken> {
        match self.refresh_for_current_generation().await? {
            Some(issued) => Ok(issued),
            None => Err(BazaarError::unknown(
                "identity changed while the token was being refreshed",
            )),
        }
    }

    /// Returns `Ok(None)` when a sign-in/sign-out superseded this refresh.
    async fn refresh_for_current_generation(&self) -> Result<Option<IssuedToken>> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let identity = self
            .identity()
            .ok_or_else(|| BazaarError::permission_denied("no signed-in identity"))?;

        let issued = match self.inner.endpoint.get_token(&identity).await {
            Err(BazaarError::TokenNotProvisioned) => {
                let delay = self.inner.settings.not_provisioned_retry();
                tracing::warn!(
                    "[TokenManager] Identity {} not provisioned yet, retrying once in {:?}",
                    identity.uid,
                    delay
                );
                tokio::time::sleep(delay).await;
                self.inner.endpoint.get_token(&identity).await
            }
            other => other,
        };

        let issued = match issued {
            Ok(issued) => issued,
            Err(e) => {
                tracing::error!(
                    "[TokenManager] Token refresh failed for {}: {}",
                    identity.uid,
                    e
                );
                return Err(e);
            }
        };

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("[TokenManager] Discarding token from a superseded sign-in");
            return Ok(None);
        }

        self.store_session(Session::from(issued.clone()));
        tracing::debug!(
            "[TokenManager] Token refreshed, expires at {}",
            issued.expires_at
        );
        self.inner.listeners.notify(&Some(issued.token.clone()));
        self.schedule_next_refresh(issued.expires_at);

        Ok(Some(issued))
    }

    /// Schedules the next refresh `safety_gap` before `expires_at`, replacing
    /// any pending one. Returns the delay used.
    ///
    /// An already-due token refreshes immediately; a second immediate refresh
    /// in a row waits `min_refresh_delay` instead.
    pub fn schedule_next_refresh(&self, expires_at: DateTime<Utc>) -> Duration {
        let settings = &self.inner.settings;
        let mut delay = compute_refresh_delay(expires_at, Utc::now(), settings.safety_gap());
        if delay.is_zero() {
            if self.inner.immediate_streak.fetch_add(1, Ordering::SeqCst) > 0 {
                delay = settings.min_refresh_delay();
            }
        } else {
            self.inner.immediate_streak.store(0, Ordering::SeqCst);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("[TokenManager] No Tokio runtime, refresh not scheduled");
            return delay;
        };

        let id = self.inner.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);

        // The slot stays locked until the new timer is recorded, so the timer
        // task cannot observe the slot before its own entry is in it.
        let mut pending = lock(&self.inner.pending);
        if let Some(previous) = pending.take() {
            previous.handle.abort();
        }
        let task = runtime.spawn(run_refresh_timer(weak, id, generation, delay));
        *pending = Some(PendingRefresh {
            id,
            handle: task.abort_handle(),
        });
        drop(pending);

        tracing::debug!("[TokenManager] Next refresh in {:?}", delay);
        delay
    }

    pub fn has_pending_refresh(&self) -> bool {
        lock(&self.inner.pending).is_some()
    }

    /// Cancels the pending refresh timer, if any.
    pub fn cancel_pending_refresh(&self) {
        if let Some(previous) = lock(&self.inner.pending).take() {
            previous.handle.abort();
        }
    }

    /// Releases the timer and all listeners. The manager stays usable for a
    /// later sign-in, but nothing fires against torn-down state.
    pub fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_pending_refresh();
        self.inner.listeners.clear();
        *lock(&self.inner.identity) = None;
        self.store_session(Session::default());
        tracing::debug!("[TokenManager] Torn down");
    }

    fn store_session(&self, session: Session) {
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Removes timer `id` from the slot if it is still the pending one.
    fn claim_timer(&self, id: u64) -> bool {
        let mut pending = lock(&self.inner.pending);
        if pending.as_ref().is_some_and(|timer| timer.id == id) {
            *pending = None;
            true
        } else {
            false
        }
    }
}

async fn run_refresh_timer(
    inner: Weak<TokenManagerInner>,
    id: u64,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let manager = SessionTokenManager { inner };
    if !manager.claim_timer(id) {
        return;
    }
    if manager.inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    if let Err(e) = manager.refresh_for_current_generation().await {
        tracing::warn!("[TokenManager] Scheduled refresh failed: {}", e);
    }
}

#[async_trait]
impl TokenSource for SessionTokenManager {
    fn current_token(&self) -> Option<String> {
        self.session().token
    }

    async fn refresh_token(&self) -> Result<IssuedToken> {
        SessionTokenManager::refresh_token(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Endpoint that replays queued answers, then issues 10s tokens.
    struct ScriptedEndpoint {
        script: Mutex<VecDeque<Result<IssuedToken>>>,
        calls: AtomicUsize,
        latency: Duration,
    }

    impl ScriptedEndpoint {
        fn new(script: Vec<Result<IssuedToken>>) -> Arc<Self> {
            Self::with_latency(script, Duration::ZERO)
        }

        fn with_latency(script: Vec<Result<IssuedToken>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                latency,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialEndpoint for ScriptedEndpoint {
        async fn get_token(&self, identity: &Identity) -> Result<IssuedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(IssuedToken {
                    token: format!("{}-tok-{}", identity.uid, n),
                    expires_at: Utc::now() + chrono::Duration::seconds(10),
                })
            })
        }
    }

    fn manager(endpoint: Arc<ScriptedEndpoint>) -> SessionTokenManager {
        SessionTokenManager::new(endpoint, SessionSettings::default())
    }

    #[test]
    fn test_compute_refresh_delay() {
        let now = Utc::now();
        let gap = Duration::from_secs(2);

        assert_eq!(
            compute_refresh_delay(now + chrono::Duration::seconds(10), now, gap),
            Duration::from_secs(8)
        );
        assert_eq!(
            compute_refresh_delay(now - chrono::Duration::seconds(1), now, gap),
            Duration::ZERO
        );
        assert_eq!(
            compute_refresh_delay(now + chrono::Duration::seconds(1), now, gap),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_stores_token_and_notifies() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let manager = manager(endpoint.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle =
            manager.on_token_changed(move |token| sink.lock().unwrap().push(token.clone()));

        manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap();

        assert_eq!(manager.current_token().as_deref(), Some("u1-tok-1"));
        assert!(manager.has_pending_refresh());
        assert_eq!(*seen.lock().unwrap(), vec![Some("u1-tok-1".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_clears_session_and_timer() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let manager = manager(endpoint.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle =
            manager.on_token_changed(move |token| sink.lock().unwrap().push(token.clone()));

        manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap();
        manager.on_identity_changed(None).await.unwrap();

        assert!(manager.session().is_empty());
        assert!(!manager.has_pending_refresh());
        assert_eq!(seen.lock().unwrap().last(), Some(&None));

        // The cancelled timer never fires.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_uses_safety_gap() {
        let manager = manager(ScriptedEndpoint::new(Vec::new()));

        let delay = manager.schedule_next_refresh(Utc::now() + chrono::Duration::seconds(10));
        assert!(delay <= Duration::from_secs(8));
        assert!(delay > Duration::from_millis(7_900));
        assert!(manager.has_pending_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_refreshes_immediately_then_floors() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let manager = manager(endpoint.clone());
        *lock(&manager.inner.identity) = Some(Identity::new("u1"));

        let expired = Utc::now() - chrono::Duration::seconds(1);
        assert_eq!(manager.schedule_next_refresh(expired), Duration::ZERO);
        assert_eq!(
            manager.schedule_next_refresh(expired),
            SessionSettings::default().min_refresh_delay()
        );

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(manager.current_token().as_deref(), Some("u1-tok-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_fires_once() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let manager = manager(endpoint.clone());

        manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(9)).await;

        assert_eq!(endpoint.calls(), 2);
        assert_eq!(manager.current_token().as_deref(), Some("u1-tok-2"));
        assert!(manager.has_pending_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_sign_ins_keep_single_timer() {
        let endpoint = ScriptedEndpoint::with_latency(Vec::new(), Duration::from_millis(50));
        let manager = manager(endpoint.clone());

        let (first, second) = tokio::join!(
            manager.on_identity_changed(Some(Identity::new("u1"))),
            manager.on_identity_changed(Some(Identity::new("u2"))),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(endpoint.calls(), 2);
        assert!(manager.has_pending_refresh());

        // Only one timer exists, so only one scheduled refresh happens.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(endpoint.calls(), 3);
        assert!(manager.current_token().unwrap().starts_with("u2-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_provisioned_retried_once_after_delay() {
        let endpoint = ScriptedEndpoint::new(vec![Err(BazaarError::TokenNotProvisioned)]);
        let manager = manager(endpoint.clone());
        let started = tokio::time::Instant::now();

        manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap();

        assert_eq!(endpoint.calls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(manager.current_token().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_not_provisioned_is_surfaced() {
        let endpoint = ScriptedEndpoint::new(vec![
            Err(BazaarError::TokenNotProvisioned),
            Err(BazaarError::TokenNotProvisioned),
        ]);
        let manager = manager(endpoint.clone());

        let err = manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap_err();

        assert_eq!(err, BazaarError::TokenNotProvisioned);
        assert_eq!(endpoint.calls(), 2);
        assert!(!manager.has_pending_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failure_not_retried_and_keeps_last_token() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let manager = manager(endpoint.clone());
        manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap();

        endpoint
            .script
            .lock()
            .unwrap()
            .push_back(Err(BazaarError::network("offline")));
        let err = manager.refresh_token().await.unwrap_err();

        assert!(matches!(err, BazaarError::Network(_)));
        assert_eq!(endpoint.calls(), 2);
        assert_eq!(manager.current_token().as_deref(), Some("u1-tok-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_during_refresh_discards_token() {
        let endpoint = ScriptedEndpoint::with_latency(Vec::new(), Duration::from_millis(100));
        let manager = manager(endpoint.clone());

        let (signed_in, signed_out) = tokio::join!(
            manager.on_identity_changed(Some(Identity::new("u1"))),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                manager.on_identity_changed(None).await
            }
        );
        signed_in.unwrap();
        signed_out.unwrap();

        assert!(manager.session().is_empty());
        assert!(!manager.has_pending_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_without_identity_is_denied() {
        let manager = manager(ScriptedEndpoint::new(Vec::new()));
        let err = manager.refresh_token().await.unwrap_err();
        assert!(err.is_authorization());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_timer_and_listeners() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let manager = manager(endpoint.clone());
        let _handle = manager.on_token_changed(|_| {});
        manager
            .on_identity_changed(Some(Identity::new("u1")))
            .await
            .unwrap();

        manager.teardown();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!manager.has_pending_refresh());
        assert!(manager.inner.listeners.is_empty());
        assert_eq!(endpoint.calls(), 1);
    }
}
