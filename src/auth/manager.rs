use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};

use super::refresh::Refresher;
use super::store::{SessionStore, TOKEN_KEY};
use super::token::{subject, TokenInspector};
use crate::error::{ClientError, RefreshError};

/// Outcome handed to every request waiting on a refresh
type RefreshOutcome = Result<String, RefreshError>;

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was started by login or registration
    Started,
    /// The bearer token was renewed
    Refreshed,
    /// Renewal failed and the session was torn down; the user must log in again
    Expired,
    /// The user logged out
    Ended,
}

/// Whether a refresh call is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    /// Requests blocked on the in-flight refresh, in arrival order
    queue: Vec<oneshot::Sender<RefreshOutcome>>,
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Session manager
/// Owns the bearer token lifecycle and guarantees at most one refresh call
/// in flight; every other caller that needs a refresh waits for its outcome.
pub struct SessionManager {
    /// Persisted token storage
    store: Arc<dyn SessionStore>,

    /// Refresh credential mechanism
    refresher: Arc<dyn Refresher>,

    /// Client-side expiry check
    inspector: TokenInspector,

    /// Refresh flag and waiter queue; never held across an await
    state: Mutex<RefreshState>,

    /// Session event fan-out
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        refresher: Arc<dyn Refresher>,
        inspector: TokenInspector,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            refresher,
            inspector,
            state: Mutex::new(RefreshState::default()),
            events,
        }
    }

    /// Token currently held in storage
    pub fn current_token(&self) -> Option<String> {
        self.store.get(TOKEN_KEY)
    }

    pub fn inspector(&self) -> &TokenInspector {
        &self.inspector
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> RefreshPhase {
        if self.lock_state().refreshing {
            RefreshPhase::Refreshing
        } else {
            RefreshPhase::Idle
        }
    }

    /// Number of requests waiting on the in-flight refresh
    pub fn pending_waiters(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Store a token obtained by login or registration
    pub fn start_session(&self, token: &str) -> Result<(), ClientError> {
        self.store
            .set(TOKEN_KEY, token)
            .map_err(|e| ClientError::Storage(format!("{:#}", e)))?;
        let who = subject(token).unwrap_or_else(|| "unknown".to_string());
        tracing::info!(subject = %who, "Session started");
        self.notify(SessionEvent::Started);
        Ok(())
    }

    /// Log out: best-effort server logout, local state is always cleared
    pub async fn end_session(&self) {
        if let Err(e) = self.refresher.end_session().await {
            tracing::warn!("Server logout failed: {}", e);
        }
        self.clear_token();
        tracing::info!("Session ended");
        self.notify(SessionEvent::Ended);
    }

    /// Return a usable token, refreshing first when the stored one is
    /// missing or expired
    pub async fn ensure_session(&self) -> Result<String, ClientError> {
        match self.current_token() {
            Some(token) if !self.inspector.is_expired(&token) => return Ok(token),
            Some(_) => tracing::info!("Stored token expired or unreadable, refreshing"),
            None => tracing::info!("No stored token, attempting refresh"),
        }

        Ok(self.refresh().await?)
    }

    /// Obtain a new token after the server rejected the current one
    ///
    /// Joins the in-flight refresh if there is one.
    pub async fn refresh_after_unauthorized(&self) -> Result<String, RefreshError> {
        self.refresh().await
    }

    async fn refresh(&self) -> RefreshOutcome {
        let rx = match self.enter() {
            Role::Waiter(rx) => rx,
            Role::Leader => return self.lead_refresh().await,
        };

        tracing::debug!("Refresh already in flight, waiting for its outcome");
        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    /// Check-and-set the refresh flag in one critical section
    fn enter(&self) -> Role {
        let mut state = self.lock_state();
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.queue.push(tx);
            Role::Waiter(rx)
        } else {
            state.refreshing = true;
            Role::Leader
        }
    }

    async fn lead_refresh(&self) -> RefreshOutcome {
        let mut guard = SettleGuard {
            manager: self,
            settled: false,
        };

        let outcome = self.refresher.refresh().await;
        guard.settled = true;

        match &outcome {
            Ok(token) => {
                if let Err(e) = self.store.set(TOKEN_KEY, token) {
                    tracing::warn!("Failed to persist refreshed token: {:#}", e);
                }
                let released = self.settle(&outcome);
                tracing::info!(released, "Token refresh succeeded");
                self.notify(SessionEvent::Refreshed);
            }
            Err(e) => {
                let released = self.settle(&outcome);
                tracing::error!(released, error = %e, "Token refresh failed, ending session");
                self.teardown().await;
                self.notify(SessionEvent::Expired);
            }
        }

        outcome
    }

    /// Hand the outcome to every waiter in FIFO order and go idle
    fn settle(&self, outcome: &RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock_state();
            state.refreshing = false;
            std::mem::take(&mut state.queue)
        };

        let count = waiters.len();
        for waiter in waiters {
            // Receiver gone means that request was cancelled
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    async fn teardown(&self) {
        self.clear_token();
        if let Err(e) = self.refresher.end_session().await {
            tracing::warn!("Server session teardown failed: {}", e);
        }
    }

    fn clear_token(&self) {
        if let Err(e) = self.store.remove(TOKEN_KEY) {
            tracing::warn!("Failed to clear stored token: {:#}", e);
        }
    }

    fn notify(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases waiters if the refreshing task is dropped mid-call
struct SettleGuard<'a> {
    manager: &'a SessionManager,
    settled: bool,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Refresh dropped before completion, releasing waiters");
            self.manager.settle(&Err(RefreshError::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemorySessionStore;
    use crate::auth::token::test_tokens::make_token;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    /// Refresher whose calls block until the test releases an outcome
    struct GatedRefresher {
        calls: AtomicUsize,
        logouts: AtomicUsize,
        gate: AsyncMutex<Option<oneshot::Receiver<RefreshOutcome>>>,
    }

    impl GatedRefresher {
        fn new() -> (Arc<Self>, oneshot::Sender<RefreshOutcome>) {
            let (tx, rx) = oneshot::channel();
            let refresher = Arc::new(Self {
                calls: AtomicUsize::new(0),
                logouts: AtomicUsize::new(0),
                gate: AsyncMutex::new(Some(rx)),
            });
            (refresher, tx)
        }
    }

    #[async_trait]
    impl Refresher for GatedRefresher {
        async fn refresh(&self) -> Result<String, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rx = self.gate.lock().await.take();
            match rx {
                Some(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
                None => Err(RefreshError::Network("gate already used".to_string())),
            }
        }

        async fn end_session(&self) -> Result<(), ClientError> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Refresher that answers immediately
    struct InstantRefresher {
        calls: AtomicUsize,
        outcome: RefreshOutcome,
    }

    #[async_trait]
    impl Refresher for InstantRefresher {
        async fn refresh(&self) -> Result<String, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }

        async fn end_session(&self) -> Result<(), ClientError> {
            Err(ClientError::Network("offline".to_string()))
        }
    }

    fn manager_with(
        store: Arc<MemorySessionStore>,
        refresher: Arc<dyn Refresher>,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(store, refresher, TokenInspector::default()))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let store = Arc::new(MemorySessionStore::with_token("old-token"));
        let (refresher, release) = GatedRefresher::new();
        let manager = manager_with(store.clone(), refresher.clone());
        let mut events = manager.subscribe();

        let leader = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_after_unauthorized().await })
        };
        wait_until(|| manager.phase() == RefreshPhase::Refreshing).await;

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.refresh_after_unauthorized().await })
            })
            .collect();
        wait_until(|| manager.pending_waiters() == 3).await;

        release.send(Ok("new-token".to_string())).unwrap();

        assert_eq!(leader.await.unwrap().unwrap(), "new-token");
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), "new-token");
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(TOKEN_KEY).as_deref(), Some("new-token"));
        assert_eq!(manager.phase(), RefreshPhase::Idle);
        assert_eq!(manager.pending_waiters(), 0);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Refreshed);
    }

    /// Queue waiters one at a time and record the order they complete in
    async fn completion_order(outcome: RefreshOutcome) -> Vec<usize> {
        let store = Arc::new(MemorySessionStore::with_token("old-token"));
        let (refresher, release) = GatedRefresher::new();
        let manager = manager_with(store, refresher);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let leader = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_after_unauthorized().await })
        };
        wait_until(|| manager.phase() == RefreshPhase::Refreshing).await;

        let mut waiters = Vec::new();
        for index in 0..5 {
            let manager_task = manager.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                let result = manager_task.refresh_after_unauthorized().await;
                order.lock().unwrap().push(index);
                result
            }));
            wait_until(|| manager.pending_waiters() == index + 1).await;
        }

        release.send(outcome.clone()).unwrap();
        assert_eq!(leader.await.unwrap(), outcome);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), outcome);
        }

        let recorded = order.lock().unwrap().clone();
        recorded
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_waiters_resolved_in_arrival_order() {
        let order = completion_order(Ok("new-token".to_string())).await;
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_waiters_rejected_in_arrival_order() {
        let order = completion_order(Err(RefreshError::Rejected {
            status: 401,
            message: "expired".to_string(),
        }))
        .await;
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_refresh_rejects_all_and_tears_down() {
        let store = Arc::new(MemorySessionStore::with_token("old-token"));
        let (refresher, release) = GatedRefresher::new();
        let manager = manager_with(store.clone(), refresher.clone());
        let mut events = manager.subscribe();

        let leader = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_after_unauthorized().await })
        };
        wait_until(|| manager.phase() == RefreshPhase::Refreshing).await;

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.refresh_after_unauthorized().await })
            })
            .collect();
        wait_until(|| manager.pending_waiters() == 2).await;

        let failure = RefreshError::Network("connection reset".to_string());
        release.send(Err(failure.clone())).unwrap();

        assert_eq!(leader.await.unwrap().unwrap_err(), failure);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap_err(), failure);
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.logouts.load(Ordering::SeqCst), 1);
        assert!(store.get(TOKEN_KEY).is_none());
        assert_eq!(manager.phase(), RefreshPhase::Idle);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let store = Arc::new(MemorySessionStore::with_token("old-token"));
        let (refresher, _release) = GatedRefresher::new();
        let manager = manager_with(store, refresher);

        let leader = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_after_unauthorized().await })
        };
        wait_until(|| manager.phase() == RefreshPhase::Refreshing).await;

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_after_unauthorized().await })
        };
        wait_until(|| manager.pending_waiters() == 1).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        assert_eq!(waiter.await.unwrap().unwrap_err(), RefreshError::Abandoned);
        assert_eq!(manager.phase(), RefreshPhase::Idle);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_dispatch() {
        let store = Arc::new(MemorySessionStore::new());
        let refresher = Arc::new(InstantRefresher {
            calls: AtomicUsize::new(0),
            outcome: Ok("t".to_string()),
        });
        let manager = manager_with(store, refresher.clone());

        manager.refresh_after_unauthorized().await.unwrap();
        manager.refresh_after_unauthorized().await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ensure_session_keeps_valid_token() {
        let token = make_token(json!({
            "sub": "ala@example.com",
            "exp": (Utc::now() + Duration::hours(5)).timestamp()
        }));
        let store = Arc::new(MemorySessionStore::with_token(&token));
        let refresher = Arc::new(InstantRefresher {
            calls: AtomicUsize::new(0),
            outcome: Ok("unused".to_string()),
        });
        let manager = manager_with(store, refresher.clone());

        assert_eq!(manager.ensure_session().await.unwrap(), token);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ensure_session_refreshes_token_without_exp() {
        let token = make_token(json!({"sub": "ala@example.com"}));
        let store = Arc::new(MemorySessionStore::with_token(&token));
        let refresher = Arc::new(InstantRefresher {
            calls: AtomicUsize::new(0),
            outcome: Ok("fresh".to_string()),
        });
        let manager = manager_with(store.clone(), refresher.clone());

        assert_eq!(manager.ensure_session().await.unwrap(), "fresh");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_ensure_session_failure_clears_token() {
        let token = make_token(json!({"exp": 1}));
        let store = Arc::new(MemorySessionStore::with_token(&token));
        let refresher = Arc::new(InstantRefresher {
            calls: AtomicUsize::new(0),
            outcome: Err(RefreshError::Rejected {
                status: 401,
                message: "expired".to_string(),
            }),
        });
        let manager = manager_with(store.clone(), refresher);
        let mut events = manager.subscribe();

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, ClientError::Refresh(_)));
        assert!(err.is_session_lost());
        assert!(store.get(TOKEN_KEY).is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn test_start_and_end_session() {
        let store = Arc::new(MemorySessionStore::new());
        let refresher = Arc::new(InstantRefresher {
            calls: AtomicUsize::new(0),
            outcome: Ok("unused".to_string()),
        });
        let manager = manager_with(store.clone(), refresher);
        let mut events = manager.subscribe();

        manager.start_session("abc").unwrap();
        assert_eq!(manager.current_token().as_deref(), Some("abc"));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Started);

        // server logout failing does not keep the local session
        manager.end_session().await;
        assert!(manager.current_token().is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Ended);
    }
}
