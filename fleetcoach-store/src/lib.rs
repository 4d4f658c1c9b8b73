use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetcoach_session::{TransitionError, TurnCommit};
use fleetcoach_types::{
    Action, ActionId, ActionStatus, CoachingSession, Driver, EventId, OutcomeKind, SafetyEvent,
    SessionId,
};
use thiserror::Error;

mod tables;

pub mod memory;
pub use memory::MemoryStore;

pub mod file;
pub use file::FileStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },
    #[error("event {0} is not pending")]
    NotPending(EventId),
    #[error("action {0} is already resolved")]
    ActionResolved(ActionId),
    #[error("an action can only be resolved as reviewed or dismissed")]
    InvalidResolution,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("storage io error: {0}")]
    Io(String),
    #[error("storage encoding error: {0}")]
    Encoding(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl Display) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Failures where nothing was committed and the same request may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

/// Persistent collections: `events`, `sessions`, `actions`, `drivers`.
///
/// Each method is a single atomic update relative to the documents it
/// touches; this is the only synchronization the coaching flow relies on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert unless an event with the same external id exists. Returns whether it was created.
    async fn insert_event_if_absent(&self, event: SafetyEvent) -> Result<bool, StoreError>;

    async fn event_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SafetyEvent>, StoreError>;

    /// Pending events for a driver, oldest first.
    async fn pending_events(&self, driver_id: &str) -> Result<Vec<SafetyEvent>, StoreError>;

    /// Flip every given event from pending to coached, or none of them.
    async fn mark_coached(&self, ids: &[EventId]) -> Result<(), StoreError>;

    async fn create_session(&self, session: CoachingSession) -> Result<(), StoreError>;

    /// Remove a session whose consumed events could not be flipped.
    async fn discard_session(&self, id: SessionId) -> Result<(), StoreError>;

    async fn session(&self, id: SessionId) -> Result<Option<CoachingSession>, StoreError>;

    /// Append one driver/coach exchange and, if present, the action it produced.
    async fn commit_turn(
        &self,
        id: SessionId,
        turn: TurnCommit,
        action: Option<Action>,
    ) -> Result<CoachingSession, StoreError>;

    async fn end_session(
        &self,
        id: SessionId,
        kind: OutcomeKind,
        at: DateTime<Utc>,
    ) -> Result<CoachingSession, StoreError>;

    async fn actions(&self, status: Option<ActionStatus>) -> Result<Vec<Action>, StoreError>;

    async fn resolve_action(
        &self,
        id: ActionId,
        resolution: ActionStatus,
        resolver: &str,
        at: DateTime<Utc>,
    ) -> Result<Action, StoreError>;

    /// Create or refresh a driver directory entry. Returns whether it was created.
    async fn upsert_driver(
        &self,
        id: &str,
        name: &str,
        device_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn drivers(&self) -> Result<Vec<Driver>, StoreError>;
}

/// Retry settings for whole-batch writes.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// Re-run `op` from scratch while it fails transiently.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                tracing::warn!(attempt, error = %e, "store batch failed, retrying whole batch");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestOutcome {
    pub created: bool,
}

/// Owner of the safety-event lifecycle: dedup on ingest, pending → coached on consumption.
#[derive(Clone)]
pub struct EventStore {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl EventStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Idempotent on the external id: re-ingesting is a silent no-op.
    pub async fn ingest(&self, event: SafetyEvent) -> Result<IngestOutcome, StoreError> {
        let external_id = event.external_id.clone();
        let created = self.store.insert_event_if_absent(event).await?;
        if !created {
            tracing::debug!(external_id, "event already ingested");
        }
        Ok(IngestOutcome { created })
    }

    pub async fn pending_for_driver(&self, driver_id: &str) -> Result<Vec<SafetyEvent>, StoreError> {
        self.store.pending_events(driver_id).await
    }

    /// Flip the whole set as one batch, retrying the full batch on transient failure.
    pub async fn mark_coached(&self, ids: &[EventId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        with_retry(self.retry, || self.store.mark_coached(ids)).await
    }
}
