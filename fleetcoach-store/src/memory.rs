use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetcoach_session::TurnCommit;
use fleetcoach_types::{
    Action, ActionId, ActionStatus, CoachingSession, Driver, EventId, OutcomeKind, SafetyEvent,
    SessionId,
};
use tokio::sync::Mutex;

use crate::tables::Tables;
use crate::{Store, StoreError};

/// In-memory store for tests and local runs.
///
/// NOTE: not durable; everything is lost on restart. Use `FileStore` when the
/// process must survive restarts.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_event_if_absent(&self, event: SafetyEvent) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.insert_event_if_absent(event))
    }

    async fn event_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SafetyEvent>, StoreError> {
        Ok(self.tables.lock().await.event_by_external_id(external_id))
    }

    async fn pending_events(&self, driver_id: &str) -> Result<Vec<SafetyEvent>, StoreError> {
        Ok(self.tables.lock().await.pending_events(driver_id))
    }

    async fn mark_coached(&self, ids: &[EventId]) -> Result<(), StoreError> {
        self.tables.lock().await.mark_coached(ids)
    }

    async fn create_session(&self, session: CoachingSession) -> Result<(), StoreError> {
        self.tables.lock().await.create_session(session)
    }

    async fn discard_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.tables.lock().await.discard_session(id)
    }

    async fn session(&self, id: SessionId) -> Result<Option<CoachingSession>, StoreError> {
        Ok(self.tables.lock().await.session(id))
    }

    async fn commit_turn(
        &self,
        id: SessionId,
        turn: TurnCommit,
        action: Option<Action>,
    ) -> Result<CoachingSession, StoreError> {
        self.tables.lock().await.commit_turn(id, turn, action)
    }

    async fn end_session(
        &self,
        id: SessionId,
        kind: OutcomeKind,
        at: DateTime<Utc>,
    ) -> Result<CoachingSession, StoreError> {
        self.tables.lock().await.end_session(id, kind, at)
    }

    async fn actions(&self, status: Option<ActionStatus>) -> Result<Vec<Action>, StoreError> {
        Ok(self.tables.lock().await.actions(status))
    }

    async fn resolve_action(
        &self,
        id: ActionId,
        resolution: ActionStatus,
        resolver: &str,
        at: DateTime<Utc>,
    ) -> Result<Action, StoreError> {
        self.tables
            .lock()
            .await
            .resolve_action(id, resolution, resolver, at)
    }

    async fn upsert_driver(
        &self,
        id: &str,
        name: &str,
        device_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.upsert_driver(id, name, device_name, at))
    }

    async fn drivers(&self) -> Result<Vec<Driver>, StoreError> {
        Ok(self.tables.lock().await.drivers())
    }
}
