use std::path::{Path, PathBuf};

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

/// Single-document JSON store.
///
/// Every write applies to a copy of the tables, persists the copy
/// (write-then-rename), and only then swaps it in. A failed write leaves both
/// the file and the in-memory state untouched, so callers may retry the
/// whole request.
pub struct FileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Encoding(e.to_string()))?
        } else {
            Tables::default()
        };
        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    async fn read<T>(&self, op: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.tables.lock().await;
        op(&guard)
    }

    async fn write<T>(
        &self,
        op: impl FnOnce(&mut Tables) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let mut guard = self.tables.lock().await;
        let mut next = guard.clone();
        let out = op(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(tables).map_err(|e| StoreError::Encoding(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn insert_event_if_absent(&self, event: SafetyEvent) -> Result<bool, StoreError> {
        self.write(|t| Ok(t.insert_event_if_absent(event))).await
    }

    async fn event_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SafetyEvent>, StoreError> {
        Ok(self.read(|t| t.event_by_external_id(external_id)).await)
    }

    async fn pending_events(&self, driver_id: &str) -> Result<Vec<SafetyEvent>, StoreError> {
        Ok(self.read(|t| t.pending_events(driver_id)).await)
    }

    async fn mark_coached(&self, ids: &[EventId]) -> Result<(), StoreError> {
        self.write(|t| t.mark_coached(ids)).await
    }

    async fn create_session(&self, session: CoachingSession) -> Result<(), StoreError> {
        self.write(|t| t.create_session(session)).await
    }

    async fn discard_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.write(|t| t.discard_session(id)).await
    }

    async fn session(&self, id: SessionId) -> Result<Option<CoachingSession>, StoreError> {
        Ok(self.read(|t| t.session(id)).await)
    }

    async fn commit_turn(
        &self,
        id: SessionId,
        turn: TurnCommit,
        action: Option<Action>,
    ) -> Result<CoachingSession, StoreError> {
        self.write(|t| t.commit_turn(id, turn, action)).await
    }

    async fn end_session(
        &self,
        id: SessionId,
        kind: OutcomeKind,
        at: DateTime<Utc>,
    ) -> Result<CoachingSession, StoreError> {
        self.write(|t| t.end_session(id, kind, at)).await
    }

    async fn actions(&self, status: Option<ActionStatus>) -> Result<Vec<Action>, StoreError> {
        Ok(self.read(|t| t.actions(status)).await)
    }

    async fn resolve_action(
        &self,
        id: ActionId,
        resolution: ActionStatus,
        resolver: &str,
        at: DateTime<Utc>,
    ) -> Result<Action, StoreError> {
        self.write(|t| t.resolve_action(id, resolution, resolver, at))
            .await
    }

    async fn upsert_driver(
        &self,
        id: &str,
        name: &str,
        device_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.write(|t| Ok(t.upsert_driver(id, name, device_name, at)))
            .await
    }

    async fn drivers(&self) -> Result<Vec<Driver>, StoreError> {
        Ok(self.read(|t| t.drivers()).await)
    }
}
