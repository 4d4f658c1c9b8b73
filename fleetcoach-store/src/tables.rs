use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleetcoach_session::TurnCommit;
use fleetcoach_types::{
    Action, ActionId, ActionStatus, CoachingSession, CoachingStatus, Driver, EventId,
    OutcomeKind, SafetyEvent, SessionId,
};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// The four collections, with every mutation validated before anything is written.
///
/// Both store backends hold one of these behind a single lock, so each method
/// here is one atomic update.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    events: BTreeMap<EventId, SafetyEvent>,
    /// external id -> record id
    external_ids: BTreeMap<String, EventId>,
    sessions: BTreeMap<SessionId, CoachingSession>,
    actions: BTreeMap<ActionId, Action>,
    drivers: BTreeMap<String, Driver>,
}

impl Tables {
    pub fn insert_event_if_absent(&mut self, event: SafetyEvent) -> bool {
        if self.external_ids.contains_key(&event.external_id) {
            return false;
        }
        self.external_ids.insert(event.external_id.clone(), event.id);
        self.events.insert(event.id, event);
        true
    }

    pub fn event_by_external_id(&self, external_id: &str) -> Option<SafetyEvent> {
        self.external_ids
            .get(external_id)
            .and_then(|id| self.events.get(id))
            .cloned()
    }

    pub fn pending_events(&self, driver_id: &str) -> Vec<SafetyEvent> {
        let mut out: Vec<SafetyEvent> = self
            .events
            .values()
            .filter(|e| e.driver_id == driver_id && e.coaching_status == CoachingStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.occurred_at);
        out
    }

    /// All-or-nothing: every id must exist and still be pending.
    pub fn mark_coached(&mut self, ids: &[EventId]) -> Result<(), StoreError> {
        for id in ids {
            match self.events.get(id) {
                None => return Err(StoreError::not_found("event", id)),
                Some(e) if e.coaching_status != CoachingStatus::Pending => {
                    return Err(StoreError::NotPending(*id))
                }
                Some(_) => {}
            }
        }
        for id in ids {
            if let Some(e) = self.events.get_mut(id) {
                e.coaching_status = CoachingStatus::Coached;
            }
        }
        Ok(())
    }

    pub fn create_session(&mut self, session: CoachingSession) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate {
                kind: "session",
                id: session.id.to_string(),
            });
        }
        self.sessions.insert(session.id, session);
        Ok(())
    }

    pub fn discard_session(&mut self, id: SessionId) -> Result<(), StoreError> {
        self.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("session", id))
    }

    pub fn session(&self, id: SessionId) -> Option<CoachingSession> {
        self.sessions.get(&id).cloned()
    }

    pub fn commit_turn(
        &mut self,
        id: SessionId,
        turn: TurnCommit,
        action: Option<Action>,
    ) -> Result<CoachingSession, StoreError> {
        let current = self
            .sessions
            .get(&id)
            .ok_or_else(|| StoreError::not_found("session", id))?;
        if let Some(a) = &action {
            if self.actions.contains_key(&a.id) {
                return Err(StoreError::Duplicate {
                    kind: "action",
                    id: a.id.to_string(),
                });
            }
        }

        let mut next = current.clone();
        fleetcoach_session::apply_turn(&mut next, turn)?;

        if let Some(a) = action {
            self.actions.insert(a.id, a);
        }
        self.sessions.insert(id, next.clone());
        Ok(next)
    }

    pub fn end_session(
        &mut self,
        id: SessionId,
        kind: OutcomeKind,
        at: DateTime<Utc>,
    ) -> Result<CoachingSession, StoreError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("session", id))?;
        fleetcoach_session::end(session, kind, at)?;
        Ok(session.clone())
    }

    pub fn actions(&self, status: Option<ActionStatus>) -> Vec<Action> {
        let mut out: Vec<Action> = self
            .actions
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.created_at);
        out
    }

    pub fn resolve_action(
        &mut self,
        id: ActionId,
        resolution: ActionStatus,
        resolver: &str,
        at: DateTime<Utc>,
    ) -> Result<Action, StoreError> {
        if resolution == ActionStatus::Pending {
            return Err(StoreError::InvalidResolution);
        }
        let action = self
            .actions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("action", id))?;
        if action.status != ActionStatus::Pending {
            return Err(StoreError::ActionResolved(id));
        }
        action.status = resolution;
        action.resolved_at = Some(at);
        action.resolved_by = Some(resolver.to_string());
        Ok(action.clone())
    }

    pub fn upsert_driver(
        &mut self,
        id: &str,
        name: &str,
        device_name: &str,
        at: DateTime<Utc>,
    ) -> bool {
        match self.drivers.get_mut(id) {
            Some(d) => {
                d.name = name.to_string();
                d.device_name = device_name.to_string();
                d.updated_at = at;
                false
            }
            None => {
                self.drivers.insert(
                    id.to_string(),
                    Driver {
                        id: id.to_string(),
                        name: name.to_string(),
                        device_name: device_name.to_string(),
                        created_at: at,
                        updated_at: at,
                    },
                );
                true
            }
        }
    }

    pub fn drivers(&self) -> Vec<Driver> {
        self.drivers.values().cloned().collect()
    }
}
