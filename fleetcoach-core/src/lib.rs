//! The coaching orchestrator: wires the event store, telemetry enrichment,
//! clustering, narrative generation, the escalation safety net and speech
//! into the operations the presentation layer calls.

use fleetcoach_narrative::NarrativeError;
use fleetcoach_session::TransitionError;
use fleetcoach_store::StoreError;
use thiserror::Error;

pub mod config;
pub use config::{CoachConfig, ConfigError};

pub mod orchestrator;
pub use orchestrator::{
    BeginCoaching, CoachReply, CoachingOrchestrator, Collaborators, DriverTurn,
    OrchestratorSettings, PollSummary,
};

pub mod wiring;

/// Identity of an authenticated caller, as established by the front door.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub uid: String,
}

impl Caller {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

pub(crate) fn require(caller: Option<&Caller>) -> Result<&Caller, CoachError> {
    match caller {
        Some(c) if !c.uid.is_empty() => Ok(c),
        _ => Err(CoachError::Unauthenticated),
    }
}

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("caller is not authenticated")]
    Unauthenticated,
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream response malformed: {reason}")]
    MalformedUpstreamResponse { reason: String, raw: String },
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for CoachError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => CoachError::NotFound(format!("{kind} {id}")),
            StoreError::Transition(t) => CoachError::InvalidState(t.to_string()),
            e @ (StoreError::ActionResolved(_) | StoreError::NotPending(_)) => {
                CoachError::InvalidState(e.to_string())
            }
            e @ StoreError::InvalidResolution => CoachError::InvalidRequest(e.to_string()),
            e => CoachError::Store(e.to_string()),
        }
    }
}

impl From<TransitionError> for CoachError {
    fn from(e: TransitionError) -> Self {
        CoachError::InvalidState(e.to_string())
    }
}

impl From<NarrativeError> for CoachError {
    fn from(e: NarrativeError) -> Self {
        match e {
            NarrativeError::Unavailable(reason) => CoachError::UpstreamUnavailable(reason),
            NarrativeError::Malformed { reason, raw } => {
                CoachError::MalformedUpstreamResponse { reason, raw }
            }
        }
    }
}
