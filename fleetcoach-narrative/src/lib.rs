//! Narrative generation: the coach's opening script for a shift and its side
//! of the conversation that follows.
//!
//! The service behind this is an untyped text oracle. Everything it returns
//! goes through `parse`, which extracts and validates the JSON payload and
//! turns anything unusable into `NarrativeError::Malformed`.

use async_trait::async_trait;
use fleetcoach_geo::LocationCluster;
use fleetcoach_types::{
    CoachAnalysis, EventSummary, SafetyEvent, TranscriptEntry, TurnResult,
};
use thiserror::Error;

pub mod parse;
pub mod prompt;

pub mod http;
pub use http::HttpNarrativeGenerator;

mod template;
pub use template::TemplateNarrative;

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("narrative service unavailable: {0}")]
    Unavailable(String),
    #[error("narrative response malformed: {reason}")]
    Malformed { reason: String, raw: String },
}

/// Opening of a session: the first coach message plus the session card data.
#[derive(Clone, Debug, PartialEq)]
pub struct ShiftScript {
    pub opening_message: String,
    pub summary: String,
    /// One per input event, in input order.
    pub event_summaries: Vec<EventSummary>,
    pub analysis: CoachAnalysis,
}

#[derive(Clone, Copy, Debug)]
pub struct ShiftPrompt<'a> {
    pub driver_name: &'a str,
    /// Enriched, in the order the summaries must come back.
    pub events: &'a [SafetyEvent],
    /// Indices refer into `events`.
    pub clusters: &'a [LocationCluster],
    pub context: Option<&'a str>,
}

#[derive(Clone, Copy, Debug)]
pub struct ConversationPrompt<'a> {
    pub driver_name: &'a str,
    /// Ends with the driver's latest message.
    pub transcript: &'a [TranscriptEntry],
    pub analysis: &'a CoachAnalysis,
    pub summaries: &'a [EventSummary],
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Script for a shift with at least one event.
    async fn shift_script(&self, prompt: ShiftPrompt<'_>) -> Result<ShiftScript, NarrativeError>;

    /// Script for a shift with no events. `event_summaries` is always empty.
    async fn clean_shift_script(&self, driver_name: &str) -> Result<ShiftScript, NarrativeError>;

    /// The coach's reply to the driver's latest message, with its risk assessment.
    async fn continue_conversation(
        &self,
        prompt: ConversationPrompt<'_>,
    ) -> Result<TurnResult, NarrativeError>;
}
