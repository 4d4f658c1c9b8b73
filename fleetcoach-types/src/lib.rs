//! Shared records for the coaching pipeline.
//!
//! Every persisted collection (`events`, `sessions`, `actions`, `drivers`) has
//! its record type here, along with the small value types that flow between
//! crates (positions, risk flags, turn results).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod timespan;
pub use timespan::{format_duration, TimeSpan};

pub type EventId = Uuid;
pub type SessionId = Uuid;
pub type ActionId = Uuid;

/// A latitude/longitude pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// The exact (0, 0) point, which telemetry devices report when they have no fix.
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    HardBrake,
    HarshCornering,
    HardAcceleration,
    Speeding,
    Seatbelt,
    ExcessiveIdling,
    Reverse,
    AfterHours,
    Fatigue,
    Other,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::HardBrake => "hard_brake",
            EventCategory::HarshCornering => "harsh_cornering",
            EventCategory::HardAcceleration => "hard_acceleration",
            EventCategory::Speeding => "speeding",
            EventCategory::Seatbelt => "seatbelt",
            EventCategory::ExcessiveIdling => "excessive_idling",
            EventCategory::Reverse => "reverse",
            EventCategory::AfterHours => "after_hours",
            EventCategory::Fatigue => "fatigue",
            EventCategory::Other => "other",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoachingStatus {
    Pending,
    Coached,
}

/// One detected exception event, owned by the event store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub id: EventId,
    /// Identifier assigned by the telemetry platform; the dedup key.
    pub external_id: String,
    pub driver_id: String,
    pub driver_name: String,
    pub vehicle_id: Option<String>,
    pub vehicle_name: String,
    pub category: EventCategory,
    pub rule_id: Option<String>,
    pub rule_name: String,
    pub occurred_at: DateTime<Utc>,
    /// Raw platform TimeSpan, e.g. `"00:00:04"` or `"21.04:46:21"`.
    pub duration: Option<String>,
    pub distance_m: Option<f64>,
    pub position: Option<GeoPoint>,
    pub speed_kmh: Option<f64>,
    pub speed_limit_kmh: Option<f64>,
    pub state: Option<String>,
    pub coaching_status: CoachingStatus,
    pub created_at: DateTime<Utc>,
}

impl SafetyEvent {
    /// Parsed duration, if the raw value is a well-formed TimeSpan.
    pub fn timespan(&self) -> Option<TimeSpan> {
        self.duration.as_deref().and_then(TimeSpan::parse)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Per-event line shown on the session card.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub event_id: EventId,
    pub category: EventCategory,
    pub rule_name: String,
    /// Human-readable time, e.g. "Tue 2:15 PM".
    pub time: String,
    pub location: Option<String>,
    pub severity: Severity,
    pub one_liner: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    NeedsCoaching,
    Mixed,
    Positive,
    #[serde(other)]
    Unclassified,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    None,
    RouteChange,
    TimingAdjustment,
    FollowingDistance,
    Training,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub details: String,
    pub confidence: f32,
}

/// Structured coach analysis produced when a session opens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoachAnalysis {
    pub sentiment: Sentiment,
    pub event_breakdown: BTreeMap<String, u32>,
    pub patterns: Vec<String>,
    pub top_concern: Option<String>,
    pub recommendation: Recommendation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Coach,
    Driver,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub audio_ref: Option<String>,
    pub video_ref: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ready,
    InProgress,
    Completed,
    Disputed,
    Escalated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ready => "ready",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Disputed => "disputed",
            SessionStatus::Escalated => "escalated",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the driver closed the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Acknowledged,
    Disputed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub kind: OutcomeKind,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShiftPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One shift-level coaching interaction, owned by the session state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoachingSession {
    pub id: SessionId,
    pub driver_id: String,
    pub driver_name: String,
    pub device_name: String,
    pub fleet_id: String,
    pub event_ids: Vec<EventId>,
    pub event_summaries: Vec<EventSummary>,
    pub event_count: usize,
    pub shift_period: ShiftPeriod,
    pub status: SessionStatus,
    pub summary: String,
    pub transcript: Vec<TranscriptEntry>,
    pub analysis: CoachAnalysis,
    pub outcome: Option<SessionOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    RouteChange,
    ScheduleAdjustment,
    TrainingReferral,
    DisputeReview,
    SafetyConcern,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::RouteChange => "route_change",
            ActionCategory::ScheduleAdjustment => "schedule_adjustment",
            ActionCategory::TrainingReferral => "training_referral",
            ActionCategory::DisputeReview => "dispute_review",
            ActionCategory::SafetyConcern => "safety_concern",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Reviewed,
    Dismissed,
}

/// Supervisor work item created by an escalation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub session_id: SessionId,
    pub driver_id: String,
    pub driver_name: String,
    pub fleet_id: String,
    pub category: ActionCategory,
    pub status: ActionStatus,
    pub details: String,
    pub rationale: String,
    /// The driver's own words from the triggering turn.
    pub driver_input: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Entry in the denormalized driver directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Escalation requested for a turn, either by the narrative service or forced by the safety net.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationProposal {
    pub category: ActionCategory,
    pub details: String,
    pub rationale: String,
}

/// Hard risk signals the narrative service reports for a driver turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlags {
    #[serde(default)]
    pub aggressive_driving: bool,
    #[serde(default)]
    pub impairment: bool,
    #[serde(default)]
    pub intentional_violation: bool,
    #[serde(default)]
    pub hostility: bool,
    #[serde(default)]
    pub vehicle_defect: bool,
    #[serde(default)]
    pub severity_threshold_crossed: bool,
    #[serde(default)]
    pub driver_requested: bool,
}

impl RiskFlags {
    /// Names of every set flag, in declaration order.
    pub fn triggered(&self) -> Vec<&'static str> {
        [
            (self.aggressive_driving, "aggressive_driving"),
            (self.impairment, "impairment"),
            (self.intentional_violation, "intentional_violation"),
            (self.hostility, "hostility"),
            (self.vehicle_defect, "vehicle_defect"),
            (self.severity_threshold_crossed, "severity_threshold_crossed"),
            (self.driver_requested, "driver_requested"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }

    pub fn any(&self) -> bool {
        !self.triggered().is_empty()
    }
}

/// The coach's reply to one driver turn, before and after the safety net.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub message: String,
    pub escalate: Option<EscalationProposal>,
    pub risk_flags: RiskFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggered_flags_keep_declaration_order() {
        let flags = RiskFlags {
            hostility: true,
            aggressive_driving: true,
            ..RiskFlags::default()
        };
        assert_eq!(flags.triggered(), vec!["aggressive_driving", "hostility"]);
        assert!(flags.any());
        assert!(!RiskFlags::default().any());
    }

    #[test]
    fn unknown_sentiment_is_unclassified() {
        let s: Sentiment = serde_json::from_str("\"pattern_detected\"").unwrap();
        assert_eq!(s, Sentiment::Unclassified);
        let s: Sentiment = serde_json::from_str("\"needs_coaching\"").unwrap();
        assert_eq!(s, Sentiment::NeedsCoaching);
    }

    #[test]
    fn null_island_detection() {
        assert!(GeoPoint::new(0.0, 0.0).is_null_island());
        assert!(!GeoPoint::new(0.0, 12.5).is_null_island());
    }
}
