//! Validation of narrative service responses.
//!
//! Responses may wrap the payload in prose or code fences; the object is taken
//! from the first `{` to the last `}`.

use std::collections::BTreeMap;

use fleetcoach_types::{
    ActionCategory, CoachAnalysis, EscalationProposal, EventSummary, Recommendation,
    RecommendationKind, RiskFlags, SafetyEvent, Sentiment, Severity, TurnResult,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::prompt::{event_breakdown, event_time, shift_summary_line};
use crate::{NarrativeError, ShiftScript};

pub const CLEAN_SHIFT_SUMMARY: &str = "Clean shift, no safety events";

pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn malformed(reason: impl Into<String>, raw: &str) -> NarrativeError {
    let reason = reason.into();
    tracing::warn!(%reason, raw, "malformed narrative response");
    NarrativeError::Malformed {
        reason,
        raw: raw.to_string(),
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, NarrativeError> {
    let body = extract_json(raw).ok_or_else(|| malformed("no JSON object in response", raw))?;
    serde_json::from_str(body).map_err(|e| malformed(e.to_string(), raw))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireScript {
    #[serde(default)]
    initial_message: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    event_summaries: Vec<WireEventSummary>,
    #[serde(default)]
    analysis: Option<WireAnalysis>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEventSummary {
    #[serde(default)]
    rule_name: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    one_liner: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireAnalysis {
    #[serde(default)]
    overall_sentiment: Option<Sentiment>,
    #[serde(default)]
    event_breakdown: BTreeMap<String, u32>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    top_concern: Option<String>,
    #[serde(default)]
    recommendation: Option<WireRecommendation>,
}

#[derive(Deserialize)]
struct WireRecommendation {
    #[serde(rename = "type", default)]
    kind: Option<RecommendationKind>,
    #[serde(default)]
    details: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTurn {
    #[serde(default)]
    message: String,
    #[serde(default)]
    escalate: Option<Value>,
    #[serde(default)]
    risk_flags: WireRiskFlags,
}

#[derive(Deserialize)]
struct WireEscalation {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    details: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireRiskFlags {
    #[serde(default)]
    aggressive_driving: bool,
    #[serde(default)]
    impairment: bool,
    #[serde(default)]
    intentional_violation: bool,
    #[serde(default)]
    hostility: bool,
    #[serde(default)]
    vehicle_defect: bool,
    #[serde(default)]
    severity_threshold_crossed: bool,
    #[serde(default)]
    driver_requested: bool,
}

impl From<WireRiskFlags> for RiskFlags {
    fn from(w: WireRiskFlags) -> Self {
        RiskFlags {
            aggressive_driving: w.aggressive_driving,
            impairment: w.impairment,
            intentional_violation: w.intentional_violation,
            hostility: w.hostility,
            vehicle_defect: w.vehicle_defect,
            severity_threshold_crossed: w.severity_threshold_crossed,
            driver_requested: w.driver_requested,
        }
    }
}

fn severity(raw: Option<&str>) -> Severity {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("low") => Severity::Low,
        Some("high") => Severity::High,
        _ => Severity::Medium,
    }
}

fn analysis(
    wire: Option<WireAnalysis>,
    default_sentiment: Sentiment,
    events: &[SafetyEvent],
) -> CoachAnalysis {
    let wire = wire.unwrap_or_default();
    let recommendation = match wire.recommendation {
        Some(r) => Recommendation {
            kind: r.kind.unwrap_or(RecommendationKind::None),
            details: r.details,
            confidence: r.confidence.clamp(0.0, 1.0),
        },
        None => Recommendation {
            kind: RecommendationKind::None,
            details: String::new(),
            confidence: 0.0,
        },
    };
    CoachAnalysis {
        sentiment: wire.overall_sentiment.unwrap_or(default_sentiment),
        event_breakdown: if wire.event_breakdown.is_empty() {
            event_breakdown(events)
        } else {
            wire.event_breakdown
        },
        patterns: wire.patterns,
        top_concern: wire.top_concern.filter(|c| !c.trim().is_empty()),
        recommendation,
    }
}

/// Summary for an event the service skipped.
fn fallback_summary(event: &SafetyEvent) -> EventSummary {
    EventSummary {
        event_id: event.id,
        category: event.category,
        rule_name: event.rule_name.clone(),
        time: event_time(event.occurred_at),
        location: None,
        severity: Severity::Medium,
        one_liner: format!("{} at {}", event.rule_name, event_time(event.occurred_at)),
    }
}

/// Validate a shift script. Summaries are re-keyed to `events` by position;
/// ids and categories the service echoes back are ignored.
pub fn parse_shift_script(raw: &str, events: &[SafetyEvent]) -> Result<ShiftScript, NarrativeError> {
    let wire: WireScript = decode(raw)?;
    if wire.initial_message.trim().is_empty() {
        return Err(malformed("missing initialMessage", raw));
    }
    if !events.is_empty() && wire.event_summaries.is_empty() {
        return Err(malformed("no eventSummaries for a shift with events", raw));
    }
    if wire.event_summaries.len() != events.len() {
        tracing::warn!(
            expected = events.len(),
            got = wire.event_summaries.len(),
            "event summary count mismatch, re-keying by position"
        );
    }

    let mut wire_summaries = wire.event_summaries.into_iter();
    let event_summaries = events
        .iter()
        .map(|event| match wire_summaries.next() {
            Some(w) => EventSummary {
                event_id: event.id,
                category: event.category,
                rule_name: w.rule_name.unwrap_or_else(|| event.rule_name.clone()),
                time: w
                    .timestamp
                    .unwrap_or_else(|| event_time(event.occurred_at)),
                location: w.location.filter(|l| !l.trim().is_empty()),
                severity: severity(w.severity.as_deref()),
                one_liner: w
                    .one_liner
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| fallback_summary(event).one_liner),
            },
            None => fallback_summary(event),
        })
        .collect();

    Ok(ShiftScript {
        opening_message: wire.initial_message,
        summary: wire
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| shift_summary_line(events)),
        event_summaries,
        analysis: analysis(wire.analysis, Sentiment::NeedsCoaching, events),
    })
}

/// Validate a clean-shift script. Any summaries in the response are dropped.
pub fn parse_clean_shift(raw: &str) -> Result<ShiftScript, NarrativeError> {
    let wire: WireScript = decode(raw)?;
    if wire.initial_message.trim().is_empty() {
        return Err(malformed("missing initialMessage", raw));
    }
    Ok(ShiftScript {
        opening_message: wire.initial_message,
        summary: wire
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| CLEAN_SHIFT_SUMMARY.to_string()),
        event_summaries: Vec::new(),
        analysis: analysis(wire.analysis, Sentiment::Positive, &[]),
    })
}

/// Validate a conversation turn.
///
/// `escalate` is only honoured when it is an object; `null`, `false` and the
/// like mean no escalation. An unknown escalation type still escalates, as a
/// dispute review.
pub fn parse_turn(raw: &str) -> Result<TurnResult, NarrativeError> {
    let wire: WireTurn = decode(raw)?;
    if wire.message.trim().is_empty() {
        return Err(malformed("missing message", raw));
    }

    let escalate = match wire.escalate {
        Some(v @ Value::Object(_)) => {
            let e: WireEscalation =
                serde_json::from_value(v).map_err(|e| malformed(e.to_string(), raw))?;
            let category = e
                .kind
                .and_then(|k| serde_json::from_value::<ActionCategory>(Value::String(k)).ok())
                .unwrap_or(ActionCategory::DisputeReview);
            Some(EscalationProposal {
                category,
                details: e.details,
                rationale: e.rationale,
            })
        }
        _ => None,
    };

    Ok(TurnResult {
        message: wire.message,
        escalate,
        risk_flags: wire.risk_flags.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fleetcoach_types::{CoachingStatus, EventCategory};
    use uuid::Uuid;

    fn event(category: EventCategory) -> SafetyEvent {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 14, 15, 0).unwrap();
        SafetyEvent {
            id: Uuid::new_v4(),
            external_id: Uuid::new_v4().to_string(),
            driver_id: "u1".into(),
            driver_name: "Sam Rivera".into(),
            vehicle_id: Some("b1".into()),
            vehicle_name: "Truck 7".into(),
            category,
            rule_id: None,
            rule_name: "Harsh Braking".into(),
            occurred_at: t,
            duration: None,
            distance_m: None,
            position: None,
            speed_kmh: None,
            speed_limit_kmh: None,
            state: None,
            coaching_status: CoachingStatus::Pending,
            created_at: t,
        }
    }

    #[test]
    fn json_is_extracted_from_fenced_prose() {
        let raw = "Sure! ```json\n{\"a\": {\"b\": 1}}\n``` hope that helps";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn shift_script_summaries_are_rekeyed_by_position() {
        let events = vec![event(EventCategory::HardBrake), event(EventCategory::Speeding)];
        let raw = r#"{
            "initialMessage": "Hey Sam, two things from today.",
            "summary": "2 events: 1 hard_brake, 1 speeding",
            "eventSummaries": [
                {"eventId": "made-up", "type": "speeding", "ruleName": "Harsh Braking",
                 "timestamp": "Mon 2:15 PM", "severity": "HIGH", "oneLiner": "Hard stop at the light."},
                {"eventId": "also-made-up", "severity": "bogus", "oneLiner": "12 over in a 50."}
            ],
            "analysis": {"overallSentiment": "needs_coaching", "patterns": ["late braking"],
                         "recommendation": {"type": "following_distance", "details": "More gap", "confidence": 1.7}}
        }"#;
        let script = parse_shift_script(raw, &events).unwrap();

        assert_eq!(script.event_summaries.len(), 2);
        assert_eq!(script.event_summaries[0].event_id, events[0].id);
        assert_eq!(script.event_summaries[0].category, EventCategory::HardBrake);
        assert_eq!(script.event_summaries[0].severity, Severity::High);
        assert_eq!(script.event_summaries[1].event_id, events[1].id);
        assert_eq!(script.event_summaries[1].severity, Severity::Medium);
        assert_eq!(script.event_summaries[1].time, "Mon 2:15 PM");

        assert_eq!(script.analysis.sentiment, Sentiment::NeedsCoaching);
        assert_eq!(script.analysis.recommendation.kind, RecommendationKind::FollowingDistance);
        assert_eq!(script.analysis.recommendation.confidence, 1.0);
        assert_eq!(script.analysis.event_breakdown["speeding"], 1);
    }

    #[test]
    fn shift_script_without_summaries_is_malformed() {
        let events = vec![event(EventCategory::HardBrake)];
        let err = parse_shift_script(r#"{"initialMessage": "Hi"}"#, &events).unwrap_err();
        assert!(matches!(err, NarrativeError::Malformed { .. }));

        let err = parse_shift_script("I could not do that.", &events).unwrap_err();
        match err {
            NarrativeError::Malformed { raw, .. } => assert_eq!(raw, "I could not do that."),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_summary_lists_are_padded() {
        let events = vec![event(EventCategory::HardBrake), event(EventCategory::HardBrake)];
        let raw = r#"{"initialMessage": "Hi", "eventSummaries": [{"oneLiner": "First"}]}"#;
        let script = parse_shift_script(raw, &events).unwrap();
        assert_eq!(script.event_summaries.len(), 2);
        assert_eq!(script.event_summaries[1].one_liner, "Harsh Braking at Mon 2:15 PM");
        assert_eq!(script.summary, "2 events: 2 hard_brake");
    }

    #[test]
    fn clean_shift_drops_summaries() {
        let raw = r#"{"initialMessage": "Clean day, Sam.", "eventSummaries": [{"oneLiner": "x"}]}"#;
        let script = parse_clean_shift(raw).unwrap();
        assert!(script.event_summaries.is_empty());
        assert_eq!(script.summary, CLEAN_SHIFT_SUMMARY);
        assert_eq!(script.analysis.sentiment, Sentiment::Positive);
    }

    #[test]
    fn turns_parse_escalation_and_flags() {
        let plain = parse_turn(r#"{"message": "Drive safe.", "escalate": null}"#).unwrap();
        assert!(plain.escalate.is_none());
        assert!(!plain.risk_flags.any());

        let falsy = parse_turn(r#"{"message": "Ok.", "escalate": false}"#).unwrap();
        assert!(falsy.escalate.is_none());

        let escalated = parse_turn(
            r#"{"message": "Flagging it.", "escalate": {"type": "route_change", "details": "Exit 12", "rationale": "Asked"},
                "riskFlags": {"hostility": true}}"#,
        )
        .unwrap();
        let proposal = escalated.escalate.unwrap();
        assert_eq!(proposal.category, ActionCategory::RouteChange);
        assert!(escalated.risk_flags.hostility);

        let unknown = parse_turn(r#"{"message": "Ok.", "escalate": {"type": "vibes"}}"#).unwrap();
        assert_eq!(unknown.escalate.unwrap().category, ActionCategory::DisputeReview);
    }

    #[test]
    fn turn_without_message_is_malformed() {
        assert!(matches!(
            parse_turn(r#"{"escalate": null}"#),
            Err(NarrativeError::Malformed { .. })
        ));
    }
}
