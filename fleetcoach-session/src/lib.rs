//! Coaching session lifecycle.
//!
//! ```text
//! ready ──first driver turn──▶ in_progress ──safety net / upstream──▶ escalated
//!   │                              │                                    │
//!   └──────────── end (acknowledged → completed, disputed → disputed) ──┘
//! ```
//!
//! `completed` and `disputed` are closed: no further turns are accepted.
//! `escalated` still accepts turns. Every mutation here is meant to run inside
//! the store's atomic update for the session document.

use chrono::{DateTime, Duration, Utc};
use fleetcoach_types::{
    CoachAnalysis, CoachingSession, EventId, EventSummary, OutcomeKind, SessionOutcome,
    SessionStatus, ShiftPeriod, Speaker, TranscriptEntry,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session is {0} and no longer accepts turns")]
    Closed(SessionStatus),
    #[error("cannot escalate a session in state {0}")]
    NotEscalatable(SessionStatus),
    #[error("a clean-shift session cannot reference events ({0} given)")]
    CleanShiftWithEvents(usize),
    #[error("event summaries missing for a shift with {0} events")]
    MissingSummaries(usize),
}

/// Closed for turns and for analytics.
pub fn is_closed(status: SessionStatus) -> bool {
    matches!(status, SessionStatus::Completed | SessionStatus::Disputed)
}

/// Terminal for analytics grouping. `escalated` counts here even though turns continue.
pub fn is_terminal_for_analytics(status: SessionStatus) -> bool {
    is_closed(status) || status == SessionStatus::Escalated
}

/// Inputs for a new session, produced by the orchestrator from the shift script.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub driver_id: String,
    pub driver_name: String,
    pub device_name: String,
    pub fleet_id: String,
    pub event_ids: Vec<EventId>,
    pub event_times: Vec<DateTime<Utc>>,
    pub event_summaries: Vec<EventSummary>,
    pub summary: String,
    pub opening_message: String,
    pub opening_audio: Option<String>,
    pub analysis: CoachAnalysis,
}

/// Build a session in `ready` with the coach's opening line as the first transcript entry.
pub fn open(new: NewSession, now: DateTime<Utc>) -> Result<CoachingSession, TransitionError> {
    if !new.event_ids.is_empty() && new.event_summaries.is_empty() {
        return Err(TransitionError::MissingSummaries(new.event_ids.len()));
    }
    if new.event_ids.is_empty() && !new.event_summaries.is_empty() {
        return Err(TransitionError::CleanShiftWithEvents(new.event_summaries.len()));
    }

    let shift_period = ShiftPeriod {
        from: new.event_times.iter().min().copied().unwrap_or(now),
        to: new.event_times.iter().max().copied().unwrap_or(now),
    };

    Ok(CoachingSession {
        id: Uuid::new_v4(),
        driver_id: new.driver_id,
        driver_name: new.driver_name,
        device_name: new.device_name,
        fleet_id: new.fleet_id,
        event_count: new.event_ids.len(),
        event_ids: new.event_ids,
        event_summaries: new.event_summaries,
        shift_period,
        status: SessionStatus::Ready,
        summary: new.summary,
        transcript: vec![TranscriptEntry {
            speaker: Speaker::Coach,
            text: new.opening_message,
            audio_ref: new.opening_audio,
            video_ref: None,
            at: now,
        }],
        analysis: new.analysis,
        outcome: None,
        created_at: now,
        updated_at: now,
    })
}

/// Reject turn requests on closed sessions before any collaborator is called.
pub fn ensure_accepts_turns(session: &CoachingSession) -> Result<(), TransitionError> {
    if is_closed(session.status) {
        return Err(TransitionError::Closed(session.status));
    }
    Ok(())
}

/// Append an entry, nudging its timestamp forward so the transcript stays strictly ordered.
pub fn append_entry(session: &mut CoachingSession, mut entry: TranscriptEntry) {
    if let Some(last) = session.transcript.last() {
        if entry.at <= last.at {
            entry.at = last.at + Duration::milliseconds(1);
        }
    }
    session.updated_at = entry.at;
    session.transcript.push(entry);
}

/// Everything one driver turn writes to the session document.
#[derive(Clone, Debug)]
pub struct TurnCommit {
    pub driver_text: String,
    pub coach_text: String,
    pub coach_audio: Option<String>,
    pub coach_video: Option<String>,
    /// Set when the safety net or the narrative service escalated this turn.
    pub escalate: bool,
    pub at: DateTime<Utc>,
}

/// Apply a full driver/coach exchange.
///
/// `ready` moves to `in_progress` on the first driver turn; an escalated turn
/// then moves the session to `escalated`. Nothing is written when the session
/// is closed.
pub fn apply_turn(session: &mut CoachingSession, turn: TurnCommit) -> Result<(), TransitionError> {
    ensure_accepts_turns(session)?;

    append_entry(
        session,
        TranscriptEntry {
            speaker: Speaker::Driver,
            text: turn.driver_text,
            audio_ref: None,
            video_ref: None,
            at: turn.at,
        },
    );
    if session.status == SessionStatus::Ready {
        session.status = SessionStatus::InProgress;
    }

    append_entry(
        session,
        TranscriptEntry {
            speaker: Speaker::Coach,
            text: turn.coach_text,
            audio_ref: turn.coach_audio,
            video_ref: turn.coach_video,
            at: turn.at,
        },
    );

    if turn.escalate {
        escalate(session)?;
    }
    Ok(())
}

/// Move to `escalated`. Only reachable from a session that has had a driver turn.
pub fn escalate(session: &mut CoachingSession) -> Result<(), TransitionError> {
    match session.status {
        SessionStatus::InProgress | SessionStatus::Escalated => {
            session.status = SessionStatus::Escalated;
            Ok(())
        }
        other => Err(TransitionError::NotEscalatable(other)),
    }
}

/// Close the session on the acting user's request.
pub fn end(
    session: &mut CoachingSession,
    kind: OutcomeKind,
    at: DateTime<Utc>,
) -> Result<(), TransitionError> {
    ensure_accepts_turns(session)?;
    session.status = match kind {
        OutcomeKind::Acknowledged => SessionStatus::Completed,
        OutcomeKind::Disputed => SessionStatus::Disputed,
    };
    session.outcome = Some(SessionOutcome {
        kind,
        recorded_at: at,
    });
    session.updated_at = at;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcoach_types::{EventCategory, Recommendation, RecommendationKind, Sentiment, Severity};

    fn analysis() -> CoachAnalysis {
        CoachAnalysis {
            sentiment: Sentiment::Positive,
            event_breakdown: Default::default(),
            patterns: Vec::new(),
            top_concern: None,
            recommendation: Recommendation {
                kind: RecommendationKind::None,
                details: String::new(),
                confidence: 1.0,
            },
        }
    }

    fn new_session(events: usize) -> NewSession {
        let ids: Vec<EventId> = (0..events).map(|_| Uuid::new_v4()).collect();
        NewSession {
            driver_id: "d1".into(),
            driver_name: "Sam Rivera".into(),
            device_name: "Truck 7".into(),
            fleet_id: "default".into(),
            event_summaries: ids
                .iter()
                .map(|id| EventSummary {
                    event_id: *id,
                    category: EventCategory::HardBrake,
                    rule_name: "Harsh Braking".into(),
                    time: "Tue 2:15 PM".into(),
                    location: None,
                    severity: Severity::Medium,
                    one_liner: "Hard stop".into(),
                })
                .collect(),
            event_times: Vec::new(),
            event_ids: ids,
            summary: "summary".into(),
            opening_message: "Hi Sam".into(),
            opening_audio: None,
            analysis: analysis(),
        }
    }

    fn turn(text: &str, escalate: bool, at: DateTime<Utc>) -> TurnCommit {
        TurnCommit {
            driver_text: text.into(),
            coach_text: "noted".into(),
            coach_audio: None,
            coach_video: None,
            escalate,
            at,
        }
    }

    #[test]
    fn opens_ready_with_coach_line() {
        let now = Utc::now();
        let s = open(new_session(2), now).unwrap();
        assert_eq!(s.status, SessionStatus::Ready);
        assert_eq!(s.transcript.len(), 1);
        assert_eq!(s.transcript[0].speaker, Speaker::Coach);
        assert_eq!(s.event_count, 2);
        assert_eq!(s.shift_period.from, now);
    }

    #[test]
    fn clean_shift_has_no_summaries() {
        let mut n = new_session(0);
        assert!(open(n.clone(), Utc::now()).is_ok());
        n.event_summaries = new_session(1).event_summaries;
        assert!(matches!(
            open(n, Utc::now()),
            Err(TransitionError::CleanShiftWithEvents(1))
        ));
    }

    #[test]
    fn first_driver_turn_moves_to_in_progress() {
        let now = Utc::now();
        let mut s = open(new_session(1), now).unwrap();
        apply_turn(&mut s, turn("ok", false, now)).unwrap();
        assert_eq!(s.status, SessionStatus::InProgress);
        assert_eq!(s.transcript.len(), 3);
    }

    #[test]
    fn transcript_timestamps_strictly_increase() {
        let now = Utc::now();
        let mut s = open(new_session(1), now).unwrap();
        apply_turn(&mut s, turn("same instant", false, now)).unwrap();
        apply_turn(&mut s, turn("earlier clock", false, now - Duration::seconds(5))).unwrap();
        assert!(s.transcript.windows(2).all(|w| w[0].at < w[1].at));
    }

    #[test]
    fn escalated_turn_moves_to_escalated_and_keeps_accepting() {
        let now = Utc::now();
        let mut s = open(new_session(1), now).unwrap();
        apply_turn(&mut s, turn("flag it", true, now)).unwrap();
        assert_eq!(s.status, SessionStatus::Escalated);
        apply_turn(&mut s, turn("thanks", false, now)).unwrap();
        assert_eq!(s.status, SessionStatus::Escalated);
        assert!(is_terminal_for_analytics(s.status));
    }

    #[test]
    fn ready_session_cannot_be_escalated_directly() {
        let mut s = open(new_session(1), Utc::now()).unwrap();
        assert_eq!(
            escalate(&mut s),
            Err(TransitionError::NotEscalatable(SessionStatus::Ready))
        );
    }

    #[test]
    fn completed_session_rejects_turns_without_writing() {
        let now = Utc::now();
        let mut s = open(new_session(1), now).unwrap();
        end(&mut s, OutcomeKind::Acknowledged, now).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        let before = s.transcript.len();
        assert_eq!(
            apply_turn(&mut s, turn("hello?", false, now)),
            Err(TransitionError::Closed(SessionStatus::Completed))
        );
        assert_eq!(s.transcript.len(), before);
    }

    #[test]
    fn dispute_closes_session() {
        let now = Utc::now();
        let mut s = open(new_session(1), now).unwrap();
        apply_turn(&mut s, turn("that's wrong", true, now)).unwrap();
        end(&mut s, OutcomeKind::Disputed, now).unwrap();
        assert_eq!(s.status, SessionStatus::Disputed);
        assert!(end(&mut s, OutcomeKind::Acknowledged, now).is_err());
        assert_eq!(s.outcome.map(|o| o.kind), Some(OutcomeKind::Disputed));
    }
}
