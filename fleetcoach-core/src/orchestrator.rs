use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetcoach_analytics::{fetch_fleet_analytics, AnalyticsSource, FleetAnalytics};
use fleetcoach_audit::{AuditLog, Escalation, EscalationKind};
use fleetcoach_escalation::Decision;
use fleetcoach_geo::cluster_events;
use fleetcoach_narrative::{ConversationPrompt, NarrativeGenerator, ShiftPrompt, ShiftScript};
use fleetcoach_session::{NewSession, TurnCommit};
use fleetcoach_speech::{AudioStore, SpeechRecognizer, SpeechSynthesizer, DEFAULT_LANGUAGE};
use fleetcoach_store::{EventStore, Store};
use fleetcoach_telemetry::{
    fetch_exception_events, DriverContextLookup, EnrichSettings, InsightSettings, PollWindow,
    TelemetryClient, TelemetryEnricher,
};
use fleetcoach_types::{
    Action, ActionId, ActionStatus, CoachingSession, Driver, OutcomeKind, SafetyEvent, SessionId,
    SessionStatus, Speaker, TranscriptEntry,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{require, Caller, CoachError};

/// External collaborators, constructed once per process.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub telemetry: Arc<dyn TelemetryClient>,
    pub narrative: Arc<dyn NarrativeGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub audio: Arc<dyn AudioStore>,
    pub analytics: Arc<dyn AnalyticsSource>,
    pub audit: Option<Arc<AuditLog>>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub cluster_radius_m: f64,
    pub enrich: EnrichSettings,
    pub insight: InsightSettings,
    pub poll: PollWindow,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            cluster_radius_m: fleetcoach_geo::DEFAULT_CLUSTER_RADIUS_M,
            enrich: EnrichSettings::default(),
            insight: InsightSettings::default(),
            poll: PollWindow::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BeginCoaching {
    pub driver_id: String,
    pub driver_name: Option<String>,
    pub device_name: Option<String>,
    pub fleet_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DriverTurn {
    pub session_id: SessionId,
    pub driver_text: String,
    /// Name to address the driver by; defaults to the one on the session.
    pub driver_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoachReply {
    pub message: String,
    pub audio_ref: Option<String>,
    pub video_ref: Option<String>,
    pub status: SessionStatus,
    /// Set when this turn escalated.
    pub action_id: Option<ActionId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub total: usize,
    pub new: usize,
}

pub struct CoachingOrchestrator {
    collab: Collaborators,
    events: EventStore,
    enricher: TelemetryEnricher,
    context: DriverContextLookup,
    settings: OrchestratorSettings,
}

fn or_nonempty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl CoachingOrchestrator {
    pub fn new(collab: Collaborators, settings: OrchestratorSettings) -> Self {
        let events = EventStore::new(Arc::clone(&collab.store));
        let enricher = TelemetryEnricher::new(Arc::clone(&collab.telemetry))
            .with_settings(settings.enrich.clone());
        let context =
            DriverContextLookup::new(Arc::clone(&collab.telemetry), settings.insight.clone());
        Self {
            collab,
            events,
            enricher,
            context,
            settings,
        }
    }

    pub fn event_store(&self) -> &EventStore {
        &self.events
    }

    /// Synthesize and store audio for `text`. Failures degrade to no audio.
    async fn speak(&self, text: &str, language: &str, name: &str) -> Option<String> {
        let bytes = match self.collab.synthesizer.synthesize(text, language).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, name, "speech synthesis failed, continuing with text only");
                return None;
            }
        };
        match self.collab.audio.put(name, bytes).await {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(error = %e, name, "audio upload failed, continuing with text only");
                None
            }
        }
    }

    /// Open a shift session over every pending event of the driver.
    ///
    /// The session is written before its events flip to coached; if the flip
    /// fails the session is removed again, so neither half survives alone.
    pub async fn begin_session(
        &self,
        caller: Option<&Caller>,
        req: BeginCoaching,
    ) -> Result<CoachingSession, CoachError> {
        require(caller)?;
        if req.driver_id.trim().is_empty() {
            return Err(CoachError::InvalidRequest("driverId is required".into()));
        }
        let now = Utc::now();

        let pending = self.events.pending_for_driver(&req.driver_id).await?;
        let events = if pending.is_empty() {
            pending
        } else {
            let enriched = self.enricher.enrich(pending).await;
            if !enriched.warnings.is_empty() {
                tracing::warn!(
                    driver_id = %req.driver_id,
                    chunks = enriched.warnings.len(),
                    "session built from partially enriched events"
                );
            }
            enriched.events
        };

        let first = events.first();
        let driver_name = or_nonempty(req.driver_name)
            .or_else(|| first.map(|e| e.driver_name.clone()))
            .unwrap_or_else(|| "Driver".into());
        let device_name = or_nonempty(req.device_name)
            .or_else(|| first.map(|e| e.vehicle_name.clone()))
            .unwrap_or_default();
        let fleet_id = or_nonempty(req.fleet_id).unwrap_or_else(|| "default".into());

        let script = self.script(&driver_name, &events, now).await?;

        let opening_audio = self
            .speak(
                &script.opening_message,
                DEFAULT_LANGUAGE,
                &format!("shift_{}", Uuid::new_v4().simple()),
            )
            .await;

        let session = fleetcoach_session::open(
            NewSession {
                driver_id: req.driver_id.clone(),
                driver_name,
                device_name,
                fleet_id,
                event_ids: events.iter().map(|e| e.id).collect(),
                event_times: events.iter().map(|e| e.occurred_at).collect(),
                event_summaries: script.event_summaries,
                summary: script.summary,
                opening_message: script.opening_message,
                opening_audio,
                analysis: script.analysis,
            },
            now,
        )?;

        self.collab.store.create_session(session.clone()).await?;
        if let Err(e) = self.events.mark_coached(&session.event_ids).await {
            tracing::error!(session_id = %session.id, error = %e, "events not flipped, discarding session");
            if let Err(undo) = self.collab.store.discard_session(session.id).await {
                tracing::error!(session_id = %session.id, error = %undo, "session discard failed");
            }
            return Err(e.into());
        }

        tracing::info!(
            session_id = %session.id,
            driver_id = %session.driver_id,
            events = session.event_count,
            "coaching session opened"
        );
        Ok(session)
    }

    async fn script(
        &self,
        driver_name: &str,
        events: &[SafetyEvent],
        now: DateTime<Utc>,
    ) -> Result<ShiftScript, CoachError> {
        let Some(first) = events.first() else {
            return Ok(self.collab.narrative.clean_shift_script(driver_name).await?);
        };

        let clusters = cluster_events(events, self.settings.cluster_radius_m);
        // Never fails; the inquiry carries its own cap inside the lookup.
        let context = self.context.driver_context(first, now).await;

        Ok(self
            .collab
            .narrative
            .shift_script(ShiftPrompt {
                driver_name,
                events,
                clusters: &clusters,
                context: Some(context.as_str()),
            })
            .await?)
    }

    /// One driver message and the coach's reply, committed together.
    pub async fn continue_session(
        &self,
        caller: Option<&Caller>,
        turn: DriverTurn,
    ) -> Result<CoachReply, CoachError> {
        require(caller)?;
        if turn.driver_text.trim().is_empty() {
            return Err(CoachError::InvalidRequest("driverText is required".into()));
        }
        let session = self
            .collab
            .store
            .session(turn.session_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("session {}", turn.session_id)))?;
        fleetcoach_session::ensure_accepts_turns(&session)?;
        let now = Utc::now();

        // The narrative service sees the driver's message; the store only
        // sees it once the reply exists.
        let mut draft = session.clone();
        fleetcoach_session::append_entry(
            &mut draft,
            TranscriptEntry {
                speaker: Speaker::Driver,
                text: turn.driver_text.clone(),
                audio_ref: None,
                video_ref: None,
                at: now,
            },
        );
        let name = or_nonempty(turn.driver_name).unwrap_or_else(|| session.driver_name.clone());
        let proposed = self
            .collab
            .narrative
            .continue_conversation(ConversationPrompt {
                driver_name: &name,
                transcript: &draft.transcript,
                analysis: &session.analysis,
                summaries: &session.event_summaries,
            })
            .await?;

        let decision = fleetcoach_escalation::decide(&proposed);
        if let Decision::Forced(flags) = &decision {
            tracing::warn!(
                session_id = %session.id,
                flags = %flags.join(","),
                "safety net forced escalation"
            );
        }
        let reply = fleetcoach_escalation::apply(proposed);

        let audio_ref = self
            .speak(
                &reply.message,
                DEFAULT_LANGUAGE,
                &format!("{}_{}", session.id.simple(), now.timestamp_millis()),
            )
            .await;

        let action = reply.escalate.as_ref().map(|esc| Action {
            id: Uuid::new_v4(),
            session_id: session.id,
            driver_id: session.driver_id.clone(),
            driver_name: session.driver_name.clone(),
            fleet_id: session.fleet_id.clone(),
            category: esc.category,
            status: ActionStatus::Pending,
            details: esc.details.clone(),
            rationale: esc.rationale.clone(),
            driver_input: turn.driver_text.clone(),
            created_at: now,
            resolved_at: None,
            resolved_by: None,
        });

        let committed = self
            .collab
            .store
            .commit_turn(
                session.id,
                TurnCommit {
                    driver_text: turn.driver_text.clone(),
                    coach_text: reply.message.clone(),
                    coach_audio: audio_ref.clone(),
                    coach_video: None,
                    escalate: action.is_some(),
                    at: now,
                },
                action.clone(),
            )
            .await?;

        if let Some(action) = &action {
            tracing::info!(session_id = %session.id, action_id = %action.id, category = action.category.as_str(), "session escalated");
            self.audit(&decision, action, now);
        }

        Ok(CoachReply {
            message: reply.message,
            audio_ref,
            video_ref: None,
            status: committed.status,
            action_id: action.map(|a| a.id),
        })
    }

    fn audit(&self, decision: &Decision, action: &Action, at: DateTime<Utc>) {
        let Some(log) = &self.collab.audit else {
            return;
        };
        let (kind, flags) = match decision {
            Decision::Forced(flags) => (EscalationKind::Forced, flags.clone()),
            _ => (EscalationKind::Upstream, Vec::new()),
        };
        let entry = Escalation {
            session_id: action.session_id,
            kind,
            category: action.category,
            rationale: &action.rationale,
            flags,
            driver_text: &action.driver_input,
        };
        if let Err(e) = log.append(entry, at) {
            tracing::error!(error = %e, action_id = %action.id, "escalation audit append failed");
        }
    }

    /// Close the session as acknowledged (completed) or disputed.
    pub async fn end_session(
        &self,
        caller: Option<&Caller>,
        session_id: SessionId,
        outcome: OutcomeKind,
    ) -> Result<CoachingSession, CoachError> {
        require(caller)?;
        let session = self
            .collab
            .store
            .end_session(session_id, outcome, Utc::now())
            .await?;
        tracing::info!(%session_id, status = %session.status, "coaching session ended");
        Ok(session)
    }

    pub async fn session(
        &self,
        caller: Option<&Caller>,
        session_id: SessionId,
    ) -> Result<CoachingSession, CoachError> {
        require(caller)?;
        self.collab
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("session {session_id}")))
    }

    /// One ingestion pass: fetch recent exception events, ingest each, then
    /// refresh the driver directory once per distinct driver.
    pub async fn poll_telemetry(&self) -> Result<PollSummary, CoachError> {
        let now = Utc::now();
        let fetched =
            fetch_exception_events(self.collab.telemetry.as_ref(), &self.settings.poll, now)
                .await
                .map_err(|e| CoachError::UpstreamUnavailable(e.to_string()))?;

        let total = fetched.len();
        let mut new = 0;
        let mut seen = HashSet::new();
        let mut directory = Vec::new();
        for event in fetched {
            if !event.driver_id.is_empty() && seen.insert(event.driver_id.clone()) {
                directory.push((
                    event.driver_id.clone(),
                    event.driver_name.clone(),
                    event.vehicle_name.clone(),
                ));
            }
            if self.events.ingest(event).await?.created {
                new += 1;
            }
        }
        for (id, name, device) in directory {
            self.collab.store.upsert_driver(&id, &name, &device, now).await?;
        }

        tracing::info!(total, new, "telemetry poll complete");
        Ok(PollSummary { total, new })
    }

    pub async fn transcribe(
        &self,
        caller: Option<&Caller>,
        audio: &[u8],
        language: Option<&str>,
    ) -> Result<String, CoachError> {
        require(caller)?;
        if audio.is_empty() {
            return Err(CoachError::InvalidRequest("audio is required".into()));
        }
        self.collab
            .recognizer
            .transcribe(audio, language.unwrap_or(DEFAULT_LANGUAGE))
            .await
            .map_err(|e| CoachError::UpstreamUnavailable(e.to_string()))
    }

    /// Synthesize `text` and return the stored audio reference.
    pub async fn tts_proxy(&self, text: &str, language: Option<&str>) -> Result<String, CoachError> {
        if text.trim().is_empty() {
            return Err(CoachError::InvalidRequest("text is required".into()));
        }
        let language = language.filter(|l| !l.is_empty()).unwrap_or(DEFAULT_LANGUAGE);
        let bytes = self
            .collab
            .synthesizer
            .synthesize(text, language)
            .await
            .map_err(|e| CoachError::UpstreamUnavailable(e.to_string()))?;
        let name = format!("tts_{}", Uuid::new_v4().simple());
        self.collab
            .audio
            .put(&name, bytes)
            .await
            .map_err(|e| CoachError::UpstreamUnavailable(e.to_string()))
    }

    pub async fn fleet_analytics(&self) -> FleetAnalytics {
        fetch_fleet_analytics(self.collab.analytics.as_ref()).await
    }

    pub async fn list_actions(
        &self,
        caller: Option<&Caller>,
        status: Option<ActionStatus>,
    ) -> Result<Vec<Action>, CoachError> {
        require(caller)?;
        Ok(self.collab.store.actions(status).await?)
    }

    /// Mark a pending action reviewed or dismissed; the caller is recorded as resolver.
    pub async fn resolve_action(
        &self,
        caller: Option<&Caller>,
        action_id: ActionId,
        resolution: ActionStatus,
    ) -> Result<Action, CoachError> {
        let caller = require(caller)?;
        if resolution == ActionStatus::Pending {
            return Err(CoachError::InvalidRequest(
                "an action can only be resolved as reviewed or dismissed".into(),
            ));
        }
        Ok(self
            .collab
            .store
            .resolve_action(action_id, resolution, &caller.uid, Utc::now())
            .await?)
    }

    pub async fn drivers(&self, caller: Option<&Caller>) -> Result<Vec<Driver>, CoachError> {
        require(caller)?;
        Ok(self.collab.store.drivers().await?)
    }
}
