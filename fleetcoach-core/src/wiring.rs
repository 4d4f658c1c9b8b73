//! Builds the collaborator set a config asks for. Anything left unconfigured
//! gets its null or local implementation.

use std::sync::Arc;

use fleetcoach_analytics::{AnalyticsSource, NullAnalytics, ODataClient, ODataCredentials};
use fleetcoach_audit::AuditLog;
use fleetcoach_narrative::{HttpNarrativeGenerator, NarrativeGenerator, TemplateNarrative};
use fleetcoach_speech::{
    FsAudioStore, HttpSpeechService, NullSpeech, SpeechRecognizer, SpeechSynthesizer,
};
use fleetcoach_store::{FileStore, MemoryStore, Store};
use fleetcoach_telemetry::{HttpTelemetryClient, NullTelemetryClient, TelemetryClient};

use crate::config::{CoachConfig, ConfigError};
use crate::orchestrator::Collaborators;

fn collaborator(name: &'static str) -> impl Fn(String) -> ConfigError {
    move |reason| ConfigError::Collaborator { name, reason }
}

pub fn collaborators(cfg: &CoachConfig) -> Result<Collaborators, ConfigError> {
    let store: Arc<dyn Store> = match &cfg.store_path {
        Some(path) => Arc::new(
            FileStore::open(path).map_err(|e| collaborator("store")(e.to_string()))?,
        ),
        None => {
            tracing::warn!("no store path configured, sessions live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let credentials = cfg.telemetry.credentials();
    let telemetry: Arc<dyn TelemetryClient> = match &credentials {
        Some(c) => Arc::new(
            HttpTelemetryClient::new(c.clone())
                .map_err(|e| collaborator("telemetry")(e.to_string()))?,
        ),
        None => {
            tracing::warn!("telemetry credentials incomplete, using the null client");
            Arc::new(NullTelemetryClient)
        }
    };

    let analytics: Arc<dyn AnalyticsSource> = match (&cfg.odata_server, &credentials) {
        (Some(server), Some(c)) => Arc::new(
            ODataClient::new(ODataCredentials {
                server: server.clone(),
                database: c.database.clone(),
                username: c.username.clone(),
                password: c.password.clone(),
            })
            .map_err(|e| collaborator("analytics")(e.to_string()))?,
        ),
        _ => Arc::new(NullAnalytics),
    };

    let narrative: Arc<dyn NarrativeGenerator> = match &cfg.narrative.url {
        Some(url) => Arc::new(
            HttpNarrativeGenerator::new(url.clone(), cfg.narrative.model.clone())
                .with_api_key(cfg.narrative.api_key.clone())
                .with_temperatures(
                    cfg.narrative.script_temperature,
                    cfg.narrative.conversation_temperature,
                ),
        ),
        None => {
            tracing::warn!("no narrative endpoint configured, using fixed coaching text");
            Arc::new(TemplateNarrative)
        }
    };

    let (synthesizer, recognizer) = match &cfg.speech.url {
        Some(url) => {
            let svc = Arc::new(HttpSpeechService::new(url.clone(), cfg.speech.api_key.clone()));
            (
                svc.clone() as Arc<dyn SpeechSynthesizer>,
                svc as Arc<dyn SpeechRecognizer>,
            )
        }
        None => {
            tracing::warn!("no speech endpoint configured, turns carry text only");
            (
                Arc::new(NullSpeech) as Arc<dyn SpeechSynthesizer>,
                Arc::new(NullSpeech) as Arc<dyn SpeechRecognizer>,
            )
        }
    };
    let audio = Arc::new(FsAudioStore::new(
        cfg.speech.audio_dir.clone(),
        cfg.speech.public_base.clone(),
    ));

    let audit = match &cfg.audit_log {
        Some(path) => Some(Arc::new(
            AuditLog::open(path).map_err(|e| collaborator("audit")(e.to_string()))?,
        )),
        None => None,
    };

    Ok(Collaborators {
        store,
        telemetry,
        narrative,
        synthesizer,
        recognizer,
        audio,
        analytics,
        audit,
    })
}
