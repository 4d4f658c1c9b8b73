//! Process configuration: optional YAML file, then environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use fleetcoach_telemetry::{EnrichSettings, InsightSettings, PollWindow, TelemetryCredentials};
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::OrchestratorSettings;

pub const CONFIG_ENV: &str = "FLEETCOACH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("cannot parse config: {0}")]
    Parse(String),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("cannot start collaborator {name}: {reason}")]
    Collaborator { name: &'static str, reason: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub server: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl TelemetryConfig {
    /// All four values, or nothing.
    pub fn credentials(&self) -> Option<TelemetryCredentials> {
        Some(TelemetryCredentials {
            server: self.server.clone()?,
            database: self.database.clone()?,
            username: self.username.clone()?,
            password: self.password.clone()?,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// OpenAI-compatible base URL, e.g. `http://localhost:8000/v1`. Unset runs the template generator.
    pub url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub script_temperature: f32,
    pub conversation_temperature: f32,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: "gemini-2.0-flash".into(),
            api_key: None,
            script_temperature: 0.7,
            conversation_temperature: 0.8,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Where synthesized audio is written.
    pub audio_dir: PathBuf,
    /// Prefix of the references handed to clients.
    pub public_base: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            audio_dir: PathBuf::from("./audio"),
            public_base: "/audio".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub enabled: bool,
    pub initial_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub max_attempts: usize,
    pub timeout_secs: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_wait_secs: 10,
            poll_interval_secs: 8,
            max_attempts: 6,
            timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub listen: String,
    /// JSON document store; unset keeps everything in memory.
    pub store_path: Option<PathBuf>,
    pub telemetry: TelemetryConfig,
    pub narrative: NarrativeConfig,
    pub speech: SpeechConfig,
    /// OData connector host prefix or service root; uses the telemetry credentials.
    pub odata_server: Option<String>,
    pub audit_log: Option<PathBuf>,
    pub cluster_radius_m: f64,
    pub batch_size: usize,
    pub insight: InsightConfig,
    pub poll_lookback_hours: i64,
    pub poll_limit: usize,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7000".into(),
            store_path: None,
            telemetry: TelemetryConfig::default(),
            narrative: NarrativeConfig::default(),
            speech: SpeechConfig::default(),
            odata_server: None,
            audit_log: None,
            cluster_radius_m: fleetcoach_geo::DEFAULT_CLUSTER_RADIUS_M,
            batch_size: 20,
            insight: InsightConfig::default(),
            poll_lookback_hours: 24,
            poll_limit: 100,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

impl CoachConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `$FLEETCOACH_CONFIG` if set, else defaults; then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))?;
        Ok(cfg)
    }

    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = var("FLEETCOACH_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = var("FLEETCOACH_STORE") {
            self.store_path = Some(v.into());
        }
        if let Some(v) = var("FLEETCOACH_AUDIT_FILE") {
            self.audit_log = Some(v.into());
        }

        let t = &mut self.telemetry;
        for (key, slot) in [
            ("TELEMETRY_SERVER", &mut t.server),
            ("TELEMETRY_DATABASE", &mut t.database),
            ("TELEMETRY_USERNAME", &mut t.username),
            ("TELEMETRY_PASSWORD", &mut t.password),
        ] {
            if let Some(v) = var(key) {
                *slot = Some(v);
            }
        }
        if let Some(v) = var("ODATA_SERVER") {
            self.odata_server = Some(v);
        }

        if let Some(v) = var("LLM_URL") {
            self.narrative.url = Some(v);
        }
        if let Some(v) = var("LLM_MODEL") {
            self.narrative.model = v;
        }
        if let Some(v) = var("LLM_API_KEY") {
            self.narrative.api_key = Some(v);
        }

        if let Some(v) = var("SPEECH_URL") {
            self.speech.url = Some(v);
        }
        if let Some(v) = var("SPEECH_API_KEY") {
            self.speech.api_key = Some(v);
        }
        if let Some(v) = var("FLEETCOACH_AUDIO_DIR") {
            self.speech.audio_dir = v.into();
        }

        if let Some(v) = var("CLUSTER_RADIUS_M") {
            self.cluster_radius_m = parsed("CLUSTER_RADIUS_M", v)?;
        }
        if let Some(v) = var("TELEMETRY_BATCH_SIZE") {
            self.batch_size = parsed("TELEMETRY_BATCH_SIZE", v)?;
        }
        if let Some(v) = var("INSIGHT_ENABLED") {
            self.insight.enabled = flag("INSIGHT_ENABLED", v)?;
        }
        Ok(())
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            cluster_radius_m: self.cluster_radius_m,
            enrich: EnrichSettings {
                batch_size: self.batch_size.max(1),
                ..EnrichSettings::default()
            },
            insight: InsightSettings {
                inquiry_enabled: self.insight.enabled,
                initial_wait: StdDuration::from_secs(self.insight.initial_wait_secs),
                poll_interval: StdDuration::from_secs(self.insight.poll_interval_secs),
                max_attempts: self.insight.max_attempts,
                inquiry_timeout: StdDuration::from_secs(self.insight.timeout_secs),
                ..InsightSettings::default()
            },
            poll: PollWindow {
                lookback: Duration::hours(self.poll_lookback_hours),
                limit: self.poll_limit,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_fills_only_what_it_names() {
        let cfg = CoachConfig::from_yaml(
            "listen: 127.0.0.1:9000\ncluster_radius_m: 150\ninsight:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert_eq!(cfg.cluster_radius_m, 150.0);
        assert!(!cfg.insight.enabled);
        assert_eq!(cfg.insight.max_attempts, 6);
        assert_eq!(cfg.batch_size, 20);
        assert_eq!(cfg.poll_limit, 100);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = CoachConfig::from_yaml("telemetry:\n  server: my.example.com\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("TELEMETRY_DATABASE", "acme"),
            ("TELEMETRY_USERNAME", "ops"),
            ("TELEMETRY_PASSWORD", "pw"),
            ("TELEMETRY_BATCH_SIZE", "5"),
            ("LLM_URL", "http://localhost:8000/v1"),
        ]
        .into_iter()
        .collect();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        let creds = cfg.telemetry.credentials().unwrap();
        assert_eq!(creds.server, "my.example.com");
        assert_eq!(creds.database, "acme");
        assert_eq!(cfg.settings().enrich.batch_size, 5);
        assert_eq!(cfg.narrative.url.as_deref(), Some("http://localhost:8000/v1"));
    }

    #[test]
    fn partial_credentials_are_no_credentials() {
        let cfg = CoachConfig::from_yaml("telemetry:\n  server: my.example.com\n").unwrap();
        assert!(cfg.telemetry.credentials().is_none());
    }

    #[test]
    fn bad_numbers_are_reported_with_their_key() {
        let mut cfg = CoachConfig::default();
        let err = cfg
            .apply_env(|k| (k == "CLUSTER_RADIUS_M").then(|| "wide".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for CLUSTER_RADIUS_M: \"wide\"");
    }

    #[test]
    fn settings_carry_insight_timings() {
        let s = CoachConfig::default().settings();
        assert_eq!(s.cluster_radius_m, 300.0);
        assert_eq!(s.insight.inquiry_timeout, StdDuration::from_secs(60));
        assert_eq!(s.insight.poll_interval, StdDuration::from_secs(8));
        assert_eq!(s.poll.limit, 100);
    }
}
