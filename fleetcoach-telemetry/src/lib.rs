//! Telemetry platform access: exception events, reference entities, positional
//! and posted-speed samples, and the AI inquiry service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod rules;
pub use rules::RuleCatalog;

pub mod enrich;
pub use enrich::{ChunkWarning, EnrichSettings, Enrichment, TelemetryEnricher};

pub mod ingest;
pub use ingest::{fetch_exception_events, PollWindow};

pub mod insight;
pub use insight::{DriverContextLookup, InsightSettings};

pub mod rpc;
pub use rpc::{HttpTelemetryClient, TelemetryCredentials};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry transport error: {0}")]
    Transport(String),
    #[error("telemetry api error: {0}")]
    Api(String),
    #[error("telemetry response could not be decoded: {0}")]
    Decode(String),
    #[error("telemetry request timed out")]
    Timeout,
}

/// Reference to another entity. The platform sends either `{"id": "..."}` or a bare id string.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityRef {
    pub id: String,
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Object { id: String },
            Bare(String),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Object { id } | Repr::Bare(id) => EntityRef { id },
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExceptionEvent {
    pub id: String,
    pub active_from: DateTime<Utc>,
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub device: Option<EntityRef>,
    #[serde(default)]
    pub driver: Option<EntityRef>,
    #[serde(default)]
    pub rule: Option<EntityRef>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One GPS log sample. Speed is km/h.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub date_time: DateTime<Utc>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
}

/// Posted speed limit sample (`k` = time, `v` = km/h).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RoadSpeed {
    pub k: DateTime<Utc>,
    pub v: f64,
}

/// Samples carry a timestamp that nearest-timestamp matching compares against.
pub trait Timed {
    fn at(&self) -> DateTime<Utc>;
}

impl Timed for LogRecord {
    fn at(&self) -> DateTime<Utc> {
        self.date_time
    }
}

impl Timed for RoadSpeed {
    fn at(&self) -> DateTime<Utc> {
        self.k
    }
}

/// Time window of samples requested for one device.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    pub device_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionSearch {
    pub device_id: Option<String>,
    pub from: DateTime<Utc>,
    pub limit: usize,
}

/// The telemetry platform. Construct one per process and share it.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    async fn exception_events(
        &self,
        search: ExceptionSearch,
    ) -> Result<Vec<RawExceptionEvent>, TelemetryError>;

    async fn devices(&self) -> Result<Vec<Device>, TelemetryError>;

    async fn users(&self) -> Result<Vec<User>, TelemetryError>;

    async fn rules(&self) -> Result<Vec<Rule>, TelemetryError>;

    /// One multi-request call; result `i` holds the log records inside `windows[i]`.
    async fn log_records(
        &self,
        windows: &[SampleWindow],
    ) -> Result<Vec<Vec<LogRecord>>, TelemetryError>;

    /// One multi-request call; result `i` holds the posted limits inside `windows[i]`.
    async fn road_max_speeds(
        &self,
        windows: &[SampleWindow],
    ) -> Result<Vec<Vec<RoadSpeed>>, TelemetryError>;

    /// Raw call into the AI inquiry service. Returns the `result` payload.
    async fn ace(
        &self,
        function: &str,
        parameters: serde_json::Value,
    ) -> Result<serde_json::Value, TelemetryError>;
}

/// Platform with no data: every lookup is empty, the inquiry service is unavailable.
pub struct NullTelemetryClient;

#[async_trait]
impl TelemetryClient for NullTelemetryClient {
    async fn exception_events(
        &self,
        _search: ExceptionSearch,
    ) -> Result<Vec<RawExceptionEvent>, TelemetryError> {
        Ok(Vec::new())
    }

    async fn devices(&self) -> Result<Vec<Device>, TelemetryError> {
        Ok(Vec::new())
    }

    async fn users(&self) -> Result<Vec<User>, TelemetryError> {
        Ok(Vec::new())
    }

    async fn rules(&self) -> Result<Vec<Rule>, TelemetryError> {
        Ok(Vec::new())
    }

    async fn log_records(
        &self,
        windows: &[SampleWindow],
    ) -> Result<Vec<Vec<LogRecord>>, TelemetryError> {
        Ok(vec![Vec::new(); windows.len()])
    }

    async fn road_max_speeds(
        &self,
        windows: &[SampleWindow],
    ) -> Result<Vec<Vec<RoadSpeed>>, TelemetryError> {
        Ok(vec![Vec::new(); windows.len()])
    }

    async fn ace(
        &self,
        _function: &str,
        _parameters: serde_json::Value,
    ) -> Result<serde_json::Value, TelemetryError> {
        Err(TelemetryError::Api("NullTelemetryClient has no inquiry service".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_refs_accept_objects_and_bare_ids() {
        let raw = r#"{
            "id": "a1",
            "activeFrom": "2026-03-02T14:15:00Z",
            "duration": "00:00:04",
            "device": {"id": "b1"},
            "driver": "UnknownDriverId",
            "rule": {"id": "RuleHarshBrakingId"}
        }"#;
        let ev: RawExceptionEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.device.unwrap().id, "b1");
        assert_eq!(ev.driver.unwrap().id, "UnknownDriverId");
        assert!(ev.state.is_none());
    }

    #[test]
    fn user_display_name_trims() {
        let u = User {
            id: "u1".into(),
            first_name: "Sam".into(),
            last_name: String::new(),
        };
        assert_eq!(u.display_name(), "Sam");
    }
}
