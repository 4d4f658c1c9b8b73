//! Nearest-timestamp join of exception events against GPS and posted-limit samples.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fleetcoach_types::{EventCategory, GeoPoint, SafetyEvent};
use serde::Serialize;

use crate::{LogRecord, RoadSpeed, SampleWindow, TelemetryClient, TelemetryError, Timed};

#[derive(Clone, Debug)]
pub struct EnrichSettings {
    /// Maximum requests per multi-request call.
    pub batch_size: usize,
    pub position_before: Duration,
    pub position_after: Duration,
    pub speed_limit_before: Duration,
    pub speed_limit_after: Duration,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            position_before: Duration::seconds(30),
            position_after: Duration::seconds(30),
            speed_limit_before: Duration::seconds(10),
            speed_limit_after: Duration::seconds(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    Position,
    SpeedLimit,
}

/// A chunk whose multi-request call failed; its events were left unenriched.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChunkWarning {
    pub lookup: Lookup,
    pub chunk: usize,
    pub size: usize,
    pub error: String,
}

#[derive(Clone, Debug)]
pub struct Enrichment {
    pub events: Vec<SafetyEvent>,
    pub warnings: Vec<ChunkWarning>,
}

/// Instant the samples are looked up around.
///
/// Multi-day monitoring windows resolve to their end: the meaningful fix is at completion.
pub fn lookup_instant(event: &SafetyEvent) -> DateTime<Utc> {
    match event.timespan() {
        Some(span) if span.is_multi_day() => event
            .occurred_at
            .checked_add_signed(span.total())
            .unwrap_or(event.occurred_at),
        _ => event.occurred_at,
    }
}

/// Sample with the smallest absolute time difference to `reference`; ties keep the earliest in input order.
pub fn nearest<T: Timed>(samples: &[T], reference: DateTime<Utc>) -> Option<&T> {
    samples
        .iter()
        .min_by_key(|s| (s.at() - reference).num_milliseconds().abs())
}

pub struct TelemetryEnricher {
    client: Arc<dyn TelemetryClient>,
    settings: EnrichSettings,
}

impl TelemetryEnricher {
    pub fn new(client: Arc<dyn TelemetryClient>) -> Self {
        Self {
            client,
            settings: EnrichSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EnrichSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach the nearest position to every event with a vehicle, and the
    /// nearest posted limit to speeding events. Never fails: a failed chunk
    /// leaves its events as they were and is reported in `warnings`.
    pub async fn enrich(&self, mut events: Vec<SafetyEvent>) -> Enrichment {
        let mut warnings = Vec::new();

        let (indices, windows) = self.windows(&events, |_| true, |s| {
            (s.position_before, s.position_after)
        });
        let client = Arc::clone(&self.client);
        let positions = self
            .batched(
                Lookup::Position,
                windows,
                |chunk| {
                    let client = Arc::clone(&client);
                    async move { client.log_records(&chunk).await }
                },
                &mut warnings,
            )
            .await;
        for (idx, records) in indices.iter().zip(positions) {
            apply_position(&mut events[*idx], &records);
        }

        let (indices, windows) = self.windows(
            &events,
            |e| e.category == EventCategory::Speeding,
            |s| (s.speed_limit_before, s.speed_limit_after),
        );
        let limits = self
            .batched(
                Lookup::SpeedLimit,
                windows,
                |chunk| {
                    let client = Arc::clone(&client);
                    async move { client.road_max_speeds(&chunk).await }
                },
                &mut warnings,
            )
            .await;
        for (idx, speeds) in indices.iter().zip(limits) {
            apply_speed_limit(&mut events[*idx], &speeds);
        }

        Enrichment { events, warnings }
    }

    fn windows(
        &self,
        events: &[SafetyEvent],
        wanted: impl Fn(&SafetyEvent) -> bool,
        span: impl Fn(&EnrichSettings) -> (Duration, Duration),
    ) -> (Vec<usize>, Vec<SampleWindow>) {
        let (before, after) = span(&self.settings);
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| wanted(e))
            .filter_map(|(i, e)| {
                let device_id = e.vehicle_id.clone()?;
                let at = lookup_instant(e);
                Some((
                    i,
                    SampleWindow {
                        device_id,
                        from: at - before,
                        to: at + after,
                    },
                ))
            })
            .unzip()
    }

    /// Issue `windows` in chunks of `batch_size`, one call per chunk, sequentially.
    async fn batched<T, F, Fut>(
        &self,
        lookup: Lookup,
        windows: Vec<SampleWindow>,
        fetch: F,
        warnings: &mut Vec<ChunkWarning>,
    ) -> Vec<Vec<T>>
    where
        F: Fn(Vec<SampleWindow>) -> Fut,
        Fut: Future<Output = Result<Vec<Vec<T>>, TelemetryError>>,
    {
        let mut out = Vec::with_capacity(windows.len());
        for (chunk_no, chunk) in windows.chunks(self.settings.batch_size.max(1)).enumerate() {
            let size = chunk.len();
            match fetch(chunk.to_vec()).await {
                Ok(mut results) => {
                    if results.len() != size {
                        tracing::warn!(
                            ?lookup,
                            chunk = chunk_no,
                            expected = size,
                            got = results.len(),
                            "telemetry batch returned a mismatched result count"
                        );
                        results.resize_with(size, Vec::new);
                    }
                    out.extend(results);
                }
                Err(e) => {
                    tracing::warn!(
                        ?lookup,
                        chunk = chunk_no,
                        size,
                        error = %e,
                        "telemetry batch failed, continuing with empty samples"
                    );
                    warnings.push(ChunkWarning {
                        lookup,
                        chunk: chunk_no,
                        size,
                        error: e.to_string(),
                    });
                    out.extend((0..size).map(|_| Vec::new()));
                }
            }
        }
        out
    }
}

fn apply_position(event: &mut SafetyEvent, records: &[LogRecord]) {
    let Some(record) = nearest(records, event.occurred_at) else {
        return;
    };
    event.speed_kmh = Some(record.speed);
    let point = GeoPoint::new(record.latitude, record.longitude);
    // (0, 0) is how devices report "no fix". A genuine reading there is lost.
    event.position = (!point.is_null_island()).then_some(point);
}

fn apply_speed_limit(event: &mut SafetyEvent, speeds: &[RoadSpeed]) {
    if let Some(limit) = nearest(speeds, event.occurred_at).filter(|s| s.v > 0.0) {
        event.speed_limit_kmh = Some(limit.v);
    }
}
