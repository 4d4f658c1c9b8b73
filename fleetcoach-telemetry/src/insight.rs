//! Recent-history context for a driver's coaching session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use fleetcoach_types::SafetyEvent;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::rules::builtin_rule_name;
use crate::{ExceptionSearch, RawExceptionEvent, TelemetryClient, TelemetryError};

pub const CONTEXT_UNAVAILABLE: &str = "Unable to fetch driver context.";

#[derive(Clone, Debug)]
pub struct InsightSettings {
    pub lookback: Duration,
    pub limit: usize,
    /// Ask the inquiry service for an insight on top of the event count.
    pub inquiry_enabled: bool,
    pub initial_wait: StdDuration,
    pub poll_interval: StdDuration,
    pub max_attempts: usize,
    /// Cap on the whole inquiry, all steps included.
    pub inquiry_timeout: StdDuration,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            lookback: Duration::days(7),
            limit: 50,
            inquiry_enabled: true,
            initial_wait: StdDuration::from_secs(10),
            poll_interval: StdDuration::from_secs(8),
            max_attempts: 6,
            inquiry_timeout: StdDuration::from_secs(60),
        }
    }
}

pub struct DriverContextLookup {
    client: Arc<dyn TelemetryClient>,
    settings: InsightSettings,
}

impl DriverContextLookup {
    pub fn new(client: Arc<dyn TelemetryClient>, settings: InsightSettings) -> Self {
        Self { client, settings }
    }

    /// Recent-history paragraph for the vehicle behind `event`. Never fails.
    pub async fn driver_context(&self, event: &SafetyEvent, now: DateTime<Utc>) -> String {
        let Some(device_id) = event.vehicle_id.as_deref() else {
            return CONTEXT_UNAVAILABLE.to_string();
        };
        let mut context = match self.recent_breakdown(device_id, now).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, device_id, "driver context query failed");
                return CONTEXT_UNAVAILABLE.to_string();
            }
        };

        if self.settings.inquiry_enabled {
            match tokio::time::timeout(self.settings.inquiry_timeout, self.inquiry(event)).await {
                Ok(Ok(Some(insight))) => {
                    context.push_str(" AI insight: ");
                    context.push_str(&insight);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "inquiry skipped"),
                Err(_) => tracing::warn!(
                    timeout_secs = self.settings.inquiry_timeout.as_secs(),
                    "inquiry timed out"
                ),
            }
        }
        context
    }

    pub async fn recent_breakdown(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TelemetryError> {
        let recent = self
            .client
            .exception_events(ExceptionSearch {
                device_id: Some(device_id.to_string()),
                from: now - self.settings.lookback,
                limit: self.settings.limit,
            })
            .await?;
        Ok(describe_breakdown(&recent))
    }

    /// create-chat, send-prompt, then poll the message group.
    async fn inquiry(&self, event: &SafetyEvent) -> Result<Option<String>, TelemetryError> {
        let created: Vec<CreatedChat> = self.call("create-chat", json!({})).await?;
        let Some(chat_id) = created.into_iter().next().and_then(|c| c.chat_id) else {
            tracing::warn!("create-chat returned no chat id");
            return Ok(None);
        };

        let prompt = format!(
            "What are the safety patterns for vehicle {} over the last 7 days? Focus on {} events. \
             Return key insights about frequency and timing.",
            event.vehicle_name, event.rule_name
        );
        let sent: Vec<SentPrompt> = self
            .call("send-prompt", json!({ "chat_id": chat_id, "prompt": prompt }))
            .await?;
        let Some(group_id) = sent.into_iter().next().and_then(SentPrompt::group_id) else {
            tracing::warn!("send-prompt returned no message group id");
            return Ok(None);
        };

        tokio::time::sleep(self.settings.initial_wait).await;
        for attempt in 0..self.settings.max_attempts {
            let polled: Vec<Polled> = self
                .call(
                    "get-message-group",
                    json!({ "message_group_id": group_id }),
                )
                .await?;
            let group = polled.into_iter().next().and_then(|p| p.message_group);
            let status = group.as_ref().map(|g| g.status().to_string());
            match status.as_deref() {
                Some("DONE") => return Ok(group.and_then(|g| g.insight())),
                Some("FAILED") => {
                    tracing::warn!(attempt, "inquiry failed");
                    return Ok(None);
                }
                _ => tokio::time::sleep(self.settings.poll_interval).await,
            }
        }
        tracing::warn!(attempts = self.settings.max_attempts, "inquiry still running, giving up");
        Ok(None)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        parameters: serde_json::Value,
    ) -> Result<Vec<T>, TelemetryError> {
        let value = self.client.ace(function, parameters).await?;
        let envelope: Results<T> =
            serde_json::from_value(value).map_err(|e| TelemetryError::Decode(e.to_string()))?;
        Ok(envelope.results)
    }
}

/// "Driver has had N safety events in the past 7 days. Breakdown: A: 3, B: 1."
pub fn describe_breakdown(events: &[RawExceptionEvent]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for e in events {
        let Some(rule) = &e.rule else { continue };
        let name = builtin_rule_name(&rule.id).unwrap_or(rule.id.as_str());
        match counts.iter_mut().find(|(n, _)| n == name) {
            Some((_, c)) => *c += 1,
            None => counts.push((name.to_string(), 1)),
        }
    }
    // Stable: equal counts keep first-seen order.
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let mut text = format!(
        "Driver has had {} safety events in the past 7 days.",
        events.len()
    );
    if !counts.is_empty() {
        let parts: Vec<String> = counts
            .iter()
            .map(|(name, count)| format!("{name}: {count}"))
            .collect();
        text.push_str(&format!(" Breakdown: {}.", parts.join(", ")));
    }
    text
}

#[derive(Deserialize)]
struct Results<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Deserialize)]
struct CreatedChat {
    chat_id: Option<String>,
}

#[derive(Deserialize)]
struct GroupRef {
    id: String,
}

#[derive(Deserialize)]
struct SentPrompt {
    message_group_id: Option<String>,
    message_group: Option<GroupRef>,
}

impl SentPrompt {
    fn group_id(self) -> Option<String> {
        self.message_group_id
            .or_else(|| self.message_group.map(|g| g.id))
    }
}

#[derive(Deserialize)]
struct Polled {
    message_group: Option<MessageGroup>,
}

#[derive(Deserialize)]
struct GroupStatus {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct MessageGroup {
    status: Option<GroupStatus>,
    #[serde(default)]
    messages: BTreeMap<String, Message>,
}

#[derive(Deserialize)]
struct Message {
    reasoning: Option<String>,
    #[serde(default)]
    preview_array: Vec<serde_json::Value>,
}

impl MessageGroup {
    fn status(&self) -> &str {
        self.status.as_ref().map(|s| s.status.as_str()).unwrap_or("")
    }

    fn insight(self) -> Option<String> {
        let mut out = String::new();
        for msg in self.messages.into_values() {
            if let Some(reasoning) = msg.reasoning.filter(|r| !r.is_empty()) {
                out.push_str(&reasoning);
                out.push(' ');
            }
            if !msg.preview_array.is_empty() {
                let rows = &msg.preview_array[..msg.preview_array.len().min(3)];
                let rows = serde_json::to_string(rows).unwrap_or_default();
                out.push_str(&format!("Data: {rows} "));
            }
        }
        let out = out.trim();
        (!out.is_empty()).then(|| out.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, EntityRef, LogRecord, RoadSpeed, Rule, SampleWindow, User};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use fleetcoach_types::{CoachingStatus, EventCategory};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct Scripted {
        fail_count_query: bool,
        done_on_poll: Option<usize>,
        stall: bool,
        polls: AtomicUsize,
    }

    fn raw(rule: &str) -> RawExceptionEvent {
        RawExceptionEvent {
            id: Uuid::new_v4().to_string(),
            active_from: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            active_to: None,
            duration: None,
            distance: None,
            device: Some(EntityRef { id: "b1".into() }),
            driver: None,
            rule: Some(EntityRef { id: rule.into() }),
            state: None,
        }
    }

    #[async_trait]
    impl TelemetryClient for Scripted {
        async fn exception_events(
            &self,
            search: ExceptionSearch,
        ) -> Result<Vec<RawExceptionEvent>, TelemetryError> {
            if self.fail_count_query {
                return Err(TelemetryError::Transport("connection reset".into()));
            }
            assert_eq!(search.device_id.as_deref(), Some("b1"));
            assert_eq!(search.limit, 50);
            Ok(vec![
                raw("aCustom"),
                raw("RuleHarshBrakingId"),
                raw("RuleHarshBrakingId"),
                raw("RuleHarshBrakingId"),
            ])
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
            function: &str,
            parameters: serde_json::Value,
        ) -> Result<serde_json::Value, TelemetryError> {
            match function {
                "create-chat" => {
                    if self.stall {
                        tokio::time::sleep(StdDuration::from_secs(120)).await;
                    }
                    Ok(json!({ "results": [{ "chat_id": "c1" }] }))
                }
                "send-prompt" => {
                    assert_eq!(parameters["chat_id"], "c1");
                    Ok(json!({ "results": [{ "message_group": { "id": "g1" } }] }))
                }
                "get-message-group" => {
                    let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
                    if Some(n) == self.done_on_poll {
                        Ok(json!({ "results": [{ "message_group": {
                            "status": { "status": "DONE" },
                            "messages": { "m1": {
                                "reasoning": "Braking clusters around 7am.",
                                "preview_array": [1, 2, 3, 4]
                            } }
                        } }] }))
                    } else {
                        Ok(json!({ "results": [{ "message_group": {
                            "status": { "status": "PROCESSING" }
                        } }] }))
                    }
                }
                other => Err(TelemetryError::Api(format!("unexpected {other}"))),
            }
        }
    }

    fn event() -> SafetyEvent {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 14, 15, 0).unwrap();
        SafetyEvent {
            id: Uuid::new_v4(),
            external_id: "a1".into(),
            driver_id: "u1".into(),
            driver_name: "Sam Rivera".into(),
            vehicle_id: Some("b1".into()),
            vehicle_name: "Truck 7".into(),
            category: EventCategory::HardBrake,
            rule_id: Some("RuleHarshBrakingId".into()),
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

    fn lookup(client: Arc<Scripted>) -> DriverContextLookup {
        DriverContextLookup::new(client, InsightSettings::default())
    }

    const BREAKDOWN: &str =
        "Driver has had 4 safety events in the past 7 days. Breakdown: Harsh Braking: 3, aCustom: 1.";

    #[test]
    fn breakdown_without_rules_has_only_the_count() {
        assert_eq!(
            describe_breakdown(&[]),
            "Driver has had 0 safety events in the past 7 days."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn done_inquiry_is_appended() {
        let client = Arc::new(Scripted {
            done_on_poll: Some(2),
            ..Default::default()
        });
        let text = lookup(client.clone()).driver_context(&event(), Utc::now()).await;
        assert_eq!(
            text,
            format!("{BREAKDOWN} AI insight: Braking clusters around 7am. Data: [1,2,3]")
        );
        assert_eq!(client.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_polling_yields_breakdown_only() {
        let client = Arc::new(Scripted::default());
        let text = lookup(client.clone()).driver_context(&event(), Utc::now()).await;
        assert_eq!(text, BREAKDOWN);
        assert_eq!(client.polls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_inquiry_is_cut_off() {
        let client = Arc::new(Scripted {
            stall: true,
            done_on_poll: Some(1),
            ..Default::default()
        });
        let text = lookup(client.clone()).driver_context(&event(), Utc::now()).await;
        assert_eq!(text, BREAKDOWN);
        assert_eq!(client.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_count_query_yields_fallback() {
        let client = Arc::new(Scripted {
            fail_count_query: true,
            ..Default::default()
        });
        let text = lookup(client).driver_context(&event(), Utc::now()).await;
        assert_eq!(text, CONTEXT_UNAVAILABLE);
    }
}
