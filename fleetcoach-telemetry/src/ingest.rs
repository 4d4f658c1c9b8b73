use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use fleetcoach_types::{CoachingStatus, SafetyEvent};
use futures_util::future::try_join;
use uuid::Uuid;

use crate::rules::{category_for, is_builtin};
use crate::{
    Device, ExceptionSearch, RawExceptionEvent, Rule, RuleCatalog, TelemetryClient,
    TelemetryError, User,
};

#[derive(Clone, Debug)]
pub struct PollWindow {
    pub lookback: Duration,
    pub limit: usize,
}

impl Default for PollWindow {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            limit: 100,
        }
    }
}

/// Fetch recent exception events and resolve them into pending safety events.
///
/// Reference entities are fetched concurrently. The custom rule list is only
/// requested when some event carries a rule id outside the built-in catalog.
pub async fn fetch_exception_events(
    client: &dyn TelemetryClient,
    window: &PollWindow,
    now: DateTime<Utc>,
) -> Result<Vec<SafetyEvent>, TelemetryError> {
    let raw = client
        .exception_events(ExceptionSearch {
            device_id: None,
            from: now - window.lookback,
            limit: window.limit,
        })
        .await?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let needs_custom_rules = raw
        .iter()
        .filter_map(|e| e.rule.as_ref())
        .any(|r| !is_builtin(&r.id));

    let ((devices, users), rules) = try_join(try_join(client.devices(), client.users()), async {
        if needs_custom_rules {
            client.rules().await
        } else {
            Ok(Vec::new())
        }
    })
    .await?;

    let resolver = Resolver::new(devices, users, rules);
    let events: Vec<SafetyEvent> = raw.into_iter().map(|e| resolver.resolve(e, now)).collect();
    tracing::debug!(count = events.len(), "resolved exception events");
    Ok(events)
}

struct Resolver {
    devices: HashMap<String, Device>,
    users: HashMap<String, User>,
    rules: RuleCatalog,
}

impl Resolver {
    fn new(devices: Vec<Device>, users: Vec<User>, rules: Vec<Rule>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            rules: RuleCatalog::new(rules),
        }
    }

    fn resolve(&self, raw: RawExceptionEvent, now: DateTime<Utc>) -> SafetyEvent {
        let vehicle_id = raw.device.map(|d| d.id);
        let device = vehicle_id.as_ref().and_then(|id| self.devices.get(id));
        let driver_ref = raw.driver.map(|d| d.id);
        let user = driver_ref.as_ref().and_then(|id| self.users.get(id));
        let rule_id = raw.rule.map(|r| r.id);

        let rule_name = match &rule_id {
            Some(id) => self.rules.name(id).unwrap_or_else(|| id.clone()),
            None => "Safety Event".to_string(),
        };
        let driver_name = user
            .map(User::display_name)
            .filter(|n| !n.is_empty())
            .or_else(|| device.map(|d| d.name.clone()).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| "Unknown Driver".to_string());
        let driver_id = driver_ref
            .or_else(|| vehicle_id.clone())
            .unwrap_or_else(|| "unknown".to_string());

        SafetyEvent {
            id: Uuid::new_v4(),
            external_id: raw.id,
            driver_id,
            driver_name,
            vehicle_name: device
                .map(|d| d.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown Vehicle".to_string()),
            vehicle_id,
            category: category_for(&rule_name),
            rule_id,
            rule_name,
            occurred_at: raw.active_from,
            duration: raw.duration,
            distance_m: raw.distance,
            position: None,
            speed_kmh: None,
            speed_limit_kmh: None,
            state: raw.state,
            coaching_status: CoachingStatus::Pending,
            created_at: now,
        }
    }
}
