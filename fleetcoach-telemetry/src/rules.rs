use std::collections::HashMap;

use fleetcoach_types::EventCategory;

use crate::Rule;

/// Built-in platform rule ids and their display names.
pub const BUILTIN_RULES: &[(&str, &str)] = &[
    ("RuleHarshBrakingId", "Harsh Braking"),
    ("RuleHarshCorneringId", "Harsh Cornering"),
    ("RuleHardAccelerationId", "Hard Acceleration"),
    ("RulePostedSpeedingId", "Posted Speeding"),
    ("RuleSpeedingId", "Speeding"),
    ("RuleSeatbeltId", "Seatbelt"),
    ("RuleExcessiveIdlingId", "Excessive Idling"),
    ("RuleReverseId", "Reverse"),
    ("RuleAfterHoursUsageId", "After Hours Usage"),
    ("RuleJackrabbitStartsId", "Jackrabbit Starts"),
    ("RuleLongDrivingId", "Long Driving Without Rest"),
    ("RulePassengerSeatbeltId", "Passenger Seatbelt"),
];

pub fn builtin_rule_name(rule_id: &str) -> Option<&'static str> {
    BUILTIN_RULES
        .iter()
        .find(|(id, _)| *id == rule_id)
        .map(|(_, name)| *name)
}

pub fn is_builtin(rule_id: &str) -> bool {
    builtin_rule_name(rule_id).is_some()
}

/// Coaching category for a rule display name.
pub fn category_for(rule_name: &str) -> EventCategory {
    match rule_name {
        "Harsh Braking" => EventCategory::HardBrake,
        "Harsh Cornering" => EventCategory::HarshCornering,
        "Hard Acceleration" | "Jackrabbit Starts" => EventCategory::HardAcceleration,
        "Posted Speeding" | "Speeding" | "Max Speed" => EventCategory::Speeding,
        "Seatbelt" | "Passenger Seatbelt" => EventCategory::Seatbelt,
        "Excessive Idling" => EventCategory::ExcessiveIdling,
        "Reverse" => EventCategory::Reverse,
        "After Hours Usage" => EventCategory::AfterHours,
        "Long Driving Without Rest" => EventCategory::Fatigue,
        other if other.to_lowercase().contains("speed") => EventCategory::Speeding,
        _ => EventCategory::Other,
    }
}

/// Rule id → display name, built-ins first, extended with the fleet's custom rules.
#[derive(Clone, Debug, Default)]
pub struct RuleCatalog {
    custom: HashMap<String, String>,
}

impl RuleCatalog {
    pub fn new(custom_rules: Vec<Rule>) -> Self {
        Self {
            custom: custom_rules
                .into_iter()
                .filter(|r| !r.name.is_empty())
                .map(|r| (r.id, r.name))
                .collect(),
        }
    }

    pub fn name(&self, rule_id: &str) -> Option<String> {
        builtin_rule_name(rule_id)
            .map(str::to_string)
            .or_else(|| self.custom.get(rule_id).cloned())
    }
}
