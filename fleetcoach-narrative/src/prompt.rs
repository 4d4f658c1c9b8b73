//! Prompt text for the narrative service.
//!
//! Speeds and distances are converted to display units here and nowhere else.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use fleetcoach_geo::cluster_label;
use fleetcoach_geo::units::{format_distance, format_speed, over_limit_mph};
use fleetcoach_types::{format_duration, SafetyEvent, Speaker};

use crate::{ConversationPrompt, ShiftPrompt};

pub const SYSTEM_PROMPT: &str = "\
You are the fleet safety coach: a colleague with perfect recall of the vehicle telemetry, \
on the driver's side and never punitive.

How you talk:
- Short, clear sentences. The driver is in a noisy cab.
- Two or three sentences per reply unless asked for more.
- Use the driver's first name now and then, not in every message.
- Point to concrete data (times, counts, speeds) when you have it. Frame patterns as \
\"what the data shows\".
- Praise good defensive driving as readily as you coach on incidents.
- No filler, no corporate phrasing. When an issue is settled, say so and stop.
- If a pattern needs organisational action (route or schedule change), mention it and \
offer to flag it for the supervisor.";

const RULES: &str = "\
RULES:
- Never mention coordinates, latitude or longitude.
- Never invent street, road or place names. You have no street-level data; refer the \
driver to the map.
- For speeding events always state the posted limit and how far over it the driver was.
- If speed data is missing for an event, say so plainly instead of guessing.";

/// First name used in prompts. Demo device names ("Demo - 01") become "Driver"
/// so the client can substitute the real name.
pub fn first_name(driver_name: &str) -> String {
    let is_demo = driver_name
        .get(..4)
        .is_some_and(|p| p.eq_ignore_ascii_case("demo"))
        && driver_name[4..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
    if is_demo {
        return "Driver".to_string();
    }
    driver_name
        .split_whitespace()
        .next()
        .unwrap_or("Driver")
        .to_string()
}

/// `"Mon 2:15 PM"`, in UTC.
pub fn event_time(at: DateTime<Utc>) -> String {
    at.format("%a %-I:%M %p").to_string()
}

/// Event counts per category, in first-seen order.
pub fn category_counts(events: &[SafetyEvent]) -> Vec<(&'static str, u32)> {
    let mut counts: Vec<(&'static str, u32)> = Vec::new();
    for e in events {
        let name = e.category.as_str();
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, c)) => *c += 1,
            None => counts.push((name, 1)),
        }
    }
    counts
}

pub fn event_breakdown(events: &[SafetyEvent]) -> BTreeMap<String, u32> {
    category_counts(events)
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect()
}

/// `"3 events: 2 hard_brake, 1 speeding"`
pub fn shift_summary_line(events: &[SafetyEvent]) -> String {
    let parts: Vec<String> = category_counts(events)
        .into_iter()
        .map(|(name, count)| format!("{count} {name}"))
        .collect();
    format!("{} events: {}", events.len(), parts.join(", "))
}

fn event_block(p: &ShiftPrompt<'_>, index: usize, event: &SafetyEvent) -> String {
    let mut lines = vec![
        format!("Event {} (ID: {}):", index + 1, event.id),
        format!("  - Rule: {}", event.rule_name),
        format!("  - Category: {}", event.category),
    ];

    let window_end = event
        .timespan()
        .filter(|s| s.is_multi_day())
        .and_then(|span| event.occurred_at.checked_add_signed(span.total()));
    match window_end {
        Some(end) => {
            lines.push(format!("  - Event start: {}", event_time(event.occurred_at)));
            lines.push(format!("  - Event end: {}", event_time(end)));
        }
        None => {
            lines.push(format!("  - When: {}", event_time(event.occurred_at)));
            lines.push(format!(
                "  - Duration: {}",
                format_duration(event.duration.as_deref())
            ));
        }
    }

    let location = match p.clusters.iter().position(|c| c.contains(index)) {
        Some(n) => format!(
            "location cluster {} ({} events at the same spot, visible on the driver's map)",
            cluster_label(n),
            p.clusters[n].event_indices.len()
        ),
        None if event.position.is_some() => "GPS fix available (shown on the driver's map)".into(),
        None => "unknown".into(),
    };
    lines.push(format!("  - Location: {location}"));

    if let Some(speed) = format_speed(event.speed_kmh) {
        lines.push(format!("  - Speed: {speed}"));
    }
    if let Some(limit) = format_speed(event.speed_limit_kmh) {
        lines.push(format!("  - Posted limit: {limit}"));
    }
    if let Some(over) = over_limit_mph(event.speed_kmh, event.speed_limit_kmh).filter(|o| *o > 0) {
        lines.push(format!("  - Over limit by: {over} mph"));
    }
    if let Some(distance) = format_distance(event.distance_m) {
        lines.push(format!("  - Distance: {distance}"));
    }
    lines.push(format!("  - Vehicle: {}", event.vehicle_name));
    lines.join("\n")
}

fn cluster_section(p: &ShiftPrompt<'_>) -> String {
    let mut out = String::from("LOCATION PATTERNS:\n");
    for (n, cluster) in p.clusters.iter().enumerate() {
        let numbers: Vec<String> = cluster
            .event_indices
            .iter()
            .map(|i| (i + 1).to_string())
            .collect();
        let mut rules: Vec<&str> = Vec::new();
        for &i in &cluster.event_indices {
            if let Some(e) = p.events.get(i) {
                if !rules.contains(&e.rule_name.as_str()) {
                    rules.push(&e.rule_name);
                }
            }
        }
        let _ = writeln!(
            out,
            "- Cluster {}: events {} happened at the same location ({} events). Types: {}. \
             This points at the location (signage, road layout, wrong limit data) rather than \
             the driver.",
            cluster_label(n),
            numbers.join(", "),
            cluster.event_indices.len(),
            rules.join(", ")
        );
    }
    out
}

pub fn shift_prompt(p: &ShiftPrompt<'_>) -> String {
    let first = first_name(p.driver_name);
    let breakdown = event_breakdown(p.events);
    let summary_line = shift_summary_line(p.events);
    let events: Vec<String> = p
        .events
        .iter()
        .enumerate()
        .map(|(i, e)| event_block(p, i, e))
        .collect();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "This is an end-of-shift coaching review. The driver had {} safety events this shift.\n",
        p.events.len()
    );
    let _ = writeln!(
        out,
        "DRIVER CONTEXT:\n{}\n",
        p.context.unwrap_or("No additional context available.")
    );
    let _ = writeln!(out, "SHIFT EVENTS:\n{}\n", events.join("\n\n"));
    if !p.clusters.is_empty() {
        let _ = writeln!(out, "{}", cluster_section(p));
    }
    let _ = writeln!(out, "DRIVER'S FIRST NAME: {first}\n");
    out.push_str(
        "TASK:\nOpen with the big picture: patterns across events, the most serious event, \
         and an overall assessment. Group similar events and call out the most serious one.\n",
    );
    if !p.clusters.is_empty() {
        out.push_str(
            "Location clusters were found. Lead with them, frame them as a possible problem \
             with the spot, and ask the driver what is going on there.\n",
        );
    }
    let _ = writeln!(out, "\n{RULES}");
    let _ = writeln!(
        out,
        "- The opening message is 4 to 6 sentences.\n\
         - Return exactly one eventSummaries entry per event, in the order listed above.\n"
    );
    let _ = write!(
        out,
        "Respond with JSON only:\n{{\n  \"initialMessage\": \"opening message using their first name\",\n  \
         \"summary\": \"{summary_line}\",\n  \"eventSummaries\": [{{\"eventId\": \"id\", \"type\": \"category\", \
         \"ruleName\": \"rule\", \"timestamp\": \"readable time\", \"location\": null, \
         \"severity\": \"low | medium | high\", \"oneLiner\": \"one sentence; for speeding include limit and excess mph\"}}],\n  \
         \"analysis\": {{\"overallSentiment\": \"needs_coaching | mixed | positive\", \"eventBreakdown\": {}, \
         \"patterns\": [], \"topConcern\": \"the single most important issue\", \
         \"recommendation\": {{\"type\": \"none | route_change | timing_adjustment | following_distance | training\", \
         \"details\": \"\", \"confidence\": 0.0}}}}\n}}",
        serde_json::to_string(&breakdown).unwrap_or_else(|_| "{}".into())
    );
    out
}

pub fn clean_shift_prompt(driver_name: &str) -> String {
    let first = first_name(driver_name);
    format!(
        "This is an end-of-shift check-in with a driver who had no safety events. Celebrate the \
         clean shift without overdoing it, and say you are around if they want to talk.\n\n\
         DRIVER'S FIRST NAME: {first}\n\n\
         Respond with JSON only:\n{{\n  \"initialMessage\": \"2 to 4 sentences using their first name\",\n  \
         \"summary\": \"Clean shift, no safety events\",\n  \"eventSummaries\": [],\n  \
         \"analysis\": {{\"overallSentiment\": \"positive\", \"eventBreakdown\": {{}}, \"patterns\": [], \
         \"topConcern\": null, \"recommendation\": {{\"type\": \"none\", \"details\": \"No concerns to address\", \
         \"confidence\": 1.0}}}}\n}}"
    )
}

pub fn conversation_prompt(p: &ConversationPrompt<'_>) -> String {
    let first = first_name(p.driver_name);
    let history: Vec<String> = p
        .transcript
        .iter()
        .map(|t| match t.speaker {
            Speaker::Coach => format!("Coach: {}", t.text),
            Speaker::Driver => format!("{first}: {}", t.text),
        })
        .collect();
    let turn = p
        .transcript
        .iter()
        .filter(|t| t.speaker == Speaker::Driver)
        .count();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Continue this shift coaching conversation with {first}. They just replied.\n"
    );
    let _ = writeln!(out, "CONVERSATION SO FAR:\n{}\n", history.join("\n"));
    let _ = writeln!(
        out,
        "COACH ANALYSIS:\n{}\n",
        serde_json::to_string(p.analysis).unwrap_or_default()
    );
    if !p.summaries.is_empty() {
        out.push_str("SHIFT EVENTS FOR REFERENCE:\n");
        for (i, s) in p.summaries.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. [{}] {}: {} ({})",
                i + 1,
                s.category,
                s.rule_name,
                s.one_liner,
                s.time
            );
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "GUIDELINES:\n\
         - This is driver turn {turn}. Short replies (\"ok\", \"yeah\", \"no\") mean they are done: \
         wrap up in one or two sentences without another question.\n\
         - Frustrated or terse: acknowledge once and close out. Engaged: keep going.\n\
         - Do not keep raising more events once the main issue is settled.\n\
         - Answer direct questions directly.\n\
         - Do not open every message with their name.\n\
         - Never invent street, road or place names.\n"
    );
    out.push_str(
        "ESCALATION:\n\
         - Offering to flag something is not an escalation.\n\
         - Set \"escalate\" only when the driver explicitly asks for or agrees to supervisor \
         involvement. When in doubt, do not escalate.\n\n\
         RISK FLAGS:\n\
         Independently of \"escalate\", set each flag true when the conversation shows it: \
         aggressiveDriving, impairment (alcohol, drugs, exhaustion), intentionalViolation, \
         hostility, vehicleDefect, severityThresholdCrossed (the data shows a dangerous level), \
         driverRequested (the driver asks for a human).\n\n\
         Respond with JSON only:\n\
         {\n  \"message\": \"2 to 4 conversational sentences\",\n  \
         \"escalate\": null,\n  \
         \"riskFlags\": {\"aggressiveDriving\": false, \"impairment\": false, \"intentionalViolation\": false, \
         \"hostility\": false, \"vehicleDefect\": false, \"severityThresholdCrossed\": false, \
         \"driverRequested\": false}\n}\n\
         When escalating, \"escalate\" is {\"type\": \"route_change | schedule_adjustment | \
         training_referral | dispute_review\", \"details\": \"what the supervisor should review\", \
         \"rationale\": \"why\"}.",
    );
    out
}
