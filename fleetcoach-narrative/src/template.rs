use async_trait::async_trait;
use fleetcoach_types::{
    CoachAnalysis, EventCategory, EventSummary, Recommendation, RecommendationKind, RiskFlags,
    Sentiment, Severity, TurnResult,
};

use crate::parse::CLEAN_SHIFT_SUMMARY;
use crate::prompt::{event_breakdown, event_time, first_name, shift_summary_line};
use crate::{ConversationPrompt, NarrativeError, NarrativeGenerator, ShiftPrompt, ShiftScript};

/// Fixed-text generator for running without a narrative service.
///
/// Never escalates and never raises risk flags.
#[derive(Clone, Debug, Default)]
pub struct TemplateNarrative;

fn severity(category: EventCategory) -> Severity {
    match category {
        EventCategory::Speeding | EventCategory::Seatbelt | EventCategory::Fatigue => {
            Severity::High
        }
        EventCategory::HardBrake
        | EventCategory::HarshCornering
        | EventCategory::HardAcceleration => Severity::Medium,
        _ => Severity::Low,
    }
}

fn no_recommendation(confidence: f32) -> Recommendation {
    Recommendation {
        kind: RecommendationKind::None,
        details: String::new(),
        confidence,
    }
}

#[async_trait]
impl NarrativeGenerator for TemplateNarrative {
    async fn shift_script(&self, prompt: ShiftPrompt<'_>) -> Result<ShiftScript, NarrativeError> {
        let first = first_name(prompt.driver_name);
        let mut opening = format!(
            "Hi {first}, thanks for checking in. I've got {} events from your shift to go over.",
            prompt.events.len()
        );
        if !prompt.clusters.is_empty() {
            opening.push_str(" A few of them happened at the same spot, which you can see on the map.");
        }
        opening.push_str(" Anything you want to tell me about today?");

        let event_summaries = prompt
            .events
            .iter()
            .map(|e| EventSummary {
                event_id: e.id,
                category: e.category,
                rule_name: e.rule_name.clone(),
                time: event_time(e.occurred_at),
                location: None,
                severity: severity(e.category),
                one_liner: format!("{} at {}", e.rule_name, event_time(e.occurred_at)),
            })
            .collect();

        Ok(ShiftScript {
            opening_message: opening,
            summary: shift_summary_line(prompt.events),
            event_summaries,
            analysis: CoachAnalysis {
                sentiment: Sentiment::NeedsCoaching,
                event_breakdown: event_breakdown(prompt.events),
                patterns: Vec::new(),
                top_concern: None,
                recommendation: no_recommendation(0.0),
            },
        })
    }

    async fn clean_shift_script(&self, driver_name: &str) -> Result<ShiftScript, NarrativeError> {
        Ok(ShiftScript {
            opening_message: format!(
                "Nice work today, {}. Clean shift, no safety events. I'm here if you want to talk anything through.",
                first_name(driver_name)
            ),
            summary: CLEAN_SHIFT_SUMMARY.to_string(),
            event_summaries: Vec::new(),
            analysis: CoachAnalysis {
                sentiment: Sentiment::Positive,
                event_breakdown: Default::default(),
                patterns: Vec::new(),
                top_concern: None,
                recommendation: no_recommendation(1.0),
            },
        })
    }

    async fn continue_conversation(
        &self,
        _prompt: ConversationPrompt<'_>,
    ) -> Result<TurnResult, NarrativeError> {
        Ok(TurnResult {
            message: "Thanks for talking it through. Drive safe out there.".to_string(),
            escalate: None,
            risk_flags: RiskFlags::default(),
        })
    }
}
