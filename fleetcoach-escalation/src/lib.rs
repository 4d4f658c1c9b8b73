//! Deterministic escalation check applied to every conversation turn.
//!
//! The narrative service decides when to escalate from conversational nuance
//! and gets it wrong in both directions. Risk flags are the hard floor: any
//! flag set forces a supervisor hand-off, whatever the service proposed.

use fleetcoach_types::{ActionCategory, EscalationProposal, TurnResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Nothing proposed, nothing flagged.
    NoEscalation,
    /// The service proposed an escalation; kept as is.
    Upstream,
    /// Forced by the listed flags.
    Forced(Vec<&'static str>),
}

impl Decision {
    pub fn escalates(&self) -> bool {
        !matches!(self, Decision::NoEscalation)
    }
}

pub fn decide(turn: &TurnResult) -> Decision {
    if turn.escalate.is_some() {
        return Decision::Upstream;
    }
    let triggered = turn.risk_flags.triggered();
    if triggered.is_empty() {
        Decision::NoEscalation
    } else {
        Decision::Forced(triggered)
    }
}

/// Pure; no I/O. Must run before the turn is persisted.
pub fn apply(mut turn: TurnResult) -> TurnResult {
    if let Decision::Forced(flags) = decide(&turn) {
        let names = flags.join(", ");
        turn.escalate = Some(EscalationProposal {
            category: ActionCategory::SafetyConcern,
            details: format!("Safety review required: {names}."),
            rationale: format!("Escalated automatically. Risk flags triggered: {names}."),
        });
    }
    turn
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcoach_types::RiskFlags;

    fn turn(escalate: Option<EscalationProposal>, flags: RiskFlags) -> TurnResult {
        TurnResult {
            message: "Thanks for telling me.".into(),
            escalate,
            risk_flags: flags,
        }
    }

    fn every_flag() -> Vec<(&'static str, RiskFlags)> {
        let d = RiskFlags::default;
        vec![
            ("aggressive_driving", RiskFlags { aggressive_driving: true, ..d() }),
            ("impairment", RiskFlags { impairment: true, ..d() }),
            ("intentional_violation", RiskFlags { intentional_violation: true, ..d() }),
            ("hostility", RiskFlags { hostility: true, ..d() }),
            ("vehicle_defect", RiskFlags { vehicle_defect: true, ..d() }),
            ("severity_threshold_crossed", RiskFlags { severity_threshold_crossed: true, ..d() }),
            ("driver_requested", RiskFlags { driver_requested: true, ..d() }),
        ]
    }

    #[test]
    fn any_single_flag_forces_a_safety_concern_naming_it() {
        for (name, flags) in every_flag() {
            let out = apply(turn(None, flags));
            let esc = out.escalate.expect(name);
            assert_eq!(esc.category, ActionCategory::SafetyConcern);
            assert!(esc.rationale.contains(name), "{name} missing from {}", esc.rationale);
            assert_eq!(decide(&turn(None, flags)), Decision::Forced(vec![name]));
        }
    }

    #[test]
    fn rationale_names_every_triggered_flag() {
        let flags = RiskFlags {
            impairment: true,
            vehicle_defect: true,
            ..RiskFlags::default()
        };
        let esc = apply(turn(None, flags)).escalate.unwrap();
        assert!(esc.rationale.contains("impairment, vehicle_defect"));
    }

    #[test]
    fn no_flags_no_proposal_passes_through() {
        let before = turn(None, RiskFlags::default());
        assert_eq!(apply(before.clone()), before);
        assert!(!decide(&before).escalates());
    }

    #[test]
    fn upstream_proposal_is_never_overwritten() {
        let proposal = EscalationProposal {
            category: ActionCategory::RouteChange,
            details: "Exit 12 merge".into(),
            rationale: "Driver asked for a route review".into(),
        };
        let flagged = RiskFlags {
            hostility: true,
            ..RiskFlags::default()
        };
        let before = turn(Some(proposal), flagged);
        assert_eq!(apply(before.clone()), before);
        assert_eq!(decide(&before), Decision::Upstream);
    }
}
