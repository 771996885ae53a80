//! Rule-based fallback for when the AI backend is unavailable.
//!
//! Deterministic on purpose: the same signal always produces the same score,
//! so degraded operation stays predictable and auditable. Assessments made
//! here carry `ai_analyzed = false`.

use crate::brain::IncidentSummary;
use crate::types::{
    ActionDecision, Confidence, ProcessSignal, RecommendedAction, ResponseAction, ThreatAssessment,
    ThreatType,
};

/// Weighted-sum score over the signal's load characteristics, on top of the
/// collector's own heuristic score, capped at 100.
pub fn score_signal(signal: &ProcessSignal) -> u8 {
    let mut score = signal.rule_score as i64;

    if signal.cpu_percent > 80.0 {
        score += 30;
    } else if signal.cpu_percent > 50.0 {
        score += 15;
    }

    if signal.memory_mb > 2000.0 {
        score += 20;
    } else if signal.memory_mb > 1000.0 {
        score += 10;
    }

    if signal.connections_count > 50 {
        score += 30;
    } else if signal.connections_count > 20 {
        score += 15;
    }

    score.clamp(0, 100) as u8
}

/// Full fallback assessment for a signal.
pub fn assess(signal: &ProcessSignal) -> ThreatAssessment {
    let score = score_signal(signal);
    let recommended = if score >= 85 {
        RecommendedAction::Kill
    } else if score >= 70 {
        RecommendedAction::Alert
    } else {
        RecommendedAction::Monitor
    };
    ThreatAssessment::new(
        score as i64,
        Confidence::Medium,
        ThreatType::Suspicious,
        recommended,
        "Rule-based analysis (AI unavailable)",
    )
}

/// Fallback decision ladder used when the AI decision contract fails.
pub fn decide(assessment: &ThreatAssessment) -> ActionDecision {
    let score = assessment.threat_score;
    if score >= 85 {
        ActionDecision::new(
            ResponseAction::KillNow,
            Confidence::High,
            "Critical threat score - immediate termination",
        )
        .escalating()
    } else if score >= 70 {
        ActionDecision::new(
            ResponseAction::AlertUser,
            Confidence::Medium,
            "High threat score - user attention required",
        )
    } else {
        ActionDecision::new(
            ResponseAction::MonitorClosely,
            Confidence::Medium,
            "Elevated threat score - watching for escalation",
        )
    }
}

/// Deterministic alert body used when AI composition is off or failing.
pub fn compose_alert(summary: &IncidentSummary) -> String {
    format!(
        "Security alert: {action} taken against '{name}' (threat score {score}/100). Reason: {reason}",
        action = summary.action,
        name = summary.process_name,
        score = summary.threat_score,
        reason = summary.reasoning,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_signal(cpu: f32, mem: f32, conns: u32) -> ProcessSignal {
        let mut signal = ProcessSignal::new(900, "loadtest");
        signal.cpu_percent = cpu;
        signal.memory_mb = mem;
        signal.connections_count = conns;
        signal
    }

    #[test]
    fn test_quiet_process_scores_zero() {
        assert_eq!(score_signal(&make_signal(1.0, 50.0, 0)), 0);
    }

    #[test]
    fn test_band_edges() {
        // Boundaries are strict greater-than.
        assert_eq!(score_signal(&make_signal(50.0, 0.0, 0)), 0);
        assert_eq!(score_signal(&make_signal(50.1, 0.0, 0)), 15);
        assert_eq!(score_signal(&make_signal(80.1, 0.0, 0)), 30);
        assert_eq!(score_signal(&make_signal(0.0, 1000.1, 0)), 10);
        assert_eq!(score_signal(&make_signal(0.0, 2000.1, 0)), 20);
        assert_eq!(score_signal(&make_signal(0.0, 0.0, 21)), 15);
        assert_eq!(score_signal(&make_signal(0.0, 0.0, 51)), 30);
    }

    #[test]
    fn test_rule_score_feeds_in_and_caps_at_100() {
        let mut signal = make_signal(95.0, 3000.0, 80);
        signal.rule_score = 90;
        assert_eq!(score_signal(&signal), 100);
    }

    #[test]
    fn test_miner_profile_crosses_response_threshold() {
        // High CPU alone plus a modest collector score clears medium (50).
        let mut signal = make_signal(95.0, 800.0, 12);
        signal.rule_score = 25;
        let assessment = assess(&signal);
        assert!(assessment.threat_score >= 50);
        assert!(!assessment.ai_analyzed);
        assert_eq!(assessment.threat_type, ThreatType::Suspicious);
    }

    #[test]
    fn test_decision_ladder() {
        let mk = |score: i64| {
            ThreatAssessment::new(
                score,
                Confidence::Medium,
                ThreatType::Suspicious,
                RecommendedAction::Monitor,
                "test",
            )
        };
        let critical = decide(&mk(90));
        assert_eq!(critical.action, ResponseAction::KillNow);
        assert!(critical.escalate);

        let high = decide(&mk(75));
        assert_eq!(high.action, ResponseAction::AlertUser);
        assert!(!high.escalate);

        let medium = decide(&mk(55));
        assert_eq!(medium.action, ResponseAction::MonitorClosely);
    }

    #[test]
    fn test_compose_alert_template() {
        let summary = IncidentSummary {
            process_name: "mine3r".into(),
            pid: 4141,
            threat_score: 92,
            threat_type: "cryptominer".into(),
            action: "kill_now".into(),
            reasoning: "sustained full-core load".into(),
        };
        let body = compose_alert(&summary);
        assert_eq!(
            body,
            "Security alert: kill_now taken against 'mine3r' (threat score 92/100). \
             Reason: sustained full-core load"
        );
    }
}
