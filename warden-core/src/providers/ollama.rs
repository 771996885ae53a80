//! Ollama-backed threat brain.
//!
//! Talks to a local Ollama server through its `/api/generate` endpoint and
//! parses model output into the strict wire schemas below. Anything that does
//! not parse (fenced prose, missing keys, out-of-vocabulary enums) becomes
//! `BrainError::MalformedResponse`, which callers treat exactly like the
//! backend being unreachable.

use crate::brain::{HostProfile, IncidentSummary, ThreatBrain};
use crate::config::BrainConfig;
use crate::error::BrainError;
use crate::types::{
    ActionDecision, Confidence, ProcessSignal, RecommendedAction, ResponseAction, SystemContext,
    ThreatAssessment, ThreatType,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Envelope of the Ollama generate API.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// How soon the model thinks someone should look at this.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Urgency {
    Low,
    Medium,
    High,
    Immediate,
}

/// Strict schema for assessment replies. Missing or out-of-vocabulary fields
/// fail the parse; extra fields are ignored.
#[derive(Debug, Deserialize)]
struct AssessmentWire {
    threat_score: i64,
    confidence: Confidence,
    reasoning: String,
    threat_type: ThreatType,
    recommended_action: RecommendedAction,
    urgency: Urgency,
}

/// Strict schema for decision replies.
#[derive(Debug, Deserialize)]
struct DecisionWire {
    action: ResponseAction,
    confidence: Confidence,
    reason: String,
    #[serde(default)]
    user_message: String,
    #[serde(default)]
    precautions: Vec<String>,
    #[serde(default)]
    escalate: bool,
}

/// `ThreatBrain` backed by a local Ollama server.
pub struct OllamaBrain {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
}

impl OllamaBrain {
    pub fn new(config: &BrainConfig) -> Result<Self, BrainError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrainError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    /// One round trip to `/api/generate`, returning the raw model text.
    async fn generate(&self, prompt: String) -> Result<String, BrainError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "temperature": self.temperature,
            "stream": false,
        });

        debug!(url = %url, model = %self.model, "Sending generate request");

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                BrainError::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                BrainError::Connection {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrainError::Status {
                status: status.as_u16(),
            });
        }

        let envelope: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| BrainError::MalformedResponse {
                    message: format!("generate envelope: {e}"),
                })?;
        Ok(envelope.response)
    }

    fn build_assessment_prompt(signal: &ProcessSignal, host: &HostProfile) -> String {
        format!(
            "You are an endpoint security analyst. Assess this process for malicious behavior.\n\
             \n\
             Process:\n\
             - name: {name}\n\
             - pid: {pid}\n\
             - cmdline: {cmdline}\n\
             - parent: {parent}\n\
             - user: {user}\n\
             - cpu_percent: {cpu:.1}\n\
             - memory_mb: {mem:.1}\n\
             - network_connections: {conns}\n\
             - threads: {threads}\n\
             - heuristic_score: {rule}\n\
             \n\
             Host: os={os}, protected_asset={asset}\n\
             \n\
             Respond with ONLY a JSON object, no prose:\n\
             {{\"threat_score\": <0-100>, \"confidence\": \"high|medium|low\", \
             \"reasoning\": \"<one sentence>\", \
             \"threat_type\": \"benign|suspicious|malware|ransomware|cryptominer|data_exfil|privilege_escalation\", \
             \"recommended_action\": \"monitor|alert|kill|quarantine\", \
             \"urgency\": \"low|medium|high|immediate\"}}",
            name = signal.name,
            pid = signal.pid,
            cmdline = signal.cmdline,
            parent = signal.parent_name,
            user = signal.username,
            cpu = signal.cpu_percent,
            mem = signal.memory_mb,
            conns = signal.connections_count,
            threads = signal.num_threads,
            rule = signal.rule_score,
            os = host.os,
            asset = if host.protected_ip.is_empty() {
                "none"
            } else {
                &host.protected_ip
            },
        )
    }

    fn build_decision_prompt(
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        ctx: &SystemContext,
    ) -> String {
        format!(
            "You are the response planner of an endpoint defense agent. A threat was assessed; \
             choose the response action.\n\
             \n\
             Threat:\n\
             - process: {name} (pid {pid})\n\
             - threat_score: {score}/100\n\
             - threat_type: {ttype}\n\
             - assessment_confidence: {conf}\n\
             - reasoning: {reasoning}\n\
             \n\
             System context:\n\
             - health_score: {health}/100\n\
             - active_threats: {active}\n\
             - user_active: {user_active}\n\
             \n\
             Respond with ONLY a JSON object, no prose:\n\
             {{\"action\": \"log_only|monitor_closely|alert_user|kill_now|block_network|quarantine\", \
             \"confidence\": \"high|medium|low\", \"reason\": \"<one sentence>\", \
             \"user_message\": \"<short notification text>\", \
             \"precautions\": [\"<optional strings>\"], \"escalate\": true|false}}",
            name = signal.name,
            pid = signal.pid,
            score = assessment.threat_score,
            ttype = assessment.threat_type,
            conf = assessment.confidence,
            reasoning = assessment.reasoning,
            health = ctx.health_score,
            active = ctx.active_threats,
            user_active = ctx.user_active,
        )
    }

    fn build_compose_prompt(summary: &IncidentSummary) -> String {
        format!(
            "Write a two-sentence security alert for a home user. No markdown, no JSON.\n\
             Incident: process '{name}' (pid {pid}) scored {score}/100 as {ttype}; \
             action taken: {action}. Analyst reasoning: {reasoning}",
            name = summary.process_name,
            pid = summary.pid,
            score = summary.threat_score,
            ttype = summary.threat_type,
            action = summary.action,
            reasoning = summary.reasoning,
        )
    }
}

/// Drop a leading/trailing markdown code fence, language tag included.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

/// Slice from the first `{` to the last `}`; models love to add prose.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end >= start).then(|| &raw[start..=end])
}

fn parse_payload<'a, T: Deserialize<'a>>(raw: &'a str) -> Result<T, BrainError> {
    let payload = extract_json(strip_fences(raw)).ok_or_else(|| BrainError::MalformedResponse {
        message: "no JSON object in model output".into(),
    })?;
    serde_json::from_str(payload).map_err(|e| BrainError::MalformedResponse {
        message: e.to_string(),
    })
}

#[async_trait]
impl ThreatBrain for OllamaBrain {
    async fn assess(
        &self,
        signal: &ProcessSignal,
        host: &HostProfile,
    ) -> Result<ThreatAssessment, BrainError> {
        let raw = self
            .generate(Self::build_assessment_prompt(signal, host))
            .await?;
        let wire: AssessmentWire = parse_payload(&raw)?;

        debug!(
            pid = signal.pid,
            score = wire.threat_score,
            urgency = ?wire.urgency,
            "Model assessment parsed"
        );

        Ok(ThreatAssessment::new(
            wire.threat_score,
            wire.confidence,
            wire.threat_type,
            wire.recommended_action,
            wire.reasoning,
        )
        .from_model(&self.model))
    }

    async fn decide(
        &self,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        ctx: &SystemContext,
    ) -> Result<ActionDecision, BrainError> {
        let raw = self
            .generate(Self::build_decision_prompt(signal, assessment, ctx))
            .await?;
        let wire: DecisionWire = parse_payload(&raw)?;

        if !wire.precautions.is_empty() {
            debug!(pid = signal.pid, precautions = ?wire.precautions, "Model suggested precautions");
        }

        let mut decision = ActionDecision::new(wire.action, wire.confidence, wire.reason)
            .with_user_message(wire.user_message);
        decision.escalate = wire.escalate;
        Ok(decision)
    }

    async fn compose_alert(&self, summary: &IncidentSummary) -> Result<String, BrainError> {
        let raw = self.generate(Self::build_compose_prompt(summary)).await?;
        let body = strip_fences(&raw).trim().to_string();
        if body.is_empty() {
            warn!(process = %summary.process_name, "Model returned an empty alert body");
            return Err(BrainError::MalformedResponse {
                message: "empty alert body".into(),
            });
        }
        Ok(body)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_variants() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_ignores_prose() {
        let raw = "Sure! Here is the assessment:\n{\"threat_score\": 10}\nHope that helps.";
        assert_eq!(extract_json(raw), Some("{\"threat_score\": 10}"));
        assert_eq!(extract_json("no braces here"), None);
    }

    #[test]
    fn test_assessment_wire_parses_conforming_reply() {
        let raw = r#"```json
        {"threat_score": 88, "confidence": "high", "reasoning": "miner-like load",
         "threat_type": "cryptominer", "recommended_action": "kill", "urgency": "immediate"}
        ```"#;
        let wire: AssessmentWire = parse_payload(raw).unwrap();
        assert_eq!(wire.threat_score, 88);
        assert_eq!(wire.threat_type, ThreatType::Cryptominer);
        assert_eq!(wire.recommended_action, RecommendedAction::Kill);
    }

    #[test]
    fn test_assessment_wire_rejects_missing_key() {
        // No threat_type: the whole reply is malformed, not partially usable.
        let raw = r#"{"threat_score": 88, "confidence": "high", "reasoning": "x",
                      "recommended_action": "kill", "urgency": "high"}"#;
        let err = parse_payload::<AssessmentWire>(raw).unwrap_err();
        assert!(matches!(err, BrainError::MalformedResponse { .. }));
    }

    #[test]
    fn test_assessment_wire_rejects_unknown_enum_value() {
        let raw = r#"{"threat_score": 40, "confidence": "certain", "reasoning": "x",
                      "threat_type": "suspicious", "recommended_action": "monitor",
                      "urgency": "low"}"#;
        assert!(parse_payload::<AssessmentWire>(raw).is_err());
    }

    #[test]
    fn test_decision_wire_defaults_optional_fields() {
        let raw = r#"{"action": "alert_user", "confidence": "medium", "reason": "noisy but not fatal"}"#;
        let wire: DecisionWire = parse_payload(raw).unwrap();
        assert_eq!(wire.action, ResponseAction::AlertUser);
        assert!(!wire.escalate);
        assert!(wire.user_message.is_empty());
        assert!(wire.precautions.is_empty());
    }

    #[test]
    fn test_prompt_mentions_signal_fields() {
        let mut signal = ProcessSignal::new(321, "exfil-agent");
        signal.cmdline = "/tmp/exfil-agent --upload".into();
        signal.connections_count = 64;
        let host = HostProfile {
            os: "linux".into(),
            protected_ip: "192.168.1.50".into(),
        };
        let prompt = OllamaBrain::build_assessment_prompt(&signal, &host);
        assert!(prompt.contains("exfil-agent"));
        assert!(prompt.contains("pid: 321"));
        assert!(prompt.contains("192.168.1.50"));
        assert!(prompt.contains("threat_score"));
    }
}
