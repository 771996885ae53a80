//! Post-action outcome verification.

use crate::actions::process_alive;
use async_trait::async_trait;
use tracing::debug;
use warden_core::types::{ProcessSignal, ResponseAction};

/// Checks whether an executed action had its intended effect.
///
/// `None` means the action has no verification step; close watches are owned
/// by the escalation sweep instead. An action the verifier cannot probe comes
/// back `Some(false)`, never a hollow `Some(true)`.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, action: ResponseAction, signal: &ProcessSignal) -> Option<bool>;
}

/// Live-process verifier backed by the same probes the executor uses.
pub struct ProcessVerifier;

#[async_trait]
impl Verifier for ProcessVerifier {
    async fn verify(&self, action: ResponseAction, signal: &ProcessSignal) -> Option<bool> {
        match action {
            ResponseAction::MonitorClosely => None,
            ResponseAction::KillNow => {
                let gone = !process_alive(signal.pid);
                debug!(pid = signal.pid, gone, "Probed kill outcome");
                Some(gone)
            }
            ResponseAction::LogOnly | ResponseAction::AlertUser => Some(true),
            ResponseAction::BlockNetwork | ResponseAction::Quarantine => Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[tokio::test]
    async fn test_kill_verified_when_process_gone() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let verified = ProcessVerifier
            .verify(ResponseAction::KillNow, &ProcessSignal::new(pid, "true"))
            .await;
        assert_eq!(verified, Some(true));
    }

    #[tokio::test]
    async fn test_kill_unverified_when_process_lives() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let signal = ProcessSignal::new(child.id(), "sleep");

        let verified = ProcessVerifier.verify(ResponseAction::KillNow, &signal).await;
        assert_eq!(verified, Some(false));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_watch_is_never_verified_here() {
        let signal = ProcessSignal::new(1, "watched");
        let verified = ProcessVerifier
            .verify(ResponseAction::MonitorClosely, &signal)
            .await;
        assert_eq!(verified, None);
    }

    #[tokio::test]
    async fn test_unprobeable_actions_never_verify_true() {
        let signal = ProcessSignal::new(1, "blocked");
        for action in [ResponseAction::BlockNetwork, ResponseAction::Quarantine] {
            assert_eq!(ProcessVerifier.verify(action, &signal).await, Some(false));
        }
    }
}
