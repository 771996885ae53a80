//! Protected-share ransomware guard.
//!
//! A process touching the configured NAS address with suspicious read/write
//! behavior gets its threat score forced to at least [`NAS_SCORE_FLOOR`]
//! before any threshold comparison. The trait keeps the actual detection
//! pluggable; the shipped heuristic only sees what a `ProcessSignal` carries,
//! so richer guards (I/O counters, per-connection endpoints) can be injected
//! by the surrounding collector.

use crate::config::NasGuardConfig;
use crate::types::{ProcessSignal, ThreatType};

/// Minimum effective threat score for a flagged signal.
pub const NAS_SCORE_FLOOR: u8 = 90;

/// What the guard concluded about a flagged signal.
#[derive(Debug, Clone, PartialEq)]
pub struct NasVerdict {
    pub threat_type: ThreatType,
    pub detail: String,
}

/// Ransomware-pattern check against the protected share.
pub trait NasGuard: Send + Sync {
    /// `Some` when the signal shows NAS-directed suspicious activity.
    fn inspect(&self, signal: &ProcessSignal) -> Option<NasVerdict>;
}

/// Heuristic guard over the fields a signal actually has: the protected IP
/// showing up in the command line while the process holds live connections.
pub struct HeuristicNasGuard {
    nas_ip: String,
    min_connections: u32,
}

impl HeuristicNasGuard {
    pub fn new(config: &NasGuardConfig) -> Self {
        Self {
            nas_ip: config.nas_ip.clone(),
            min_connections: config.min_connections,
        }
    }
}

impl NasGuard for HeuristicNasGuard {
    fn inspect(&self, signal: &ProcessSignal) -> Option<NasVerdict> {
        if self.nas_ip.is_empty() {
            return None;
        }
        if !signal.cmdline.contains(&self.nas_ip) {
            return None;
        }
        if signal.connections_count < self.min_connections {
            return None;
        }
        Some(NasVerdict {
            threat_type: ThreatType::Ransomware,
            detail: format!(
                "suspicious read/write pattern against protected share {}",
                self.nas_ip
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_guard(ip: &str) -> HeuristicNasGuard {
        HeuristicNasGuard::new(&NasGuardConfig {
            enabled: true,
            nas_ip: ip.to_string(),
            min_connections: 1,
        })
    }

    fn make_signal(cmdline: &str, conns: u32) -> ProcessSignal {
        let mut signal = ProcessSignal::new(55, "cryptolock");
        signal.cmdline = cmdline.to_string();
        signal.connections_count = conns;
        signal
    }

    #[test]
    fn test_flags_share_directed_activity() {
        let guard = make_guard("192.168.1.50");
        let verdict = guard
            .inspect(&make_signal("cryptolock --target //192.168.1.50/backup", 3))
            .unwrap();
        assert_eq!(verdict.threat_type, ThreatType::Ransomware);
        assert!(verdict.detail.contains("192.168.1.50"));
    }

    #[test]
    fn test_ignores_unrelated_processes() {
        let guard = make_guard("192.168.1.50");
        assert!(guard.inspect(&make_signal("backup --local /mnt", 3)).is_none());
    }

    #[test]
    fn test_requires_live_connections() {
        let guard = make_guard("192.168.1.50");
        assert!(
            guard
                .inspect(&make_signal("cp //192.168.1.50/share x", 0))
                .is_none()
        );
    }

    #[test]
    fn test_unconfigured_guard_never_fires() {
        let guard = make_guard("");
        assert!(
            guard
                .inspect(&make_signal("anything 192.168.1.50", 9))
                .is_none()
        );
    }
}
