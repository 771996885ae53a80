//! OS-level response actions.
//!
//! The executor owns the process-control actions. Session registration and
//! alert dispatch have no OS side effects and are sequenced by the
//! orchestrator instead; the executor reports them as plain successes so its
//! action match stays total.

use std::time::Duration;
use tracing::{debug, info, warn};
use warden_core::error::ActionError;
use warden_core::types::{ProcessSignal, ResponseAction};

/// Wait between SIGKILL and the liveness re-check.
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// What an executed action reports back for the incident record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
}

impl ActionOutcome {
    fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }
}

/// Executes response actions against live processes.
///
/// Defaults to dry-run: every step is evaluated and logged but no signal is
/// ever delivered. [`ActionExecutor::live`] arms it.
pub struct ActionExecutor {
    dry_run: bool,
}

impl ActionExecutor {
    pub fn new() -> Self {
        Self { dry_run: true }
    }

    pub fn live() -> Self {
        Self { dry_run: false }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn execute(
        &self,
        action: ResponseAction,
        signal: &ProcessSignal,
    ) -> Result<ActionOutcome, ActionError> {
        match action {
            ResponseAction::LogOnly => Ok(ActionOutcome::ok("Threat logged for review")),
            ResponseAction::MonitorClosely => Ok(ActionOutcome::ok("Monitoring session requested")),
            ResponseAction::AlertUser => Ok(ActionOutcome::ok("User alert requested")),
            ResponseAction::KillNow => self.kill(signal).await,
            ResponseAction::BlockNetwork | ResponseAction::Quarantine => {
                Err(ActionError::NotImplemented {
                    action: action.to_string(),
                })
            }
        }
    }

    /// SIGKILL with a stale-PID identity guard, a settle wait, and one retry.
    /// A process that is already gone, at lookup or at delivery, counts as
    /// success: the threat no longer exists.
    async fn kill(&self, signal: &ProcessSignal) -> Result<ActionOutcome, ActionError> {
        let pid = signal.pid;

        if !process_alive(pid) {
            info!(pid, name = %signal.name, "Process already terminated");
            return Ok(ActionOutcome::ok("Process already terminated"));
        }

        // The PID may have been recycled since the signal was observed.
        if let Some(comm) = read_comm(pid).await {
            if !name_matches(&comm, &signal.name) {
                return Err(ActionError::ProcessMismatch {
                    pid,
                    expected: signal.name.clone(),
                    found: comm,
                });
            }
        } else if !process_alive(pid) {
            return Ok(ActionOutcome::ok("Process already terminated"));
        } else {
            debug!(pid, "Could not read process name, proceeding without identity guard");
        }

        if self.dry_run {
            info!(pid, name = %signal.name, "[DRY RUN] Would send SIGKILL");
            return Ok(ActionOutcome::ok(format!(
                "[DRY RUN] Would terminate PID {pid} ({})",
                signal.name
            )));
        }

        if matches!(send_sigkill(pid)?, Delivery::AlreadyGone) {
            info!(pid, name = %signal.name, "Process exited before SIGKILL");
            return Ok(ActionOutcome::ok("Process already terminated"));
        }
        tokio::time::sleep(KILL_SETTLE).await;
        if !process_alive(pid) {
            info!(pid, name = %signal.name, "Process terminated");
            return Ok(ActionOutcome::ok("Process terminated"));
        }

        warn!(pid, name = %signal.name, "Process still live after SIGKILL, retrying");
        if matches!(send_sigkill(pid)?, Delivery::AlreadyGone) {
            return Ok(ActionOutcome::ok("Process already terminated"));
        }
        tokio::time::sleep(KILL_SETTLE).await;
        if !process_alive(pid) {
            info!(pid, name = %signal.name, "Process terminated on retry");
            return Ok(ActionOutcome::ok("Process terminated"));
        }

        Err(ActionError::Survived { pid })
    }
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

enum Delivery {
    Signalled,
    AlreadyGone,
}

fn send_sigkill(pid: u32) -> Result<Delivery, ActionError> {
    let pid_t = i32::try_from(pid).map_err(|_| ActionError::SignalFailed {
        pid,
        message: "pid out of range".to_string(),
    })?;
    // SAFETY: kill(2) with a checked pid and SIGKILL touches no memory.
    let rc = unsafe { libc::kill(pid_t, libc::SIGKILL) };
    if rc == 0 {
        return Ok(Delivery::Signalled);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(Delivery::AlreadyGone),
        Some(libc::EPERM) => Err(ActionError::PermissionDenied { pid }),
        _ => Err(ActionError::SignalFailed {
            pid,
            message: err.to_string(),
        }),
    }
}

/// Signal-0 existence probe. A zombie still answers the probe but can never
/// run again, so it counts as terminated.
pub(crate) fn process_alive(pid: u32) -> bool {
    let Ok(pid_t) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid_t, 0) };
    if rc != 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
        return false;
    }
    !is_zombie(pid)
}

fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field sits right after the parenthesized comm.
    match stat.rfind(')') {
        Some(idx) => stat[idx + 1..].trim_start().starts_with('Z'),
        None => false,
    }
}

async fn read_comm(pid: u32) -> Option<String> {
    tokio::fs::read_to_string(format!("/proc/{pid}/comm"))
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

/// The kernel truncates comm to 15 bytes, so a long expected name is matched
/// by prefix once the live name hits that limit.
fn name_matches(live: &str, expected: &str) -> bool {
    let live = live.to_lowercase();
    let expected = expected.to_lowercase();
    live.contains(&expected) || (live.len() >= 15 && expected.starts_with(&live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};

    fn spawn_sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().expect("spawn sleep")
    }

    fn reaped_pid() -> u32 {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("reap child");
        pid
    }

    #[test]
    fn test_name_matches_exact_and_case() {
        assert!(name_matches("sleep", "sleep"));
        assert!(name_matches("Sleep", "sleep"));
        assert!(name_matches("kworker/0:1", "kworker"));
        assert!(!name_matches("sleep", "mine3r"));
    }

    #[test]
    fn test_name_matches_truncated_comm() {
        // comm maxes out at 15 chars for longer executable names.
        assert!(name_matches("verylongprocess", "verylongprocessname"));
        assert!(!name_matches("verylongprocess", "otherbinary"));
    }

    #[tokio::test]
    async fn test_kill_already_exited_process() {
        let pid = reaped_pid();
        let signal = ProcessSignal::new(pid, "true");

        let outcome = ActionExecutor::live()
            .execute(ResponseAction::KillNow, &signal)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.detail, "Process already terminated");
    }

    #[tokio::test]
    async fn test_kill_live_process() {
        let mut child = spawn_sleeper();
        let signal = ProcessSignal::new(child.id(), "sleep");

        let outcome = ActionExecutor::live()
            .execute(ResponseAction::KillNow, &signal)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.detail, "Process terminated");
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_kill_refuses_mismatched_process() {
        let mut child = spawn_sleeper();
        let signal = ProcessSignal::new(child.id(), "mine3r");

        let err = ActionExecutor::live()
            .execute(ResponseAction::KillNow, &signal)
            .await
            .unwrap_err();
        match err {
            ActionError::ProcessMismatch { expected, found, .. } => {
                assert_eq!(expected, "mine3r");
                assert_eq!(found, "sleep");
            }
            other => panic!("unexpected error: {other}"),
        }
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_dry_run_never_signals() {
        let mut child = spawn_sleeper();
        let signal = ProcessSignal::new(child.id(), "sleep");

        let outcome = ActionExecutor::new()
            .execute(ResponseAction::KillNow, &signal)
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.detail.starts_with("[DRY RUN]"));
        assert!(process_alive(child.id()));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_unimplemented_actions_error() {
        let executor = ActionExecutor::new();
        let signal = ProcessSignal::new(1, "anything");
        for action in [ResponseAction::BlockNetwork, ResponseAction::Quarantine] {
            let err = executor.execute(action, &signal).await.unwrap_err();
            assert!(matches!(err, ActionError::NotImplemented { .. }));
        }
    }

    #[tokio::test]
    async fn test_bookkeeping_actions_succeed() {
        let executor = ActionExecutor::new();
        let signal = ProcessSignal::new(1, "anything");
        let outcome = executor
            .execute(ResponseAction::LogOnly, &signal)
            .await
            .unwrap();
        assert_eq!(outcome.detail, "Threat logged for review");
    }

    #[test]
    fn test_zombie_counts_as_terminated() {
        let mut child = spawn_sleeper();
        let pid = child.id();
        // SAFETY: killing our own just-spawned child.
        unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        std::thread::sleep(Duration::from_millis(50));

        // Not yet reaped: /proc entry exists in state Z.
        assert!(!process_alive(pid));
        child.wait().unwrap();
    }
}
