//! Platform power/reset control
//!
//! Terminal actions are decided by the connectivity components but executed only
//! by the supervisor in [`crate::module`], through a [`SystemControl`].

use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Hard action taken when connectivity cannot be (re)established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    /// Low-power suspend; the node wakes up as if freshly booted
    Suspend(Duration),
    /// Full process restart
    Restart,
}

/// Reset and low-power control provided by the platform
///
/// On real hardware neither method returns. Host and test implementations may
/// return after recording or performing the action.
pub trait SystemControl: Send + Sync {
    fn restart(&self);

    fn suspend(&self, duration: Duration);

    fn perform(&self, action: TerminalAction) {
        match action {
            TerminalAction::Restart => self.restart(),
            TerminalAction::Suspend(duration) => self.suspend(duration),
        }
    }
}

/// Exit status a service manager should treat as "restart me"
pub const RESTART_EXIT_CODE: i32 = 75;

/// [`SystemControl`] for modules running as a hosted process (e.g. a single-board
/// computer under a service manager)
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

impl SystemControl for HostSystem {
    fn restart(&self) {
        error!("Rebooting...");
        std::process::exit(RESTART_EXIT_CODE);
    }

    fn suspend(&self, duration: Duration) {
        info!(
            suspend_secs = duration.as_secs(),
            "Going to deep sleep, goodnight..."
        );
        std::thread::sleep(duration);
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TerminalAction>>);

    impl SystemControl for Recorder {
        fn restart(&self) {
            self.0.lock().unwrap().push(TerminalAction::Restart);
        }

        fn suspend(&self, duration: Duration) {
            self.0.lock().unwrap().push(TerminalAction::Suspend(duration));
        }
    }

    #[test]
    fn test_perform_dispatches_to_action() {
        let recorder = Recorder::default();
        recorder.perform(TerminalAction::Restart);
        recorder.perform(TerminalAction::Suspend(Duration::from_secs(60)));

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                TerminalAction::Restart,
                TerminalAction::Suspend(Duration::from_secs(60))
            ]
        );
    }
}
