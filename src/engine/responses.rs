use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::engine::policy::Verdict;

/// Time the alert stays up before the process ends.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// Title of the blocking alert shown on compromise.
pub const ALERT_TITLE: &str = "Security Alert";

/// Host-side user notification, e.g. a blocking alert dialog.
pub trait SecurityNotifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Consumes the verdict of a detection pass.
pub trait ResponsePolicy: Send + Sync {
    fn respond(&self, verdict: &Verdict);
}

/// What to do about a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    None,
    Notify,
    NotifyAndTerminate,
}

/// Pure decision step, kept apart from the side effects.
pub fn decide(verdict: &Verdict, terminate: bool) -> ResponseAction {
    match (verdict.is_compromised(), terminate) {
        (false, _) => ResponseAction::None,
        (true, false) => ResponseAction::Notify,
        (true, true) => ResponseAction::NotifyAndTerminate,
    }
}

fn alert_message(verdict: &Verdict) -> String {
    match verdict.trigger() {
        Some(trigger) => format!(
            "This device appears to be modified or instrumented ({}). \
             The application cannot continue.",
            trigger.probe
        ),
        None => String::new(),
    }
}

/// Alerts through the notifier, waits out the grace period, then exits with
/// `EXIT_FAILURE`.
pub struct TerminateOnCompromise {
    notifier: Arc<dyn SecurityNotifier>,
    grace: Duration,
}

impl TerminateOnCompromise {
    pub fn new(notifier: Arc<dyn SecurityNotifier>) -> Self {
        Self {
            notifier,
            grace: TERMINATION_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl ResponsePolicy for TerminateOnCompromise {
    fn respond(&self, verdict: &Verdict) {
        if apply_response(verdict, self.notifier.as_ref(), true) {
            thread::sleep(self.grace);
            std::process::exit(libc::EXIT_FAILURE);
        }
    }
}

/// Alerts and logs, never terminates.
pub struct LogOnly {
    notifier: Option<Arc<dyn SecurityNotifier>>,
}

impl LogOnly {
    pub fn new() -> Self {
        Self { notifier: None }
    }

    pub fn with_notifier(notifier: Arc<dyn SecurityNotifier>) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }
}

impl Default for LogOnly {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponsePolicy for LogOnly {
    fn respond(&self, verdict: &Verdict) {
        match &self.notifier {
            Some(notifier) => {
                apply_response(verdict, notifier.as_ref(), false);
            }
            None => {
                if verdict.is_compromised() {
                    warn!(target: "shield::security", "{}", verdict.summary());
                }
            }
        }
    }
}

/// Notifier that writes the alert to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SecurityNotifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        error!(target: "shield::security", title, "{message}");
    }
}

/// Runs the notification side of a response. Returns true when the caller
/// should terminate.
///
/// Nothing here touches the process: termination belongs to the policy so
/// that the decision and the notification can be tested.
pub fn apply_response(verdict: &Verdict, notifier: &dyn SecurityNotifier, terminate: bool) -> bool {
    match decide(verdict, terminate) {
        ResponseAction::None => {
            info!("device integrity verified");
            false
        }
        ResponseAction::Notify => {
            notifier.notify(ALERT_TITLE, &alert_message(verdict));
            false
        }
        ResponseAction::NotifyAndTerminate => {
            notifier.notify(ALERT_TITLE, &alert_message(verdict));
            error!(target: "shield::security", "{}, terminating", verdict.summary());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::policy::{ProbeId, ProbeResult};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(String, String)>>);

    impl SecurityNotifier for Recording {
        fn notify(&self, title: &str, message: &str) {
            self.0.lock().unwrap().push((title.to_string(), message.to_string()));
        }
    }

    fn compromised() -> Verdict {
        let hit = ProbeResult::positive(ProbeId::FilesystemArtifact, "/Applications/Cydia.app");
        Verdict::compromised(hit.clone(), vec![hit])
    }

    #[test]
    fn test_decide() {
        let clean = Verdict::clean(Vec::new());
        assert_eq!(decide(&clean, true), ResponseAction::None);
        assert_eq!(decide(&compromised(), false), ResponseAction::Notify);
        assert_eq!(decide(&compromised(), true), ResponseAction::NotifyAndTerminate);
    }

    #[test]
    fn test_clean_verdict_is_silent() {
        let notifier = Recording::default();
        assert!(!apply_response(&Verdict::clean(Vec::new()), &notifier, true));
        assert!(notifier.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_compromise_notifies_before_termination() {
        let notifier = Recording::default();
        assert!(apply_response(&compromised(), &notifier, true));
        let alerts = notifier.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, ALERT_TITLE);
        assert!(alerts[0].1.contains("filesystem-artifact"));
    }

    #[test]
    fn test_log_only_never_terminates() {
        let notifier = Arc::new(Recording::default());
        LogOnly::with_notifier(notifier.clone()).respond(&compromised());
        LogOnly::new().respond(&compromised());
        // still running
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_terminating_policy_spares_clean_device() {
        let notifier = Arc::new(Recording::default());
        TerminateOnCompromise::new(notifier.clone())
            .with_grace(Duration::ZERO)
            .respond(&Verdict::clean(Vec::new()));
        assert!(notifier.0.lock().unwrap().is_empty());
    }
}
