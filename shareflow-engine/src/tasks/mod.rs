//! Scheduled maintenance over all shares.
//!
//! Each task walks the affected shares one at a time. A failing share is
//! recorded in the [`TaskReport`] and the walk continues; the errors are
//! reported to the platform admins at the end.

mod expiration;
mod reapplier;
mod verifier;

pub use expiration::revoke_expired_shares;
pub use reapplier::reapply_unhealthy_shares;
pub use verifier::verify_all_shares;

use crate::error::EngineResult;
use crate::notifications::{NotificationSink, ShareNotification};
use tracing::{error, info};

/// Outcome of one scheduled task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskReport {
    /// Shares the task ran against.
    pub processed: usize,
    /// Runs that returned true.
    pub succeeded: usize,
    /// `"<share uri>: <error>"` for every run that errored.
    pub errors: Vec<String>,
}

impl TaskReport {
    fn record(&mut self, share_uri: &str, result: EngineResult<bool>) {
        self.processed += 1;
        match result {
            Ok(true) => self.succeeded += 1,
            Ok(false) => info!("share {share_uri}: completed with failed or unhealthy items"),
            Err(e) => self.fail(share_uri, e),
        }
    }

    fn fail(&mut self, share_uri: &str, error: impl std::fmt::Display) {
        error!("share {share_uri}: {error}");
        self.errors.push(format!("{share_uri}: {error}"));
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn notify_admins(&self, notifier: &dyn NotificationSink, subject: &str) {
        if !self.is_clean() {
            notifier.notify(ShareNotification::admin_report(subject, &self.errors));
        }
    }
}
