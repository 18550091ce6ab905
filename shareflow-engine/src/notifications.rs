//! Share notifications.
//!
//! The engine only emits notifications; delivery belongs to the sink.

use serde::{Deserialize, Serialize};
use shareflow_types::{Dataset, ShareObject, ShareObjectItem};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    ShareObjectSubmitted,
    ShareItemRequest,
    ExtensionSubmitted,
    Approved,
    Extended,
    ExtensionRejected,
    Rejected,
    Failed,
    Unhealthy,
    Healthy,
    AdminErrorReport,
}

impl NotificationKind {
    /// Whether the dataset approvers receive this kind rather than the requesting team.
    pub fn goes_to_approvers(&self) -> bool {
        matches!(
            self,
            NotificationKind::ShareObjectSubmitted
                | NotificationKind::ShareItemRequest
                | NotificationKind::ExtensionSubmitted
        )
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareNotification {
    pub kind: NotificationKind,
    pub share_uri: Option<String>,
    pub dataset_uri: Option<String>,
    /// Groups to deliver to. Empty for admin reports.
    pub recipients: Vec<String>,
    pub message: String,
}

impl ShareNotification {
    pub fn for_share(kind: NotificationKind, share: &ShareObject, dataset: &Dataset, message: impl Into<String>) -> Self {
        let recipients = if kind.goes_to_approvers() {
            dataset.approver_groups().into_iter().map(str::to_string).collect()
        } else {
            vec![share.group_uri.clone()]
        };
        Self {
            kind,
            share_uri: Some(share.share_uri.clone()),
            dataset_uri: Some(dataset.dataset_uri.clone()),
            recipients,
            message: message.into(),
        }
    }

    /// Per-item failure raised by a processor.
    pub fn item_failed(share: &ShareObject, dataset: &Dataset, item: &ShareObjectItem, reason: &str) -> Self {
        let mut notification = Self::for_share(
            NotificationKind::Failed,
            share,
            dataset,
            format!("{} {} failed: {reason}", item.item_type, item.item_name),
        );
        notification.recipients.push(dataset.admin_group.clone());
        notification.recipients.dedup();
        notification
    }

    pub fn admin_report(subject: &str, errors: &[String]) -> Self {
        Self {
            kind: NotificationKind::AdminErrorReport,
            share_uri: None,
            dataset_uri: None,
            recipients: Vec::new(),
            message: format!("{subject}: {}", errors.join("\n")),
        }
    }
}

/// Fire-and-forget delivery of notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: ShareNotification);
}

/// Writes notifications to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, n: ShareNotification) {
        let share = n.share_uri.as_deref().unwrap_or("-");
        match n.kind {
            NotificationKind::AdminErrorReport => error!("[admin report] {}", n.message),
            NotificationKind::Failed | NotificationKind::Unhealthy => {
                warn!("[{}] share {share} -> {:?}: {}", n.kind, n.recipients, n.message)
            }
            _ => info!("[{}] share {share} -> {:?}: {}", n.kind, n.recipients, n.message),
        }
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<ShareNotification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<ShareNotification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().into_iter().map(|n| n.kind).collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent().iter().filter(|n| n.kind == kind).count()
    }
}

impl NotificationSink for MemoryNotifier {
    fn notify(&self, notification: ShareNotification) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(notification);
    }
}
