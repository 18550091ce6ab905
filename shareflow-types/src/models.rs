//! Persisted share records.

use crate::enums::*;
use crate::ids::new_uri;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The identity a share grants access to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePrincipal {
    /// Group URI, consumption role URI, or warehouse connection URI.
    pub principal_id: String,
    pub principal_type: PrincipalType,
    /// Name of the execution role (IAM role, or warehouse role for Redshift principals).
    pub principal_role_name: Option<String>,
}

/// A request granting one principal access to one dataset's resources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareObject {
    pub share_uri: String,
    pub dataset_uri: String,
    /// Target environment.
    pub environment_uri: String,
    /// Requesting team.
    pub group_uri: String,
    pub principal_id: String,
    pub principal_type: PrincipalType,
    pub principal_role_name: Option<String>,
    pub owner: String,
    pub status: ShareObjectStatus,
    pub permissions: Vec<SharePermission>,
    pub request_purpose: Option<String>,
    pub reject_purpose: Option<String>,
    pub extension_reason: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub requested_expiry_date: Option<DateTime<Utc>>,
    /// Requested share duration, in the dataset's expiry units.
    pub share_expiration_period: Option<u32>,
    pub non_expirable: bool,
    pub submitted_for_extension: bool,
    pub last_extension_date: Option<DateTime<Utc>>,
}

impl ShareObject {
    /// Creates a new share object in Draft.
    pub fn draft(
        dataset_uri: impl Into<String>,
        environment_uri: impl Into<String>,
        group_uri: impl Into<String>,
        principal: SharePrincipal,
        owner: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            share_uri: new_uri(),
            dataset_uri: dataset_uri.into(),
            environment_uri: environment_uri.into(),
            group_uri: group_uri.into(),
            principal_id: principal.principal_id,
            principal_type: principal.principal_type,
            principal_role_name: principal.principal_role_name,
            owner: owner.into(),
            status: ShareObjectStatus::Draft,
            permissions: vec![SharePermission::Read],
            request_purpose: None,
            reject_purpose: None,
            extension_reason: None,
            created: now,
            updated: now,
            expiry_date: None,
            requested_expiry_date: None,
            share_expiration_period: None,
            non_expirable: false,
            submitted_for_extension: false,
            last_extension_date: None,
        }
    }

    pub fn principal(&self) -> SharePrincipal {
        SharePrincipal {
            principal_id: self.principal_id.clone(),
            principal_type: self.principal_type,
            principal_role_name: self.principal_role_name.clone(),
        }
    }

    /// Role name used for remote grants, or an empty string when unresolved.
    pub fn role_name(&self) -> &str {
        self.principal_role_name.as_deref().unwrap_or_default()
    }

    pub fn has_write_access(&self) -> bool {
        self.permissions
            .iter()
            .any(|p| matches!(p, SharePermission::Write | SharePermission::Modify))
    }
}

/// One concrete resource within a share object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareObjectItem {
    pub share_item_uri: String,
    pub share_uri: String,
    pub item_type: ShareableType,
    pub item_uri: String,
    pub item_name: String,
    pub owner: String,
    pub status: ShareItemStatus,
    pub health_status: Option<ShareItemHealthStatus>,
    pub health_message: Option<String>,
    pub last_verification_time: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl ShareObjectItem {
    /// Creates a new item awaiting approval.
    pub fn pending(
        share_uri: impl Into<String>,
        item_type: ShareableType,
        item_uri: impl Into<String>,
        item_name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            share_item_uri: new_uri(),
            share_uri: share_uri.into(),
            item_type,
            item_uri: item_uri.into(),
            item_name: item_name.into(),
            owner: owner.into(),
            status: ShareItemStatus::PendingApproval,
            health_status: None,
            health_message: None,
            last_verification_time: None,
            created: now,
            updated: now,
        }
    }
}

/// Key of a lockable resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub resource_uri: String,
    pub resource_type: LockResourceType,
}

impl LockKey {
    pub fn new(resource_uri: impl Into<String>, resource_type: LockResourceType) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            resource_type,
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_uri)
    }
}

/// The holder of a set of locks.
///
/// `run_id` identifies one run. Two runs of the same share are distinct owners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub acquired_by_uri: String,
    pub acquired_by_type: LockResourceType,
    pub run_id: String,
}

impl LockOwner {
    /// A fresh owner for one run of `share_uri`.
    pub fn share(share_uri: impl Into<String>) -> Self {
        Self {
            acquired_by_uri: share_uri.into(),
            acquired_by_type: LockResourceType::ShareObject,
            run_id: new_uri(),
        }
    }
}

/// A live lock row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceLock {
    pub key: LockKey,
    pub owner: LockOwner,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ResourceLock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Item counts reported for a share.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStatistics {
    pub shared_items: usize,
    pub revoked_items: usize,
    pub failed_items: usize,
    pub pending_items: usize,
}
