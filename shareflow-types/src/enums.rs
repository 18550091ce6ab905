//! Status, action and classification enums.
//!
//! String spellings are the persisted values and must stay stable.

string_enum! {
    /// Lifecycle status of a share object.
    pub enum ShareObjectStatus {
        Deleted => "Deleted",
        Approved => "Approved",
        Rejected => "Rejected",
        Revoked => "Revoked",
        Draft => "Draft",
        Submitted => "Submitted",
        SubmittedForExtension => "Submitted_For_Extension",
        RevokeInProgress => "Revoke_In_Progress",
        ShareInProgress => "Share_In_Progress",
        Processed => "Processed",
    }
}

string_enum! {
    /// Lifecycle status of a single share item.
    pub enum ShareItemStatus {
        Deleted => "Deleted",
        PendingApproval => "PendingApproval",
        ShareApproved => "Share_Approved",
        ShareRejected => "Share_Rejected",
        ShareInProgress => "Share_In_Progress",
        ShareSucceeded => "Share_Succeeded",
        ShareFailed => "Share_Failed",
        RevokeApproved => "Revoke_Approved",
        RevokeInProgress => "Revoke_In_Progress",
        RevokeFailed => "Revoke_Failed",
        RevokeSucceeded => "Revoke_Succeeded",
    }
}

impl ShareItemStatus {
    /// States in which the remote grant exists (or may exist) for the item.
    pub const SHARED: &'static [ShareItemStatus] = &[
        ShareItemStatus::ShareSucceeded,
        ShareItemStatus::ShareInProgress,
        ShareItemStatus::RevokeApproved,
        ShareItemStatus::RevokeInProgress,
        ShareItemStatus::RevokeFailed,
    ];

    /// Terminal non-shared states from which an item may be removed.
    pub const REMOVABLE: &'static [ShareItemStatus] = &[
        ShareItemStatus::PendingApproval,
        ShareItemStatus::ShareRejected,
        ShareItemStatus::RevokeSucceeded,
        ShareItemStatus::ShareFailed,
    ];

    /// States from which a revoke may be requested.
    pub const REVOKABLE: &'static [ShareItemStatus] =
        &[ShareItemStatus::ShareSucceeded, ShareItemStatus::RevokeFailed];

    pub fn is_shared(&self) -> bool {
        Self::SHARED.contains(self)
    }

    pub fn is_removable(&self) -> bool {
        Self::REMOVABLE.contains(self)
    }

    /// Approved or running states, owned by an orchestration run.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ShareItemStatus::ShareApproved
                | ShareItemStatus::ShareInProgress
                | ShareItemStatus::RevokeApproved
                | ShareItemStatus::RevokeInProgress
        )
    }
}

impl ShareObjectStatus {
    /// Whether an item in `item` may coexist with a share object in this status.
    ///
    /// Draft and rejected shares never hold items owned by a running orchestration.
    pub fn admits_item(&self, item: ShareItemStatus) -> bool {
        match self {
            ShareObjectStatus::Draft | ShareObjectStatus::Rejected => !item.is_in_flight(),
            ShareObjectStatus::Deleted => false,
            _ => true,
        }
    }
}

string_enum! {
    /// Secondary health dimension of a shared item.
    pub enum ShareItemHealthStatus {
        PendingVerify => "PendingVerify",
        Healthy => "Healthy",
        Unhealthy => "Unhealthy",
        PendingReApply => "PendingReApply",
    }
}

string_enum! {
    /// Actions applied to a share object.
    pub enum ShareObjectAction {
        Submit => "Submit",
        Approve => "Approve",
        Reject => "Reject",
        RevokeItems => "RevokeItems",
        Start => "Start",
        Finish => "Finish",
        FinishPending => "FinishPending",
        Delete => "Delete",
        AddItem => "AddItem",
        Extension => "Extension",
        ExtensionApprove => "ExtensionApprove",
        ExtensionReject => "ExtensionReject",
        CancelExtension => "CancelExtension",
    }
}

impl ShareObjectAction {
    /// The item-level action an object action fans out to, if any.
    pub fn item_action(&self) -> Option<ShareItemAction> {
        match self {
            ShareObjectAction::Submit => Some(ShareItemAction::Submit),
            ShareObjectAction::Approve => Some(ShareItemAction::Approve),
            ShareObjectAction::Reject => Some(ShareItemAction::Reject),
            ShareObjectAction::RevokeItems => Some(ShareItemAction::RevokeItems),
            ShareObjectAction::Delete => Some(ShareItemAction::Delete),
            ShareObjectAction::AddItem => Some(ShareItemAction::AddItem),
            ShareObjectAction::Extension => Some(ShareItemAction::Extension),
            ShareObjectAction::ExtensionApprove => Some(ShareItemAction::ExtensionApprove),
            ShareObjectAction::ExtensionReject => Some(ShareItemAction::ExtensionReject),
            ShareObjectAction::CancelExtension => Some(ShareItemAction::CancelExtension),
            ShareObjectAction::Start | ShareObjectAction::Finish | ShareObjectAction::FinishPending => {
                None
            }
        }
    }
}

string_enum! {
    /// Actions applied to a share item.
    pub enum ShareItemAction {
        AddItem => "AddItem",
        RemoveItem => "RemoveItem",
        Submit => "Submit",
        Approve => "Approve",
        Reject => "Reject",
        RevokeItems => "RevokeItems",
        Delete => "Delete",
        Start => "Start",
        Success => "Success",
        Failure => "Failure",
        Extension => "Extension",
        ExtensionApprove => "ExtensionApprove",
        ExtensionReject => "ExtensionReject",
        CancelExtension => "CancelExtension",
    }
}

string_enum! {
    /// Kind of resource a share item grants access to.
    pub enum ShareableType {
        Table => "Table",
        StorageLocation => "StorageLocation",
        S3Bucket => "S3Bucket",
        RedshiftTable => "RedshiftTable",
    }
}

string_enum! {
    /// Kind of identity a share grants access to.
    pub enum PrincipalType {
        Group => "Group",
        ConsumptionRole => "ConsumptionRole",
        RedshiftRole => "Redshift_Role",
    }
}

string_enum! {
    /// Data access right requested by a share.
    pub enum SharePermission {
        Read => "Read",
        Write => "Write",
        Modify => "Modify",
    }
}

string_enum! {
    /// Unit a dataset expresses share durations in.
    pub enum ExpirySetting {
        Monthly => "Monthly",
        Quarterly => "Quarterly",
    }
}

impl ExpirySetting {
    /// Number of calendar months in one duration unit.
    pub fn months_per_unit(&self) -> u32 {
        match self {
            ExpirySetting::Monthly => 1,
            ExpirySetting::Quarterly => 3,
        }
    }
}

string_enum! {
    /// Kind of resource a lock row is keyed on, or the kind of its holder.
    pub enum LockResourceType {
        Dataset => "dataset",
        ConsumptionRole => "consumptionrole",
        EnvironmentGroup => "environment_group",
        RedshiftRole => "redshift_role",
        ShareObject => "share_object",
    }
}
