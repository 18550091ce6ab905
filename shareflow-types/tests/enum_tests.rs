use pretty_assertions::assert_eq;
use shareflow_types::*;

// ── Stored spellings ────────────────────────────────────────────

#[test]
fn item_status_uses_underscored_spelling() {
    assert_eq!(ShareItemStatus::ShareApproved.as_str(), "Share_Approved");
    assert_eq!(ShareItemStatus::RevokeInProgress.to_string(), "Revoke_In_Progress");
    assert_eq!("Share_Succeeded".parse::<ShareItemStatus>(), Ok(ShareItemStatus::ShareSucceeded));
}

#[test]
fn object_status_serde_matches_display() {
    let json = serde_json::to_string(&ShareObjectStatus::SubmittedForExtension).unwrap();
    assert_eq!(json, "\"Submitted_For_Extension\"");
    let back: ShareObjectStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ShareObjectStatus::SubmittedForExtension);
}

#[test]
fn unknown_value_is_rejected() {
    let err = "Share_Pending".parse::<ShareItemStatus>().unwrap_err();
    assert_eq!(err.to_string(), "unknown ShareItemStatus value: Share_Pending");
}

#[test]
fn every_variant_parses_back() {
    for status in ShareItemStatus::ALL {
        assert_eq!(status.as_str().parse::<ShareItemStatus>(), Ok(*status));
    }
    for action in ShareObjectAction::ALL {
        assert_eq!(action.as_str().parse::<ShareObjectAction>(), Ok(*action));
    }
}

#[test]
fn lock_resource_types_are_lowercase() {
    assert_eq!(LockResourceType::Dataset.as_str(), "dataset");
    assert_eq!(LockResourceType::ConsumptionRole.as_str(), "consumptionrole");
    assert_eq!(LockResourceType::EnvironmentGroup.as_str(), "environment_group");
    assert_eq!(LockResourceType::ShareObject.as_str(), "share_object");
}

// ── Classification ──────────────────────────────────────────────

#[test]
fn shared_states_hold_remote_grants() {
    assert!(ShareItemStatus::ShareSucceeded.is_shared());
    assert!(ShareItemStatus::RevokeFailed.is_shared());
    assert!(ShareItemStatus::RevokeApproved.is_shared());
    assert!(!ShareItemStatus::ShareFailed.is_shared());
    assert!(!ShareItemStatus::RevokeSucceeded.is_shared());
    assert!(!ShareItemStatus::PendingApproval.is_shared());
}

#[test]
fn removable_states_are_never_shared() {
    for status in ShareItemStatus::REMOVABLE {
        assert!(!status.is_shared(), "{status} is both removable and shared");
    }
}

#[test]
fn draft_share_rejects_in_flight_items() {
    assert!(!ShareObjectStatus::Draft.admits_item(ShareItemStatus::ShareApproved));
    assert!(!ShareObjectStatus::Draft.admits_item(ShareItemStatus::ShareInProgress));
    assert!(ShareObjectStatus::Draft.admits_item(ShareItemStatus::PendingApproval));
    assert!(ShareObjectStatus::Processed.admits_item(ShareItemStatus::ShareSucceeded));
}

#[test]
fn run_actions_do_not_fan_out_to_items() {
    assert_eq!(ShareObjectAction::Start.item_action(), None);
    assert_eq!(ShareObjectAction::Finish.item_action(), None);
    assert_eq!(ShareObjectAction::FinishPending.item_action(), None);
    assert_eq!(ShareObjectAction::Approve.item_action(), Some(ShareItemAction::Approve));
    assert_eq!(ShareObjectAction::Delete.item_action(), Some(ShareItemAction::Delete));
}

#[test]
fn quarterly_unit_is_three_months() {
    assert_eq!(ExpirySetting::Monthly.months_per_unit(), 1);
    assert_eq!(ExpirySetting::Quarterly.months_per_unit(), 3);
}

// ── Records ─────────────────────────────────────────────────────

#[test]
fn new_draft_share_requests_read() {
    let principal = SharePrincipal {
        principal_id: "group-a".into(),
        principal_type: PrincipalType::Group,
        principal_role_name: Some("team-a-role".into()),
    };
    let share = ShareObject::draft("ds-1", "env-2", "group-a", principal.clone(), "alice");
    assert_eq!(share.status, ShareObjectStatus::Draft);
    assert_eq!(share.permissions, vec![SharePermission::Read]);
    assert_eq!(share.principal(), principal);
    assert_eq!(share.role_name(), "team-a-role");
    assert!(!share.has_write_access());
}

#[test]
fn new_uris_are_short_and_distinct() {
    let a = new_uri();
    let b = new_uri();
    assert_eq!(a.len(), 12);
    assert_ne!(a, b);
}
