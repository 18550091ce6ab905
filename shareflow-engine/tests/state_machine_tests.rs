//! Tests for the share object and share item transition tables.

mod support;

use pretty_assertions::assert_eq;
use shareflow_engine::state_machine::{apply_share_action, approve_item_revokes, plan_item_moves, run_transition};
use shareflow_engine::{EngineError, ShareItemSM, ShareObjectSM};
use shareflow_storage::ItemFilter;
use shareflow_types::ShareItemStatus as I;
use shareflow_types::ShareObjectStatus as O;
use shareflow_types::{ShareItemAction, ShareObjectAction, ShareableType};
use support::*;

// ── Share object table ──────────────────────────────────────────

#[test]
fn object_transitions() {
    use ShareObjectAction::*;
    let cases = [
        (O::Draft, Submit, O::Submitted),
        (O::Rejected, Submit, O::Submitted),
        (O::Submitted, Approve, O::Approved),
        (O::Submitted, Reject, O::Rejected),
        (O::Processed, RevokeItems, O::Revoked),
        (O::Draft, RevokeItems, O::Revoked),
        (O::Approved, Start, O::ShareInProgress),
        (O::Revoked, Start, O::RevokeInProgress),
        (O::ShareInProgress, Finish, O::Processed),
        (O::RevokeInProgress, Finish, O::Processed),
        (O::RevokeInProgress, FinishPending, O::Draft),
        (O::Processed, AddItem, O::Draft),
        (O::Submitted, AddItem, O::Draft),
        (O::Processed, Delete, O::Deleted),
        (O::Processed, Extension, O::SubmittedForExtension),
        (O::SubmittedForExtension, ExtensionApprove, O::Processed),
        (O::SubmittedForExtension, ExtensionReject, O::Processed),
        (O::SubmittedForExtension, CancelExtension, O::Processed),
    ];
    for (state, action, expected) in cases {
        assert_eq!(run_transition(state, action).unwrap(), expected, "{state} --{action}-->");
    }
}

#[test]
fn replaying_an_action_keeps_its_target() {
    assert_eq!(run_transition(O::Approved, ShareObjectAction::Approve).unwrap(), O::Approved);
    assert_eq!(run_transition(O::Draft, ShareObjectAction::AddItem).unwrap(), O::Draft);
    assert_eq!(run_transition(O::Revoked, ShareObjectAction::RevokeItems).unwrap(), O::Revoked);
}

#[test]
fn invalid_object_transitions_are_rejected() {
    use ShareObjectAction::*;
    let cases = [
        (O::Draft, Approve),
        (O::Processed, Submit),
        (O::Approved, RevokeItems),
        (O::ShareInProgress, Delete),
        (O::Draft, Start),
        (O::Submitted, Extension),
        (O::Approved, ExtensionApprove),
    ];
    for (state, action) in cases {
        let err = run_transition(state, action).unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidStateTransition { entity: "share object", .. }),
            "{state} --{action}--> should fail, got {err}"
        );
    }
}

// ── Share item table ────────────────────────────────────────────

#[test]
fn item_transitions() {
    use ShareItemAction::*;
    let cases = [
        (I::PendingApproval, Approve, I::ShareApproved),
        (I::PendingApproval, Reject, I::ShareRejected),
        (I::ShareSucceeded, Approve, I::ShareSucceeded),
        (I::ShareApproved, Start, I::ShareInProgress),
        (I::RevokeApproved, Start, I::RevokeInProgress),
        (I::ShareInProgress, Success, I::ShareSucceeded),
        (I::RevokeInProgress, Success, I::RevokeSucceeded),
        (I::ShareInProgress, Failure, I::ShareFailed),
        (I::ShareApproved, Failure, I::ShareFailed),
        (I::RevokeApproved, Failure, I::RevokeFailed),
        (I::ShareSucceeded, RevokeItems, I::RevokeApproved),
        (I::RevokeFailed, RevokeItems, I::RevokeApproved),
        (I::ShareFailed, RemoveItem, I::Deleted),
        (I::RevokeSucceeded, RemoveItem, I::Deleted),
        (I::PendingApproval, Submit, I::PendingApproval),
        (I::ShareSucceeded, Extension, I::ShareSucceeded),
    ];
    for (state, action, expected) in cases {
        assert_eq!(run_transition(state, action).unwrap(), expected, "{state} --{action}-->");
    }
}

#[test]
fn shared_items_cannot_be_removed_or_rerevoked_midflight() {
    assert!(run_transition(I::ShareSucceeded, ShareItemAction::RemoveItem).is_err());
    assert!(run_transition(I::RevokeInProgress, ShareItemAction::RevokeItems).is_err());
    assert!(run_transition(I::ShareInProgress, ShareItemAction::Submit).is_err());
    assert!(run_transition(I::PendingApproval, ShareItemAction::Start).is_err());
}

#[test]
fn plan_fails_on_first_unaccepted_state() {
    let err = plan_item_moves(&[I::PendingApproval, I::ShareInProgress], ShareItemAction::Approve).unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { entity: "share item", .. }));

    let moves = plan_item_moves(&[I::PendingApproval, I::ShareSucceeded], ShareItemAction::Approve).unwrap();
    assert_eq!(
        moves,
        vec![
            (I::PendingApproval, I::ShareApproved),
            (I::ShareSucceeded, I::ShareSucceeded)
        ]
    );
}

// ── Persisting machines ─────────────────────────────────────────

#[test]
fn approve_fans_out_to_pending_items_only() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), O::Submitted);
    fx.seed_item(&share, ShareableType::Table, ORDERS, I::PendingApproval);
    fx.seed_item(&share, ShareableType::Table, CUSTOMERS, I::ShareSucceeded);

    let next = apply_share_action(&fx.store, &share, ShareObjectAction::Approve).unwrap();

    assert_eq!(next, O::Approved);
    assert_eq!(fx.share(&share.share_uri).status, O::Approved);
    assert_eq!(fx.item(&share, ORDERS).status, I::ShareApproved);
    assert_eq!(fx.item(&share, CUSTOMERS).status, I::ShareSucceeded);
}

#[test]
fn rejected_fan_out_persists_nothing() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), O::Submitted);
    fx.seed_item(&share, ShareableType::Table, ORDERS, I::PendingApproval);
    fx.seed_item(&share, ShareableType::Table, CUSTOMERS, I::ShareInProgress);

    assert!(apply_share_action(&fx.store, &share, ShareObjectAction::Approve).is_err());
    assert_eq!(fx.share(&share.share_uri).status, O::Submitted);
    assert_eq!(fx.item(&share, ORDERS).status, I::PendingApproval);
}

#[test]
fn revoke_approval_touches_selected_items() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), O::Processed);
    let orders = fx.seed_item(&share, ShareableType::Table, ORDERS, I::ShareSucceeded);
    fx.seed_item(&share, ShareableType::Table, CUSTOMERS, I::ShareSucceeded);

    let next = approve_item_revokes(&fx.store, &share, &[orders]).unwrap();

    assert_eq!(next, O::Revoked);
    assert_eq!(fx.item(&share, ORDERS).status, I::RevokeApproved);
    assert_eq!(fx.item(&share, CUSTOMERS).status, I::ShareSucceeded);
}

#[test]
fn revoke_approval_of_unshared_item_changes_nothing() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), O::Processed);
    let orders = fx.seed_item(&share, ShareableType::Table, ORDERS, I::ShareSucceeded);
    let customers = fx.seed_item(&share, ShareableType::Table, CUSTOMERS, I::ShareFailed);

    let err = approve_item_revokes(&fx.store, &share, &[orders, customers]).unwrap_err();

    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    assert_eq!(fx.share(&share.share_uri).status, O::Processed);
    assert_eq!(fx.item(&share, ORDERS).status, I::ShareSucceeded);
}

#[test]
fn item_machine_moves_one_type_at_a_time() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), O::ShareInProgress);
    fx.seed_item(&share, ShareableType::Table, ORDERS, I::ShareApproved);
    fx.seed_item(&share, ShareableType::S3Bucket, SALES_BUCKET, I::ShareApproved);

    let mut sm = ShareItemSM::new(I::ShareApproved);
    let moved = sm
        .update_state_for_type(&fx.store, &share.share_uri, Some(ShareableType::Table), I::ShareFailed)
        .unwrap();

    assert_eq!(moved, 1);
    assert_eq!(sm.state(), I::ShareFailed);
    let approved = ItemFilter::any().with_status(I::ShareApproved);
    assert_eq!(fx.store.count_items(&share.share_uri, &approved).unwrap(), 1);
}

#[test]
fn object_machine_skips_unchanged_writes() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), O::Approved);
    let before = fx.share(&share.share_uri).updated;

    let mut sm = ShareObjectSM::new(O::Approved);
    sm.update_state(&fx.store, &share.share_uri, O::Approved).unwrap();

    assert_eq!(fx.share(&share.share_uri).updated, before);
}
