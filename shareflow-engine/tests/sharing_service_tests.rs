//! Tests for approve, revoke, verify and reapply runs.

mod support;

use pretty_assertions::assert_eq;
use shareflow_engine::state_machine::approve_item_revokes;
use shareflow_engine::{EngineError, NotificationKind};
use shareflow_types::ShareableType::{S3Bucket, StorageLocation, Table};
use shareflow_types::*;
use support::*;

fn hold_dataset_lock(fx: &Fixture) {
    let service = fx.sharing_service();
    let key = LockKey::new(DATASET, LockResourceType::Dataset);
    assert!(service.locks().acquire_locks(&[key], &LockOwner::share("share-elsewhere")).unwrap());
}

// ── Approve ─────────────────────────────────────────────────────

#[tokio::test]
async fn approve_processes_every_type_and_releases_locks() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(
        group_principal(),
        &[(Table, ORDERS), (StorageLocation, RAW_LOCATION), (S3Bucket, SALES_BUCKET)],
    );

    assert!(service.approve_share(&share.share_uri).await.unwrap());

    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);
    for uri in [ORDERS, RAW_LOCATION, SALES_BUCKET] {
        let item = fx.item(&share, uri);
        assert_eq!(item.status, ShareItemStatus::ShareSucceeded, "{uri}");
        assert_eq!(item.health_status, Some(ShareItemHealthStatus::Healthy), "{uri}");
    }
    let data_key = LockKey::new(DATASET, LockResourceType::Dataset);
    assert!(!service.locks().is_locked(&data_key).unwrap());
    assert_eq!(fx.notifier.count(NotificationKind::Failed), 0);
}

#[tokio::test]
async fn missing_principal_role_fails_before_any_change() {
    let fx = Fixture::new();
    fx.cloud.remove_role(TARGET, CONSUMERS_ROLE);
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);

    let err = fx.sharing_service().approve_share(&share.share_uri).await.unwrap_err();

    assert!(matches!(err, EngineError::PrincipalRoleNotFound { ref role, .. } if role == CONSUMERS_ROLE));
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Approved);
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::ShareApproved);
    assert_eq!(fx.cloud.calls_matching("catalog.create"), 0);
}

#[tokio::test]
async fn busy_dataset_lock_times_out_without_changes() {
    let fx = Fixture::new();
    hold_dataset_lock(&fx);
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);

    let err = fx.sharing_service().approve_share(&share.share_uri).await.unwrap_err();

    assert!(matches!(err, EngineError::ResourceLockTimeout { .. }));
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Approved);
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::ShareApproved);
}

#[tokio::test]
async fn approve_of_a_draft_share_is_an_invalid_transition() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), ShareObjectStatus::Draft);
    fx.seed_item(&share, Table, ORDERS, ShareItemStatus::PendingApproval);
    let service = fx.sharing_service();

    let err = service.approve_share(&share.share_uri).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    let data_key = LockKey::new(DATASET, LockResourceType::Dataset);
    assert!(!service.locks().is_locked(&data_key).unwrap());
}

#[tokio::test]
async fn unknown_share_is_not_found() {
    let fx = Fixture::new();
    let err = fx.sharing_service().approve_share("share-missing").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err}");
}

// ── Concurrent runs ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn duplicate_approve_runs_dispatch_once() {
    let mut fx = Fixture::new();
    fx.config.lock_max_retries = 10;
    fx.config.lock_retry_interval_secs = 45;
    fx.config.access_point_poll_interval_secs = 30;
    fx.cloud.set_access_point_latency(2);
    let share = fx.approved_share(group_principal(), &[(StorageLocation, RAW_LOCATION)]);
    let first = fx.sharing_service();
    let second = fx.sharing_service();
    let observer = fx.sharing_service();
    let data_key = LockKey::new(DATASET, LockResourceType::Dataset);

    let watch = async {
        // The winner polls its access point until t=60; the loser retries at t=45.
        for wait in [10, 40] {
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
            assert!(observer.locks().is_locked(&data_key).unwrap(), "after {wait}s");
            let other = LockOwner::share("share-elsewhere");
            assert!(!observer.locks().acquire_locks(std::slice::from_ref(&data_key), &other).unwrap());
        }
    };
    let (a, b, ()) = tokio::join!(
        first.approve_share(&share.share_uri),
        second.approve_share(&share.share_uri),
        watch
    );

    let (won, lost) = if a.is_ok() { (a, b) } else { (b, a) };
    assert!(won.unwrap());
    assert!(matches!(lost, Err(EngineError::InvalidStateTransition { .. })), "{lost:?}");

    assert_eq!(fx.cloud.calls_matching("s3.create_access_point"), 1);
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);
    assert_eq!(fx.item(&share, RAW_LOCATION).status, ShareItemStatus::ShareSucceeded);
    assert!(!observer.locks().is_locked(&data_key).unwrap());
}

// ── Revoke ──────────────────────────────────────────────────────

#[tokio::test]
async fn revoke_returns_to_draft_while_items_await_approval() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    fx.seed_item(&fx.share(&share.share_uri), Table, CUSTOMERS, ShareItemStatus::PendingApproval);

    let share = fx.share(&share.share_uri);
    let orders = fx.item(&share, ORDERS);
    approve_item_revokes(&fx.store, &share, &[orders]).unwrap();
    assert!(service.revoke_share(&share.share_uri).await.unwrap());

    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Draft);
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::RevokeSucceeded);
    assert_eq!(fx.item(&share, CUSTOMERS).status, ShareItemStatus::PendingApproval);
}

#[tokio::test]
async fn failed_revoke_leaves_the_item_revoke_failed() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(S3Bucket, SALES_BUCKET)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    fx.cloud.fail_when(&format!("s3.put_bucket_policy {SOURCE} {BUCKET}"));

    let share = fx.share(&share.share_uri);
    let bucket = fx.item(&share, SALES_BUCKET);
    approve_item_revokes(&fx.store, &share, &[bucket]).unwrap();
    assert!(!service.revoke_share(&share.share_uri).await.unwrap());

    assert_eq!(fx.item(&share, SALES_BUCKET).status, ShareItemStatus::RevokeFailed);
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);

    // A second attempt succeeds once the fault clears.
    fx.cloud.clear_faults();
    let share = fx.share(&share.share_uri);
    let bucket = fx.item(&share, SALES_BUCKET);
    approve_item_revokes(&fx.store, &share, &[bucket]).unwrap();
    assert!(service.revoke_share(&share.share_uri).await.unwrap());
    assert_eq!(fx.item(&share, SALES_BUCKET).status, ShareItemStatus::RevokeSucceeded);
}

// ── Verify ──────────────────────────────────────────────────────

#[tokio::test]
async fn verify_with_missing_principal_marks_items_unhealthy() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS), (S3Bucket, SALES_BUCKET)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    fx.cloud.remove_role(TARGET, CONSUMERS_ROLE);

    assert!(!service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());

    for uri in [ORDERS, SALES_BUCKET] {
        let item = fx.item(&share, uri);
        assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
        assert_eq!(item.health_status, Some(ShareItemHealthStatus::Unhealthy));
        assert!(item.health_message.unwrap().contains("consumers-role not found"));
    }
    assert_eq!(fx.notifier.count(NotificationKind::Unhealthy), 1);
}

#[tokio::test]
async fn verify_defaults_to_items_pending_verification() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS), (Table, CUSTOMERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    let orders = fx.item(&share, ORDERS);
    fx.store
        .update_item_health(&orders.share_item_uri, Some(ShareItemHealthStatus::PendingVerify), None, None)
        .unwrap();
    fx.cloud.drop_catalog_grants(TARGET, &format!("arn:aws:iam::{TARGET}:role/{CONSUMERS_ROLE}"));

    let healthy = service.verify_share(&share.share_uri, None).await.unwrap();

    assert!(!healthy);
    assert_eq!(fx.item(&share, ORDERS).health_status, Some(ShareItemHealthStatus::Unhealthy));
    assert_eq!(fx.item(&share, CUSTOMERS).health_status, Some(ShareItemHealthStatus::Healthy));
}

#[tokio::test]
async fn verify_without_items_pending_verification_checks_nothing() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    fx.cloud.drop_catalog_grants(TARGET, &format!("arn:aws:iam::{TARGET}:role/{CONSUMERS_ROLE}"));

    assert!(service.verify_share(&share.share_uri, None).await.unwrap());
    assert_eq!(fx.item(&share, ORDERS).health_status, Some(ShareItemHealthStatus::Healthy));

    assert!(!service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());
    assert_eq!(fx.item(&share, ORDERS).health_status, Some(ShareItemHealthStatus::Unhealthy));
}

// ── Reapply ─────────────────────────────────────────────────────

#[tokio::test]
async fn reapply_repairs_dropped_grants() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    fx.cloud.drop_catalog_grants(TARGET, &format!("arn:aws:iam::{TARGET}:role/{CONSUMERS_ROLE}"));
    assert!(!service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());

    let orders = fx.item(&share, ORDERS);
    fx.store
        .update_item_health(&orders.share_item_uri, Some(ShareItemHealthStatus::PendingReApply), None, None)
        .unwrap();
    assert!(service.reapply_share(&share.share_uri).await.unwrap());

    let orders = fx.item(&share, ORDERS);
    assert_eq!(orders.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(orders.health_status, Some(ShareItemHealthStatus::Healthy));
    assert!(service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);
}

#[tokio::test]
async fn reapply_lock_timeout_marks_items_unhealthy() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    let orders = fx.item(&share, ORDERS);
    fx.store
        .update_item_health(&orders.share_item_uri, Some(ShareItemHealthStatus::PendingReApply), None, None)
        .unwrap();
    hold_dataset_lock(&fx);

    assert!(!service.reapply_share(&share.share_uri).await.unwrap());

    let orders = fx.item(&share, ORDERS);
    assert_eq!(orders.health_status, Some(ShareItemHealthStatus::Unhealthy));
    assert!(orders.health_message.unwrap().starts_with("SHARING PROCESS TIMEOUT"));
}

#[tokio::test]
async fn reapply_with_missing_principal_changes_nothing() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    let orders = fx.item(&share, ORDERS);
    fx.store
        .update_item_health(&orders.share_item_uri, Some(ShareItemHealthStatus::PendingReApply), None, None)
        .unwrap();
    fx.cloud.remove_role(TARGET, CONSUMERS_ROLE);

    assert!(!service.reapply_share(&share.share_uri).await.unwrap());
    assert_eq!(
        fx.item(&share, ORDERS).health_status,
        Some(ShareItemHealthStatus::PendingReApply)
    );
}
