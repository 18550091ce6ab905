//! Tests for the scheduled verifier, reapplier and expiration tasks.

mod support;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use shareflow_engine::tasks::{reapply_unhealthy_shares, revoke_expired_shares, verify_all_shares};
use shareflow_engine::{NotificationKind, SharingService, TaskReport};
use shareflow_types::ShareableType::Table;
use shareflow_types::*;
use support::*;

fn team_role_arn() -> String {
    format!("arn:aws:iam::{TARGET}:role/{CONSUMERS_ROLE}")
}

async fn granted(fx: &Fixture, service: &SharingService, principal: SharePrincipal) -> ShareObject {
    let share = fx.approved_share(principal, &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    fx.share(&share.share_uri)
}

fn expire_yesterday(fx: &Fixture, share: &ShareObject) {
    let mut share = fx.share(&share.share_uri);
    share.expiry_date = Some(Utc::now() - Duration::days(1));
    fx.store.update_share(&share).unwrap();
}

// ── Verifier ────────────────────────────────────────────────────

#[tokio::test]
async fn verifier_checks_every_active_share() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let team = granted(&fx, &service, group_principal()).await;
    let role = granted(&fx, &service, consumption_principal()).await;
    fx.cloud.drop_catalog_grants(TARGET, &team_role_arn());

    let report = verify_all_shares(&service).await.unwrap();

    assert_eq!(
        report,
        TaskReport {
            processed: 2,
            succeeded: 1,
            errors: vec![],
        }
    );
    assert_eq!(fx.item(&team, ORDERS).health_status, Some(ShareItemHealthStatus::Unhealthy));
    assert_eq!(fx.item(&role, ORDERS).health_status, Some(ShareItemHealthStatus::Healthy));
    assert_eq!(fx.notifier.count(NotificationKind::AdminErrorReport), 0);
}

#[tokio::test]
async fn verifier_skips_shares_without_grants() {
    let fx = Fixture::new();
    let share = fx.seed_share(group_principal(), ShareObjectStatus::Processed);
    fx.seed_item(&share, Table, ORDERS, ShareItemStatus::RevokeSucceeded);

    let report = verify_all_shares(&fx.sharing_service()).await.unwrap();
    assert_eq!(report.processed, 0);
}

// ── Reapplier ───────────────────────────────────────────────────

#[tokio::test]
async fn reapplier_repairs_unhealthy_items() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = granted(&fx, &service, group_principal()).await;
    fx.cloud.drop_catalog_grants(TARGET, &team_role_arn());
    verify_all_shares(&service).await.unwrap();

    let elsewhere = reapply_unhealthy_shares(&service, Some("ds-elsewhere")).await.unwrap();
    assert_eq!(elsewhere.processed, 0);
    assert_eq!(fx.item(&share, ORDERS).health_status, Some(ShareItemHealthStatus::Unhealthy));

    let report = reapply_unhealthy_shares(&service, Some(DATASET)).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    let orders = fx.item(&share, ORDERS);
    assert_eq!(orders.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(orders.health_status, Some(ShareItemHealthStatus::Healthy));
    assert_eq!(verify_all_shares(&service).await.unwrap().succeeded, 1);
}

#[tokio::test]
async fn reapplier_leaves_healthy_shares_alone() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    granted(&fx, &service, group_principal()).await;
    let grants = fx.cloud.calls_matching("catalog.grant");

    let report = reapply_unhealthy_shares(&service, None).await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(fx.cloud.calls_matching("catalog.grant"), grants);
}

// ── Expiration ──────────────────────────────────────────────────

#[tokio::test]
async fn expired_shares_are_revoked() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let expired = granted(&fx, &service, group_principal()).await;
    let lasting = granted(&fx, &service, consumption_principal()).await;
    expire_yesterday(&fx, &expired);

    let report = revoke_expired_shares(&service, Utc::now()).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(fx.item(&expired, ORDERS).status, ShareItemStatus::RevokeSucceeded);
    assert_eq!(fx.share(&expired.share_uri).status, ShareObjectStatus::Processed);
    assert_eq!(fx.item(&lasting, ORDERS).status, ShareItemStatus::ShareSucceeded);
}

#[tokio::test]
async fn non_expirable_shares_are_kept() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = granted(&fx, &service, group_principal()).await;
    let mut stored = fx.share(&share.share_uri);
    stored.expiry_date = Some(Utc::now() - Duration::days(1));
    stored.non_expirable = true;
    fx.store.update_share(&stored).unwrap();

    let report = revoke_expired_shares(&service, Utc::now()).await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::ShareSucceeded);
}

#[tokio::test]
async fn failed_expiration_is_reported_to_admins() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = granted(&fx, &service, group_principal()).await;
    expire_yesterday(&fx, &share);
    fx.cloud.remove_role(TARGET, CONSUMERS_ROLE);

    let report = revoke_expired_shares(&service, Utc::now()).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with(&share.share_uri));
    assert_eq!(fx.notifier.count(NotificationKind::AdminErrorReport), 1);
    // The revoke stays approved for the next run.
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::RevokeApproved);
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Revoked);
}
