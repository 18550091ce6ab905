//! Tests for the per-type share processors, driven through approve and revoke runs.

mod support;

use pretty_assertions::assert_eq;
use shareflow_cloud::memory::InvitationStatus;
use shareflow_cloud::{AccountScope, CatalogPermission, CatalogResource, WarehouseGrant, WarehouseObject};
use shareflow_engine::naming::{access_point_name, share_policy_name};
use shareflow_engine::state_machine::approve_item_revokes;
use shareflow_engine::{NotificationKind, SharingService};
use shareflow_storage::ItemFilter;
use shareflow_types::ShareableType::{RedshiftTable, S3Bucket, StorageLocation, Table};
use shareflow_types::*;
use support::*;

fn role_arn(role: &str) -> String {
    format!("arn:aws:iam::{TARGET}:role/{role}")
}

fn source_table(name: &str) -> CatalogResource {
    CatalogResource::table(SOURCE, GLUE_DB, name)
}

fn policy_name() -> String {
    share_policy_name("shareflow", TARGET_ENV)
}

async fn revoke_all(fx: &Fixture, service: &SharingService, share: &ShareObject) -> bool {
    let share = fx.share(&share.share_uri);
    let items = fx
        .store
        .list_items(&share.share_uri, &ItemFilter::any().with_statuses(ShareItemStatus::REVOKABLE))
        .unwrap();
    approve_item_revokes(&fx.store, &share, &items).unwrap();
    service.revoke_share(&share.share_uri).await.unwrap()
}

// ── Tables ──────────────────────────────────────────────────────

#[tokio::test]
async fn cross_account_table_share_links_and_grants() {
    let fx = Fixture::new();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);

    assert!(fx.sharing_service().approve_share(&share.share_uri).await.unwrap());

    let item = fx.item(&share, ORDERS);
    assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(item.health_status, Some(ShareItemHealthStatus::Healthy));
    assert!(item.last_verification_time.is_some());
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);

    assert!(fx.cloud.database_exists(TARGET, SHARED_DB));
    assert!(fx.cloud.resource_link_exists(TARGET, SHARED_DB, "orders"));
    assert_eq!(fx.cloud.invitation_status(SOURCE, TARGET), Some(InvitationStatus::Accepted));
    assert!(fx.cloud.has_catalog_grant(SOURCE, TARGET, &source_table("orders"), CatalogPermission::Select));
    assert!(fx.cloud.has_catalog_grant(
        TARGET,
        &role_arn(CONSUMERS_ROLE),
        &source_table("orders"),
        CatalogPermission::Select
    ));
}

#[tokio::test]
async fn pending_invitation_is_accepted_on_a_later_round() {
    let fx = Fixture::new();
    fx.cloud.set_invitation_latency(2);
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);

    assert!(fx.sharing_service().approve_share(&share.share_uri).await.unwrap());
    assert_eq!(fx.cloud.calls_matching("ram.accept"), 3);
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::ShareSucceeded);
}

#[tokio::test]
async fn invitation_never_accepted_fails_the_item() {
    let fx = Fixture::new();
    fx.cloud.set_invitation_latency(5);
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);

    assert!(!fx.sharing_service().approve_share(&share.share_uri).await.unwrap());

    let item = fx.item(&share, ORDERS);
    assert_eq!(item.status, ShareItemStatus::ShareFailed);
    assert!(item.health_message.unwrap().contains("not accepted"));
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);
}

#[tokio::test]
async fn failing_item_does_not_stop_its_siblings() {
    let fx = Fixture::new();
    fx.cloud
        .fail_when(&format!("catalog.create {TARGET} link/{SHARED_DB}/customers"));
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS), (Table, CUSTOMERS)]);

    let success = fx.sharing_service().approve_share(&share.share_uri).await.unwrap();

    assert!(!success);
    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::ShareSucceeded);
    let customers = fx.item(&share, CUSTOMERS);
    assert_eq!(customers.status, ShareItemStatus::ShareFailed);
    assert!(customers.health_message.unwrap().contains("customers"));
    assert_eq!(fx.notifier.count(NotificationKind::Failed), 1);
    assert_eq!(fx.share(&share.share_uri).status, ShareObjectStatus::Processed);
}

#[tokio::test]
async fn processor_error_fails_only_its_type() {
    let fx = Fixture::new();
    fx.cloud
        .fail_when(&format!("catalog.create {TARGET} database/{TARGET}/{SHARED_DB}"));
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS), (S3Bucket, SALES_BUCKET)]);

    assert!(!fx.sharing_service().approve_share(&share.share_uri).await.unwrap());

    assert_eq!(fx.item(&share, ORDERS).status, ShareItemStatus::ShareFailed);
    assert_eq!(fx.item(&share, SALES_BUCKET).status, ShareItemStatus::ShareSucceeded);
}

#[tokio::test]
async fn missing_source_table_fails_the_item() {
    let fx = Fixture::new();
    fx.cloud.remove_table(SOURCE, GLUE_DB, "orders");
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);

    assert!(!fx.sharing_service().approve_share(&share.share_uri).await.unwrap());

    let item = fx.item(&share, ORDERS);
    assert_eq!(item.status, ShareItemStatus::ShareFailed);
    assert!(item.health_message.unwrap().contains("does not exist"));
}

#[tokio::test]
async fn shared_database_outlives_the_first_revoke() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let team = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    let role = fx.approved_share(consumption_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&team.share_uri).await.unwrap());
    assert!(service.approve_share(&role.share_uri).await.unwrap());

    assert!(revoke_all(&fx, &service, &team).await);

    assert_eq!(fx.item(&team, ORDERS).status, ShareItemStatus::RevokeSucceeded);
    assert_eq!(fx.share(&team.share_uri).status, ShareObjectStatus::Processed);
    assert!(fx.cloud.database_exists(TARGET, SHARED_DB));
    assert!(fx.cloud.resource_link_exists(TARGET, SHARED_DB, "orders"));
    assert!(!fx.cloud.has_catalog_grant(
        TARGET,
        &role_arn(CONSUMERS_ROLE),
        &source_table("orders"),
        CatalogPermission::Select
    ));
    assert!(fx.cloud.has_catalog_grant(
        TARGET,
        &role_arn(CONSUMPTION_ROLE_NAME),
        &source_table("orders"),
        CatalogPermission::Select
    ));

    assert!(revoke_all(&fx, &service, &role).await);

    assert!(!fx.cloud.resource_link_exists(TARGET, SHARED_DB, "orders"));
    assert!(!fx.cloud.database_exists(TARGET, SHARED_DB));
    assert!(!fx.cloud.has_catalog_grant(SOURCE, TARGET, &source_table("orders"), CatalogPermission::Select));
}

#[tokio::test]
async fn reapply_finds_existing_artifacts() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    let creates = fx.cloud.calls_matching("catalog.create");

    let item = fx.item(&share, ORDERS);
    fx.store
        .update_item_health(&item.share_item_uri, Some(ShareItemHealthStatus::PendingReApply), None, None)
        .unwrap();
    assert!(service.reapply_share(&share.share_uri).await.unwrap());

    assert_eq!(fx.cloud.calls_matching("catalog.create"), creates);
    let item = fx.item(&share, ORDERS);
    assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(item.health_status, Some(ShareItemHealthStatus::Healthy));
}

#[tokio::test]
async fn verify_detects_dropped_grants() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(Table, ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());
    assert!(service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());

    fx.cloud.drop_catalog_grants(TARGET, &role_arn(CONSUMERS_ROLE));
    assert!(!service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());

    let item = fx.item(&share, ORDERS);
    assert_eq!(item.status, ShareItemStatus::ShareSucceeded);
    assert_eq!(item.health_status, Some(ShareItemHealthStatus::Unhealthy));
    assert!(item.health_message.unwrap().contains("cannot select orders"));
}

// ── Storage locations ───────────────────────────────────────────

fn raw_access_point() -> String {
    access_point_name(CONSUMERS, RAW_LOCATION)
}

#[tokio::test]
async fn location_share_waits_for_the_access_point() {
    let fx = Fixture::new();
    fx.cloud.set_access_point_latency(2);
    let share = fx.approved_share(group_principal(), &[(StorageLocation, RAW_LOCATION)]);

    assert!(fx.sharing_service().approve_share(&share.share_uri).await.unwrap());

    let name = raw_access_point();
    let point = fx.cloud.access_point(SOURCE, &name).unwrap();
    assert_eq!(point.bucket, BUCKET);
    let ap_policy = fx.cloud.access_point_policy(SOURCE, &name).unwrap();
    assert!(ap_policy.has_principal("ShareflowAccessPointRead", &role_arn(CONSUMERS_ROLE)));

    let bucket_policy = fx.cloud.bucket_policy(SOURCE, BUCKET).unwrap();
    assert!(bucket_policy.statement("DelegateAccessToAccessPoint").is_some());

    let role_policy = fx.cloud.role_policy(TARGET, CONSUMERS_ROLE, &policy_name()).unwrap();
    let arn = AccountScope::new(SOURCE, REGION).access_point_arn(&name);
    assert!(role_policy.has_resource("ShareflowAccessPoints", &arn));
}

#[tokio::test]
async fn access_point_never_ready_fails_the_item() {
    let fx = Fixture::new();
    fx.cloud.set_access_point_latency(10);
    let share = fx.approved_share(group_principal(), &[(StorageLocation, RAW_LOCATION)]);

    assert!(!fx.sharing_service().approve_share(&share.share_uri).await.unwrap());

    let item = fx.item(&share, RAW_LOCATION);
    assert_eq!(item.status, ShareItemStatus::ShareFailed);
    assert!(item.health_message.unwrap().contains("not ready"));
}

#[tokio::test]
async fn location_revoke_keeps_the_delegate_statement() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(StorageLocation, RAW_LOCATION)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());

    assert!(revoke_all(&fx, &service, &share).await);

    assert_eq!(fx.item(&share, RAW_LOCATION).status, ShareItemStatus::RevokeSucceeded);
    assert!(fx.cloud.access_point(SOURCE, &raw_access_point()).is_none());
    assert!(fx.cloud.role_policy(TARGET, CONSUMERS_ROLE, &policy_name()).is_none());
    let bucket_policy = fx.cloud.bucket_policy(SOURCE, BUCKET).unwrap();
    assert!(bucket_policy.statement("DelegateAccessToAccessPoint").is_some());
}

#[tokio::test]
async fn encrypted_location_grants_and_revokes_decrypt() {
    let fx = Fixture::new();
    fx.update_dataset(|ds| ds.kms_alias = Some("alias/sales".into()));
    fx.cloud.add_key(SOURCE, "alias/sales", "key-1");
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(StorageLocation, RAW_LOCATION)]);

    assert!(service.approve_share(&share.share_uri).await.unwrap());
    let key_policy = fx.cloud.key_policy(SOURCE, "key-1").unwrap();
    assert!(key_policy.has_principal("ShareflowKmsDecrypt", &role_arn(CONSUMERS_ROLE)));

    assert!(revoke_all(&fx, &service, &share).await);
    let key_policy = fx.cloud.key_policy(SOURCE, "key-1").unwrap();
    assert!(!key_policy.has_principal("ShareflowKmsDecrypt", &role_arn(CONSUMERS_ROLE)));
}

// ── Buckets ─────────────────────────────────────────────────────

#[tokio::test]
async fn bucket_share_grants_write_when_requested() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(group_principal(), &[(S3Bucket, SALES_BUCKET)]);
    let mut stored = fx.share(&share.share_uri);
    stored.permissions = vec![SharePermission::Read, SharePermission::Write];
    fx.store.update_share(&stored).unwrap();

    assert!(service.approve_share(&share.share_uri).await.unwrap());
    let policy = fx.cloud.bucket_policy(SOURCE, BUCKET).unwrap();
    assert!(policy.has_principal("ShareflowRead", &role_arn(CONSUMERS_ROLE)));
    assert!(policy.has_principal("ShareflowWrite", &role_arn(CONSUMERS_ROLE)));

    assert!(revoke_all(&fx, &service, &share).await);
    let policy = fx.cloud.bucket_policy(SOURCE, BUCKET).unwrap();
    assert!(policy.statement("ShareflowRead").is_none());
    assert!(policy.statement("ShareflowWrite").is_none());
    assert!(fx.cloud.role_policy(TARGET, CONSUMERS_ROLE, &policy_name()).is_none());
}

#[tokio::test]
async fn bucket_revoke_keeps_other_principals() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let team = fx.approved_share(group_principal(), &[(S3Bucket, SALES_BUCKET)]);
    let role = fx.approved_share(consumption_principal(), &[(S3Bucket, SALES_BUCKET)]);
    assert!(service.approve_share(&team.share_uri).await.unwrap());
    assert!(service.approve_share(&role.share_uri).await.unwrap());

    assert!(revoke_all(&fx, &service, &team).await);

    let policy = fx.cloud.bucket_policy(SOURCE, BUCKET).unwrap();
    assert!(!policy.has_principal("ShareflowRead", &role_arn(CONSUMERS_ROLE)));
    assert!(policy.has_principal("ShareflowRead", &role_arn(CONSUMPTION_ROLE_NAME)));
}

// ── Warehouse tables ────────────────────────────────────────────

#[tokio::test]
async fn warehouse_share_mounts_the_datashare() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(warehouse_principal(), &[(RedshiftTable, RS_ORDERS)]);

    assert!(service.approve_share(&share.share_uri).await.unwrap());

    let produced = fx.cloud.warehouse_objects("ns-producer");
    assert_eq!(produced.len(), 3);
    assert!(produced
        .iter()
        .any(|o| matches!(o, WarehouseObject::DatashareTable { table, .. } if table == "orders")));
    let consumed = fx.cloud.warehouse_objects("ns-consumer");
    assert!(consumed.iter().any(|o| matches!(o, WarehouseObject::DatashareDatabase { .. })));
    assert!(consumed.iter().any(|o| matches!(o, WarehouseObject::ExternalSchema { .. })));
    let grants = fx.cloud.warehouse_grants("ns-consumer");
    assert!(grants.iter().any(
        |g| matches!(g, WarehouseGrant::TableSelect { table, role, .. } if table == "orders" && role == WAREHOUSE_ROLE)
    ));
    assert!(service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());

    assert!(revoke_all(&fx, &service, &share).await);

    assert!(fx.cloud.warehouse_objects("ns-producer").is_empty());
    assert!(fx.cloud.warehouse_objects("ns-consumer").is_empty());
    assert!(fx.cloud.warehouse_grants("ns-consumer").is_empty());
    assert!(fx.cloud.warehouse_grants("ns-producer").is_empty());
}

#[tokio::test]
async fn warehouse_verify_reports_missing_select() {
    let fx = Fixture::new();
    let service = fx.sharing_service();
    let share = fx.approved_share(warehouse_principal(), &[(RedshiftTable, RS_ORDERS)]);
    assert!(service.approve_share(&share.share_uri).await.unwrap());

    let select = fx
        .cloud
        .warehouse_grants("ns-consumer")
        .into_iter()
        .find(|g| matches!(g, WarehouseGrant::TableSelect { .. }))
        .unwrap();
    fx.cloud.drop_warehouse_grant("ns-consumer", &select);

    assert!(!service.verify_share_with_health(&share.share_uri, None, None).await.unwrap());
    let item = fx.item(&share, RS_ORDERS);
    assert_eq!(item.health_status, Some(ShareItemHealthStatus::Unhealthy));
    assert!(item.health_message.unwrap().contains("missing grant"));
}
