//! Shared fixture for engine tests: an owning team sharing a dataset from
//! the source account with a consuming team in the target account.

#![allow(dead_code)]

use shareflow_cloud::{CloudClients, MemoryCloud};
use shareflow_engine::{
    EngineConfig, IamPrincipalResolver, MemoryNotifier, MemoryTaskQueue, RequestContext, ShareObjectService,
    SharingService,
};
use shareflow_storage::{MemoryCatalog, ShareStore};
use shareflow_types::*;
use std::sync::Arc;

pub const SOURCE: &str = "111111111111";
pub const TARGET: &str = "222222222222";
pub const REGION: &str = "eu-west-1";

pub const DATASET: &str = "ds-sales";
pub const GLUE_DB: &str = "sales_db";
pub const SHARED_DB: &str = "sales_db_shared";
pub const BUCKET: &str = "sales-bucket";

pub const SOURCE_ENV: &str = "env-source";
pub const TARGET_ENV: &str = "env-target";

pub const OWNERS: &str = "team-owners";
pub const STEWARDS: &str = "team-stewards";
pub const CONSUMERS: &str = "team-consumers";
pub const CONSUMERS_ROLE: &str = "consumers-role";

pub const CONSUMPTION_ROLE: &str = "cr-analytics";
pub const CONSUMPTION_ROLE_NAME: &str = "analytics-role";

pub const PRODUCER_CONN: &str = "rs-producer";
pub const CONSUMER_CONN: &str = "rs-consumer";
pub const WAREHOUSE_ROLE: &str = "analyst";

pub const ORDERS: &str = "tbl-orders";
pub const CUSTOMERS: &str = "tbl-customers";
pub const RAW_LOCATION: &str = "loc-raw";
pub const SALES_BUCKET: &str = "bkt-sales";
pub const RS_ORDERS: &str = "rs-orders";

pub fn dataset() -> Dataset {
    Dataset {
        dataset_uri: DATASET.into(),
        label: "sales".into(),
        environment_uri: SOURCE_ENV.into(),
        owner: "olivia".into(),
        admin_group: OWNERS.into(),
        stewards: Some(STEWARDS.into()),
        aws_account_id: SOURCE.into(),
        region: REGION.into(),
        glue_database_name: GLUE_DB.into(),
        s3_bucket_name: BUCKET.into(),
        kms_alias: None,
        redshift_connection_uri: Some(PRODUCER_CONN.into()),
        redshift_schema: Some("public".into()),
        auto_approval_enabled: false,
        enable_expiration: false,
        expiry_setting: None,
        expiry_min_duration: None,
        expiry_max_duration: None,
    }
}

fn environment(uri: &str, account: &str) -> Environment {
    Environment {
        environment_uri: uri.into(),
        label: uri.into(),
        aws_account_id: account.into(),
        region: REGION.into(),
        resource_prefix: "shareflow".into(),
    }
}

fn env_group(group: &str, env: &str, account: &str, role: &str) -> EnvironmentGroup {
    EnvironmentGroup {
        group_uri: group.into(),
        environment_uri: env.into(),
        iam_role_name: role.into(),
        iam_role_arn: format!("arn:aws:iam::{account}:role/{role}"),
    }
}

fn warehouse(uri: &str, env: &str, namespace: &str, database: &str) -> RedshiftConnection {
    RedshiftConnection {
        connection_uri: uri.into(),
        name: uri.replace('-', "_"),
        environment_uri: env.into(),
        namespace_id: namespace.into(),
        database: database.into(),
        workgroup: Some("default".into()),
        cluster_id: None,
        secret_arn: None,
        redshift_user: None,
    }
}

fn table(uri: &str, name: &str) -> SharedResource {
    SharedResource::Table(DatasetTable {
        table_uri: uri.into(),
        dataset_uri: DATASET.into(),
        name: name.into(),
        glue_database_name: GLUE_DB.into(),
        glue_table_name: name.into(),
    })
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        lock_max_retries: 2,
        lock_retry_interval_secs: 0,
        lock_lease_secs: 600,
        invitation_acceptance_retries: 2,
        invitation_retry_wait_millis: 0,
        access_point_creation_retries: 4,
        access_point_poll_interval_secs: 0,
        ..EngineConfig::default()
    }
}

pub fn owners() -> RequestContext {
    RequestContext::new("olivia", [OWNERS])
}

pub fn stewards() -> RequestContext {
    RequestContext::new("sam", [STEWARDS])
}

pub fn consumers() -> RequestContext {
    RequestContext::new("carla", [CONSUMERS])
}

pub fn outsider() -> RequestContext {
    RequestContext::new("mallory", ["team-other"])
}

pub fn group_principal() -> SharePrincipal {
    SharePrincipal {
        principal_id: CONSUMERS.into(),
        principal_type: PrincipalType::Group,
        principal_role_name: Some(CONSUMERS_ROLE.into()),
    }
}

pub fn consumption_principal() -> SharePrincipal {
    SharePrincipal {
        principal_id: CONSUMPTION_ROLE.into(),
        principal_type: PrincipalType::ConsumptionRole,
        principal_role_name: Some(CONSUMPTION_ROLE_NAME.into()),
    }
}

pub fn warehouse_principal() -> SharePrincipal {
    SharePrincipal {
        principal_id: CONSUMER_CONN.into(),
        principal_type: PrincipalType::RedshiftRole,
        principal_role_name: Some(WAREHOUSE_ROLE.into()),
    }
}

pub struct Fixture {
    pub cloud: Arc<MemoryCloud>,
    pub catalog: Arc<MemoryCatalog>,
    pub store: ShareStore,
    pub notifier: Arc<MemoryNotifier>,
    pub queue: Arc<MemoryTaskQueue>,
    pub config: EngineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let catalog = MemoryCatalog::new();
        catalog.add_dataset(dataset());
        catalog.add_environment(environment(SOURCE_ENV, SOURCE));
        catalog.add_environment(environment(TARGET_ENV, TARGET));
        catalog.add_environment_group(env_group(OWNERS, SOURCE_ENV, SOURCE, "owners-role"));
        catalog.add_environment_group(env_group(CONSUMERS, TARGET_ENV, TARGET, CONSUMERS_ROLE));
        catalog.add_consumption_role(ConsumptionRole {
            consumption_role_uri: CONSUMPTION_ROLE.into(),
            consumption_role_name: "analytics".into(),
            environment_uri: TARGET_ENV.into(),
            group_uri: CONSUMERS.into(),
            iam_role_name: CONSUMPTION_ROLE_NAME.into(),
            iam_role_arn: format!("arn:aws:iam::{TARGET}:role/{CONSUMPTION_ROLE_NAME}"),
        });
        catalog.add_redshift_connection(warehouse(PRODUCER_CONN, SOURCE_ENV, "ns-producer", "dev"));
        catalog.add_redshift_connection(warehouse(CONSUMER_CONN, TARGET_ENV, "ns-consumer", "analytics"));
        catalog.add_resource(table(ORDERS, "orders"));
        catalog.add_resource(table(CUSTOMERS, "customers"));
        catalog.add_resource(SharedResource::StorageLocation(DatasetStorageLocation {
            location_uri: RAW_LOCATION.into(),
            dataset_uri: DATASET.into(),
            name: "raw".into(),
            s3_prefix: "raw/".into(),
        }));
        catalog.add_resource(SharedResource::S3Bucket(DatasetBucket {
            bucket_uri: SALES_BUCKET.into(),
            dataset_uri: DATASET.into(),
            bucket_name: BUCKET.into(),
            kms_alias: None,
        }));
        catalog.add_resource(SharedResource::RedshiftTable(RedshiftTable {
            rs_table_uri: RS_ORDERS.into(),
            dataset_uri: DATASET.into(),
            name: "orders".into(),
        }));

        let cloud = MemoryCloud::new();
        cloud.add_role(TARGET, CONSUMERS_ROLE);
        cloud.add_role(TARGET, CONSUMPTION_ROLE_NAME);
        cloud.add_table(SOURCE, GLUE_DB, "orders");
        cloud.add_table(SOURCE, GLUE_DB, "customers");

        Self {
            cloud: Arc::new(cloud),
            catalog: Arc::new(catalog),
            store: ShareStore::open_in_memory().unwrap(),
            notifier: Arc::new(MemoryNotifier::new()),
            queue: Arc::new(MemoryTaskQueue::new()),
            config: test_config(),
        }
    }

    pub fn update_dataset(&self, change: impl FnOnce(&mut Dataset)) {
        let mut ds = dataset();
        change(&mut ds);
        self.catalog.add_dataset(ds);
    }

    pub fn clients(&self) -> CloudClients {
        CloudClients::in_memory(self.cloud.clone())
    }

    pub fn sharing_service(&self) -> SharingService {
        SharingService::from_config(
            self.store.clone(),
            self.catalog.clone(),
            self.clients(),
            self.notifier.clone(),
            self.config.clone(),
        )
    }

    pub fn share_object_service(&self) -> ShareObjectService {
        ShareObjectService::new(
            self.store.clone(),
            self.catalog.clone(),
            Arc::new(IamPrincipalResolver::new(self.cloud.clone())),
            self.notifier.clone(),
            self.queue.clone(),
        )
    }

    /// A share in `status` for `principal`, inserted without any checks.
    pub fn seed_share(&self, principal: SharePrincipal, status: ShareObjectStatus) -> ShareObject {
        let mut share = ShareObject::draft(DATASET, TARGET_ENV, CONSUMERS, principal, "carla");
        share.status = status;
        self.store.insert_share(&share).unwrap();
        if status != ShareObjectStatus::Draft {
            self.store.update_share_status(&share.share_uri, status).unwrap();
        }
        share
    }

    pub fn seed_item(
        &self,
        share: &ShareObject,
        item_type: ShareableType,
        item_uri: &str,
        status: ShareItemStatus,
    ) -> ShareObjectItem {
        let mut item = ShareObjectItem::pending(&share.share_uri, item_type, item_uri, item_uri, "carla");
        self.store.insert_item(&item).unwrap();
        if status != ShareItemStatus::PendingApproval {
            self.store.update_item_status(&item.share_item_uri, status).unwrap();
            item.status = status;
        }
        item
    }

    /// An Approved share whose items await the approve run.
    pub fn approved_share(&self, principal: SharePrincipal, items: &[(ShareableType, &str)]) -> ShareObject {
        let share = self.seed_share(principal, ShareObjectStatus::Approved);
        for (item_type, uri) in items {
            self.seed_item(&share, *item_type, uri, ShareItemStatus::ShareApproved);
        }
        share
    }

    pub fn share(&self, share_uri: &str) -> ShareObject {
        self.store.require_share(share_uri).unwrap()
    }

    pub fn item(&self, share: &ShareObject, item_uri: &str) -> ShareObjectItem {
        self.store.find_item(&share.share_uri, item_uri).unwrap().unwrap()
    }

    pub fn item_uris(&self, share: &ShareObject) -> Vec<String> {
        self.store
            .list_items(&share.share_uri, &shareflow_storage::ItemFilter::any())
            .unwrap()
            .into_iter()
            .map(|i| i.share_item_uri)
            .collect()
    }
}
