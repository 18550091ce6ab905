//! Bundle of capability clients handed to processors.

use crate::capabilities::*;
use crate::credential_manager::SessionManager;
use crate::error::{CloudError, CloudResult};
use crate::iam::AwsIdentityClient;
use crate::memory::MemoryCloud;
use crate::policy::PolicyDocument;
use crate::s3_policies::AwsBucketPolicyClient;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct CloudClients {
    pub identity: Arc<dyn IdentityClient>,
    pub buckets: Arc<dyn BucketPolicyClient>,
    pub access_points: Arc<dyn AccessPointClient>,
    pub keys: Arc<dyn KeyPolicyClient>,
    pub catalog: Arc<dyn DataCatalogClient>,
    pub resource_shares: Arc<dyn ResourceShareClient>,
    pub warehouse: Arc<dyn WarehouseClient>,
}

impl CloudClients {
    /// Every capability served by one in-memory cloud.
    pub fn in_memory(cloud: Arc<MemoryCloud>) -> Self {
        Self {
            identity: cloud.clone(),
            buckets: cloud.clone(),
            access_points: cloud.clone(),
            keys: cloud.clone(),
            catalog: cloud.clone(),
            resource_shares: cloud.clone(),
            warehouse: cloud,
        }
    }

    /// Every capability fails with [`CloudError::Unsupported`].
    pub fn unconfigured() -> Self {
        let missing = Arc::new(Unconfigured);
        Self {
            identity: missing.clone(),
            buckets: missing.clone(),
            access_points: missing.clone(),
            keys: missing.clone(),
            catalog: missing.clone(),
            resource_shares: missing.clone(),
            warehouse: missing,
        }
    }

    /// SDK-backed identity and bucket policy clients.
    ///
    /// Access point, key, catalog, resource share and warehouse calls fail with
    /// [`CloudError::Unsupported`] until a client is plugged in with the `with_*` setters.
    pub fn aws(sessions: Arc<SessionManager>) -> Self {
        Self::unconfigured()
            .with_identity(Arc::new(AwsIdentityClient::new(sessions.clone())))
            .with_buckets(Arc::new(AwsBucketPolicyClient::new(sessions)))
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityClient>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_buckets(mut self, buckets: Arc<dyn BucketPolicyClient>) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_access_points(mut self, access_points: Arc<dyn AccessPointClient>) -> Self {
        self.access_points = access_points;
        self
    }

    pub fn with_keys(mut self, keys: Arc<dyn KeyPolicyClient>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn DataCatalogClient>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_resource_shares(mut self, resource_shares: Arc<dyn ResourceShareClient>) -> Self {
        self.resource_shares = resource_shares;
        self
    }

    pub fn with_warehouse(mut self, warehouse: Arc<dyn WarehouseClient>) -> Self {
        self.warehouse = warehouse;
        self
    }
}

/// Placeholder for a capability with no client.
struct Unconfigured;

fn unsupported<T>(op: &str) -> CloudResult<T> {
    Err(CloudError::Unsupported(op.to_string()))
}

#[async_trait]
impl IdentityClient for Unconfigured {
    async fn get_role_arn(&self, _: &AccountScope, _: &str) -> CloudResult<Option<String>> {
        unsupported("iam.get_role")
    }

    async fn get_role_policy(&self, _: &AccountScope, _: &str, _: &str) -> CloudResult<Option<PolicyDocument>> {
        unsupported("iam.get_role_policy")
    }

    async fn put_role_policy(&self, _: &AccountScope, _: &str, _: &str, _: &PolicyDocument) -> CloudResult<()> {
        unsupported("iam.put_role_policy")
    }

    async fn delete_role_policy(&self, _: &AccountScope, _: &str, _: &str) -> CloudResult<()> {
        unsupported("iam.delete_role_policy")
    }
}

#[async_trait]
impl BucketPolicyClient for Unconfigured {
    async fn get_bucket_policy(&self, _: &AccountScope, _: &str) -> CloudResult<Option<PolicyDocument>> {
        unsupported("s3.get_bucket_policy")
    }

    async fn put_bucket_policy(&self, _: &AccountScope, _: &str, _: &PolicyDocument) -> CloudResult<()> {
        unsupported("s3.put_bucket_policy")
    }
}

#[async_trait]
impl AccessPointClient for Unconfigured {
    async fn get_access_point(&self, _: &AccountScope, _: &str) -> CloudResult<Option<AccessPoint>> {
        unsupported("s3control.get_access_point")
    }

    async fn create_access_point(&self, _: &AccountScope, _: &str, _: &str) -> CloudResult<AccessPoint> {
        unsupported("s3control.create_access_point")
    }

    async fn delete_access_point(&self, _: &AccountScope, _: &str) -> CloudResult<()> {
        unsupported("s3control.delete_access_point")
    }

    async fn get_access_point_policy(&self, _: &AccountScope, _: &str) -> CloudResult<Option<PolicyDocument>> {
        unsupported("s3control.get_access_point_policy")
    }

    async fn put_access_point_policy(&self, _: &AccountScope, _: &str, _: &PolicyDocument) -> CloudResult<()> {
        unsupported("s3control.put_access_point_policy")
    }
}

#[async_trait]
impl KeyPolicyClient for Unconfigured {
    async fn get_key_id(&self, _: &AccountScope, _: &str) -> CloudResult<Option<String>> {
        unsupported("kms.get_key_id")
    }

    async fn get_key_policy(&self, _: &AccountScope, _: &str) -> CloudResult<PolicyDocument> {
        unsupported("kms.get_key_policy")
    }

    async fn put_key_policy(&self, _: &AccountScope, _: &str, _: &PolicyDocument) -> CloudResult<()> {
        unsupported("kms.put_key_policy")
    }
}

#[async_trait]
impl DataCatalogClient for Unconfigured {
    async fn resource_exists(&self, _: &AccountScope, _: &CatalogResource) -> CloudResult<bool> {
        unsupported("catalog.exists")
    }

    async fn create_resource(&self, _: &AccountScope, _: &CatalogResource) -> CloudResult<()> {
        unsupported("catalog.create")
    }

    async fn delete_resource(&self, _: &AccountScope, _: &CatalogResource) -> CloudResult<()> {
        unsupported("catalog.delete")
    }

    async fn grant(&self, _: &AccountScope, _: &CatalogGrant) -> CloudResult<()> {
        unsupported("catalog.grant")
    }

    async fn revoke(&self, _: &AccountScope, _: &CatalogGrant) -> CloudResult<()> {
        unsupported("catalog.revoke")
    }

    async fn list_grants(&self, _: &AccountScope, _: &CatalogResource) -> CloudResult<Vec<CatalogGrant>> {
        unsupported("catalog.list_grants")
    }
}

#[async_trait]
impl ResourceShareClient for Unconfigured {
    async fn accept_invitations(&self, _: &AccountScope, _: &str) -> CloudResult<InvitationOutcome> {
        unsupported("ram.accept")
    }
}

#[async_trait]
impl WarehouseClient for Unconfigured {
    async fn object_exists(&self, _: &WarehouseConnection, _: &WarehouseObject) -> CloudResult<bool> {
        unsupported("warehouse.exists")
    }

    async fn create_object(&self, _: &WarehouseConnection, _: &WarehouseObject) -> CloudResult<()> {
        unsupported("warehouse.create")
    }

    async fn drop_object(&self, _: &WarehouseConnection, _: &WarehouseObject) -> CloudResult<()> {
        unsupported("warehouse.drop")
    }

    async fn grant(&self, _: &WarehouseConnection, _: &WarehouseGrant) -> CloudResult<()> {
        unsupported("warehouse.grant")
    }

    async fn revoke(&self, _: &WarehouseConnection, _: &WarehouseGrant) -> CloudResult<()> {
        unsupported("warehouse.revoke")
    }

    async fn list_grants(&self, _: &WarehouseConnection) -> CloudResult<Vec<WarehouseGrant>> {
        unsupported("warehouse.list_grants")
    }
}
