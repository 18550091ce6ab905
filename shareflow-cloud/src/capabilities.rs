//! Capability interfaces for remote collaborators.
//!
//! Processors only talk to the cloud through these traits. Implementations
//! decide how a call reaches the target account (assumed-role sessions for
//! the AWS clients, a shared in-memory state for [`crate::MemoryCloud`]).

use crate::error::CloudResult;
use crate::policy::PolicyDocument;
use crate::types::*;
use async_trait::async_trait;

/// IAM roles and their inline policies.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// ARN of the role, or `None` when it does not exist.
    async fn get_role_arn(&self, scope: &AccountScope, role_name: &str) -> CloudResult<Option<String>>;

    async fn get_role_policy(
        &self,
        scope: &AccountScope,
        role_name: &str,
        policy_name: &str,
    ) -> CloudResult<Option<PolicyDocument>>;

    async fn put_role_policy(
        &self,
        scope: &AccountScope,
        role_name: &str,
        policy_name: &str,
        policy: &PolicyDocument,
    ) -> CloudResult<()>;

    /// Deleting an absent policy succeeds.
    async fn delete_role_policy(&self, scope: &AccountScope, role_name: &str, policy_name: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait BucketPolicyClient: Send + Sync {
    async fn get_bucket_policy(&self, scope: &AccountScope, bucket: &str) -> CloudResult<Option<PolicyDocument>>;

    async fn put_bucket_policy(&self, scope: &AccountScope, bucket: &str, policy: &PolicyDocument) -> CloudResult<()>;
}

#[async_trait]
pub trait AccessPointClient: Send + Sync {
    async fn get_access_point(&self, scope: &AccountScope, name: &str) -> CloudResult<Option<AccessPoint>>;

    /// Fails with `AlreadyExists` if the name is taken.
    async fn create_access_point(&self, scope: &AccountScope, bucket: &str, name: &str) -> CloudResult<AccessPoint>;

    async fn delete_access_point(&self, scope: &AccountScope, name: &str) -> CloudResult<()>;

    async fn get_access_point_policy(&self, scope: &AccountScope, name: &str) -> CloudResult<Option<PolicyDocument>>;

    async fn put_access_point_policy(&self, scope: &AccountScope, name: &str, policy: &PolicyDocument) -> CloudResult<()>;
}

#[async_trait]
pub trait KeyPolicyClient: Send + Sync {
    /// Resolves a key alias to its key id.
    async fn get_key_id(&self, scope: &AccountScope, alias: &str) -> CloudResult<Option<String>>;

    async fn get_key_policy(&self, scope: &AccountScope, key_id: &str) -> CloudResult<PolicyDocument>;

    async fn put_key_policy(&self, scope: &AccountScope, key_id: &str, policy: &PolicyDocument) -> CloudResult<()>;
}

/// Data catalog objects and permissions.
#[async_trait]
pub trait DataCatalogClient: Send + Sync {
    async fn resource_exists(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<bool>;

    /// Creates a database or resource link. Fails with `AlreadyExists` if present.
    async fn create_resource(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<()>;

    async fn delete_resource(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<()>;

    /// Adds permissions. A grant to another account's id opens a resource-share invitation.
    async fn grant(&self, scope: &AccountScope, grant: &CatalogGrant) -> CloudResult<()>;

    async fn revoke(&self, scope: &AccountScope, grant: &CatalogGrant) -> CloudResult<()>;

    async fn list_grants(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<Vec<CatalogGrant>>;
}

/// Cross-account resource-share invitations.
#[async_trait]
pub trait ResourceShareClient: Send + Sync {
    /// Accepts invitations sent from `source_account` to the target account.
    async fn accept_invitations(&self, target: &AccountScope, source_account: &str) -> CloudResult<InvitationOutcome>;
}

/// Warehouse datashares, consumer databases and role grants.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn object_exists(&self, conn: &WarehouseConnection, object: &WarehouseObject) -> CloudResult<bool>;

    /// Fails with `AlreadyExists` if present.
    async fn create_object(&self, conn: &WarehouseConnection, object: &WarehouseObject) -> CloudResult<()>;

    async fn drop_object(&self, conn: &WarehouseConnection, object: &WarehouseObject) -> CloudResult<()>;

    async fn grant(&self, conn: &WarehouseConnection, grant: &WarehouseGrant) -> CloudResult<()>;

    async fn revoke(&self, conn: &WarehouseConnection, grant: &WarehouseGrant) -> CloudResult<()>;

    async fn list_grants(&self, conn: &WarehouseConnection) -> CloudResult<Vec<WarehouseGrant>>;
}
