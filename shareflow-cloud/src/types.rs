//! Shared types for cloud capability calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The account and region a remote call runs against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountScope {
    pub account_id: String,
    pub region: String,
}

impl AccountScope {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    pub fn role_arn(&self, role_name: &str) -> String {
        format!("arn:aws:iam::{}:role/{role_name}", self.account_id)
    }

    pub fn key_arn(&self, key_id: &str) -> String {
        format!("arn:aws:kms:{}:{}:key/{key_id}", self.region, self.account_id)
    }

    pub fn access_point_arn(&self, name: &str) -> String {
        format!("arn:aws:s3:{}:{}:accesspoint/{name}", self.region, self.account_id)
    }
}

impl fmt::Display for AccountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.region)
    }
}

/// STS temporary credentials for an assumed role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StsCredentials {
    /// Returns true if credentials will expire within the given seconds.
    pub fn expires_within_secs(&self, secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(secs) >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Converts into a static credentials provider for SDK clients.
    pub fn to_sdk_credentials(&self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            Some(self.session_token.clone()),
            None,
            "shareflow-sts",
        )
    }
}

// ── Data catalog ────────────────────────────────────────────────

/// A table addressed in a specific account's catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub catalog_id: String,
    pub database: String,
    pub table: String,
}

/// A catalog object permissions can be granted on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogResource {
    Database { catalog_id: String, name: String },
    Table(TableRef),
    /// A link in the calling account's catalog pointing at a table elsewhere.
    ResourceLink { database: String, name: String, target: TableRef },
}

impl CatalogResource {
    pub fn database(catalog_id: impl Into<String>, name: impl Into<String>) -> Self {
        CatalogResource::Database {
            catalog_id: catalog_id.into(),
            name: name.into(),
        }
    }

    pub fn table(catalog_id: impl Into<String>, database: impl Into<String>, table: impl Into<String>) -> Self {
        CatalogResource::Table(TableRef {
            catalog_id: catalog_id.into(),
            database: database.into(),
            table: table.into(),
        })
    }
}

impl fmt::Display for CatalogResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogResource::Database { catalog_id, name } => write!(f, "database/{catalog_id}/{name}"),
            CatalogResource::Table(t) => write!(f, "table/{}/{}/{}", t.catalog_id, t.database, t.table),
            CatalogResource::ResourceLink { database, name, .. } => write!(f, "link/{database}/{name}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CatalogPermission {
    Describe,
    Select,
    Insert,
    Delete,
    Alter,
    Drop,
}

/// Permissions held by one principal on one catalog resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogGrant {
    /// Role ARN, or a bare account id for cross-account grants.
    pub principal: String,
    pub resource: CatalogResource,
    pub permissions: BTreeSet<CatalogPermission>,
}

impl CatalogGrant {
    pub fn new(
        principal: impl Into<String>,
        resource: CatalogResource,
        permissions: impl IntoIterator<Item = CatalogPermission>,
    ) -> Self {
        Self {
            principal: principal.into(),
            resource,
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Whether this grant covers every permission in `other` for the same principal and resource.
    pub fn covers(&self, other: &CatalogGrant) -> bool {
        self.principal == other.principal
            && self.resource == other.resource
            && other.permissions.is_subset(&self.permissions)
    }
}

/// Result of accepting pending resource-share invitations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationOutcome {
    pub accepted: usize,
    /// Invitations not yet visible to the target account.
    pub pending: usize,
}

// ── Object storage ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPointStatus {
    Creating,
    Ready,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub name: String,
    pub bucket: String,
    pub arn: String,
    pub status: AccessPointStatus,
}

// ── Warehouse ───────────────────────────────────────────────────

/// Connection details for a warehouse namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseConnection {
    pub scope: AccountScope,
    pub namespace_id: String,
    pub database: String,
    pub workgroup: Option<String>,
    pub cluster_id: Option<String>,
    pub secret_arn: Option<String>,
    pub user: Option<String>,
}

/// Objects created in a warehouse namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarehouseObject {
    Datashare { name: String },
    DatashareSchema { datashare: String, schema: String },
    DatashareTable { datashare: String, schema: String, table: String },
    /// Consumer database created from a producer's datashare.
    DatashareDatabase { database: String, datashare: String, producer_namespace: String },
    /// Local schema exposing a schema of a datashare database.
    ExternalSchema { database: String, schema: String, local_schema: String },
}

impl fmt::Display for WarehouseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseObject::Datashare { name } => write!(f, "datashare/{name}"),
            WarehouseObject::DatashareSchema { datashare, schema } => write!(f, "datashare/{datashare}/{schema}"),
            WarehouseObject::DatashareTable { datashare, schema, table } => {
                write!(f, "datashare/{datashare}/{schema}.{table}")
            }
            WarehouseObject::DatashareDatabase { database, .. } => write!(f, "database/{database}"),
            WarehouseObject::ExternalSchema { local_schema, .. } => write!(f, "schema/{local_schema}"),
        }
    }
}

/// Privileges held in a warehouse namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarehouseGrant {
    DatashareUsage { datashare: String, consumer_namespace: String },
    DatabaseUsage { database: String, role: String },
    SchemaUsage { schema: String, role: String },
    TableSelect { database: String, schema: String, table: String, role: String },
}

impl WarehouseGrant {
    /// The role holding this grant, if it is a role grant.
    pub fn role(&self) -> Option<&str> {
        match self {
            WarehouseGrant::DatashareUsage { .. } => None,
            WarehouseGrant::DatabaseUsage { role, .. }
            | WarehouseGrant::SchemaUsage { role, .. }
            | WarehouseGrant::TableSelect { role, .. } => Some(role),
        }
    }
}

impl fmt::Display for WarehouseGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseGrant::DatashareUsage { datashare, consumer_namespace } => {
                write!(f, "usage on datashare {datashare} to namespace {consumer_namespace}")
            }
            WarehouseGrant::DatabaseUsage { database, role } => write!(f, "usage on database {database} to {role}"),
            WarehouseGrant::SchemaUsage { schema, role } => write!(f, "usage on schema {schema} to {role}"),
            WarehouseGrant::TableSelect { database, schema, table, role } => {
                write!(f, "select on {database}.{schema}.{table} to {role}")
            }
        }
    }
}
