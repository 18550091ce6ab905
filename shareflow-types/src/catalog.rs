//! Catalog records resolved by URI.

use crate::enums::{ExpirySetting, ShareableType};
use serde::{Deserialize, Serialize};

/// A dataset owned by a team in a source environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_uri: String,
    pub label: String,
    pub environment_uri: String,
    pub owner: String,
    pub admin_group: String,
    pub stewards: Option<String>,
    pub aws_account_id: String,
    pub region: String,
    pub glue_database_name: String,
    pub s3_bucket_name: String,
    pub kms_alias: Option<String>,
    pub redshift_connection_uri: Option<String>,
    pub redshift_schema: Option<String>,
    pub auto_approval_enabled: bool,
    pub enable_expiration: bool,
    pub expiry_setting: Option<ExpirySetting>,
    pub expiry_min_duration: Option<u32>,
    pub expiry_max_duration: Option<u32>,
}

impl Dataset {
    /// Groups allowed to approve shares of this dataset.
    pub fn approver_groups(&self) -> Vec<&str> {
        let mut groups = vec![self.admin_group.as_str()];
        if let Some(stewards) = self.stewards.as_deref() {
            groups.push(stewards);
        }
        groups
    }
}

/// A cloud account + region pair registered in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub environment_uri: String,
    pub label: String,
    pub aws_account_id: String,
    pub region: String,
    pub resource_prefix: String,
}

/// A team's membership in an environment, with its execution role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentGroup {
    pub group_uri: String,
    pub environment_uri: String,
    pub iam_role_name: String,
    pub iam_role_arn: String,
}

/// A service role a team registered in an environment for data consumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionRole {
    pub consumption_role_uri: String,
    pub consumption_role_name: String,
    pub environment_uri: String,
    pub group_uri: String,
    pub iam_role_name: String,
    pub iam_role_arn: String,
}

/// A warehouse namespace connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedshiftConnection {
    pub connection_uri: String,
    pub name: String,
    pub environment_uri: String,
    pub namespace_id: String,
    pub database: String,
    pub workgroup: Option<String>,
    pub cluster_id: Option<String>,
    pub secret_arn: Option<String>,
    pub redshift_user: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetTable {
    pub table_uri: String,
    pub dataset_uri: String,
    pub name: String,
    pub glue_database_name: String,
    pub glue_table_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStorageLocation {
    pub location_uri: String,
    pub dataset_uri: String,
    pub name: String,
    pub s3_prefix: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetBucket {
    pub bucket_uri: String,
    pub dataset_uri: String,
    pub bucket_name: String,
    pub kms_alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedshiftTable {
    pub rs_table_uri: String,
    pub dataset_uri: String,
    pub name: String,
}

/// The catalog resource a share item points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SharedResource {
    Table(DatasetTable),
    StorageLocation(DatasetStorageLocation),
    S3Bucket(DatasetBucket),
    RedshiftTable(RedshiftTable),
}

impl SharedResource {
    pub fn item_type(&self) -> ShareableType {
        match self {
            SharedResource::Table(_) => ShareableType::Table,
            SharedResource::StorageLocation(_) => ShareableType::StorageLocation,
            SharedResource::S3Bucket(_) => ShareableType::S3Bucket,
            SharedResource::RedshiftTable(_) => ShareableType::RedshiftTable,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            SharedResource::Table(t) => &t.table_uri,
            SharedResource::StorageLocation(l) => &l.location_uri,
            SharedResource::S3Bucket(b) => &b.bucket_uri,
            SharedResource::RedshiftTable(t) => &t.rs_table_uri,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SharedResource::Table(t) => &t.name,
            SharedResource::StorageLocation(l) => &l.name,
            SharedResource::S3Bucket(b) => &b.bucket_name,
            SharedResource::RedshiftTable(t) => &t.name,
        }
    }

    pub fn dataset_uri(&self) -> &str {
        match self {
            SharedResource::Table(t) => &t.dataset_uri,
            SharedResource::StorageLocation(l) => &l.dataset_uri,
            SharedResource::S3Bucket(b) => &b.dataset_uri,
            SharedResource::RedshiftTable(t) => &t.dataset_uri,
        }
    }
}
