//! Cloud capability layer for shareflow.
//!
//! Provides the remote collaborators used by share processors:
//! - Capability traits (identity, bucket policy, access point, key policy,
//!   data catalog permissions, resource-share invitations, warehouse datashares)
//! - IAM-style JSON policy documents with principal/resource editing
//! - STS assume-role sessions with auto-refresh
//! - AWS SDK backed identity and bucket policy clients
//! - An in-memory cloud for tests and local runs

pub mod capabilities;
pub mod clients;
pub mod config;
pub mod credential_manager;
pub mod error;
pub mod iam;
pub mod memory;
pub mod policy;
pub mod s3_policies;
pub mod types;

pub use capabilities::*;
pub use clients::CloudClients;
pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use memory::MemoryCloud;
pub use policy::{Effect, PolicyDocument, PolicyStatement, Principal};
pub use types::*;
