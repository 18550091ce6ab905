//! Principal role resolution.

use crate::error::EngineResult;
use async_trait::async_trait;
use shareflow_cloud::{AccountScope, IdentityClient};
use shareflow_types::{Environment, PrincipalType, ShareObject};
use std::sync::Arc;
use tracing::{debug, warn};

/// Confirms that a share's execution role still exists in its target account.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn verify_principal_role(&self, share: &ShareObject, target: &Environment) -> EngineResult<bool>;
}

/// Resolves IAM roles through the identity capability.
pub struct IamPrincipalResolver {
    identity: Arc<dyn IdentityClient>,
}

impl IamPrincipalResolver {
    pub fn new(identity: Arc<dyn IdentityClient>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl PrincipalResolver for IamPrincipalResolver {
    async fn verify_principal_role(&self, share: &ShareObject, target: &Environment) -> EngineResult<bool> {
        // Warehouse roles live in the namespace, not in IAM.
        if share.principal_type == PrincipalType::RedshiftRole {
            return Ok(true);
        }
        let Some(role_name) = share.principal_role_name.as_deref() else {
            warn!("share {} has no principal role name", share.share_uri);
            return Ok(false);
        };
        let scope = AccountScope::new(&target.aws_account_id, &target.region);
        let arn = self.identity.get_role_arn(&scope, role_name).await?;
        debug!("share {}: principal role {role_name} resolved to {arn:?}", share.share_uri);
        Ok(arn.is_some())
    }
}
