//! Identity client backed by the IAM SDK.

use crate::capabilities::IdentityClient;
use crate::credential_manager::SessionManager;
use crate::error::{CloudError, CloudResult};
use crate::policy::PolicyDocument;
use crate::types::AccountScope;
use async_trait::async_trait;
use aws_sdk_iam::Client as IamClient;
use std::sync::Arc;
use tracing::debug;

pub struct AwsIdentityClient {
    sessions: Arc<SessionManager>,
}

impl AwsIdentityClient {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    async fn build_client(&self, scope: &AccountScope) -> CloudResult<IamClient> {
        let creds = self.sessions.credentials(&scope.account_id).await?;
        if creds.is_expired() {
            return Err(CloudError::CredentialExpired);
        }

        let mut config_builder = aws_sdk_iam::Config::builder()
            .region(aws_types::region::Region::new(scope.region.clone()))
            .credentials_provider(creds.to_sdk_credentials())
            .behavior_version_latest();

        if let Some(ref endpoint) = self.sessions.config().endpoint_override {
            config_builder = config_builder.endpoint_url(endpoint);
        }

        Ok(IamClient::from_conf(config_builder.build()))
    }
}

#[async_trait]
impl IdentityClient for AwsIdentityClient {
    async fn get_role_arn(&self, scope: &AccountScope, role_name: &str) -> CloudResult<Option<String>> {
        let client = self.build_client(scope).await?;
        match client.get_role().role_name(role_name).send().await {
            Ok(out) => Ok(out.role().map(|r| r.arn().to_string())),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_entity_exception() {
                    Ok(None)
                } else {
                    Err(CloudError::Iam(format!("get role {role_name} failed: {service_err}")))
                }
            }
        }
    }

    async fn get_role_policy(
        &self,
        scope: &AccountScope,
        role_name: &str,
        policy_name: &str,
    ) -> CloudResult<Option<PolicyDocument>> {
        let client = self.build_client(scope).await?;
        match client
            .get_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
        {
            Ok(out) => {
                // IAM returns the document URL-encoded
                let decoded = urlencoding::decode(out.policy_document())
                    .map_err(|e| CloudError::InvalidPolicy(format!("{role_name}/{policy_name}: {e}")))?;
                PolicyDocument::from_json_str(&decoded).map(Some)
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_entity_exception() {
                    Ok(None)
                } else {
                    Err(CloudError::Iam(format!(
                        "get role policy {role_name}/{policy_name} failed: {service_err}"
                    )))
                }
            }
        }
    }

    async fn put_role_policy(
        &self,
        scope: &AccountScope,
        role_name: &str,
        policy_name: &str,
        policy: &PolicyDocument,
    ) -> CloudResult<()> {
        let client = self.build_client(scope).await?;
        client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy.to_json_string()?)
            .send()
            .await
            .map_err(|e| CloudError::Iam(format!("put role policy {role_name}/{policy_name} failed: {e}")))?;

        debug!("attached policy {policy_name} to role {role_name} in {}", scope.account_id);
        Ok(())
    }

    async fn delete_role_policy(&self, scope: &AccountScope, role_name: &str, policy_name: &str) -> CloudResult<()> {
        let client = self.build_client(scope).await?;
        match client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
        {
            Ok(_) => {
                debug!("deleted policy {policy_name} from role {role_name} in {}", scope.account_id);
                Ok(())
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_entity_exception() {
                    Ok(())
                } else {
                    Err(CloudError::Iam(format!(
                        "delete role policy {role_name}/{policy_name} failed: {service_err}"
                    )))
                }
            }
        }
    }
}
