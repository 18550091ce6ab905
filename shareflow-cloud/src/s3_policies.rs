//! Bucket policy client backed by the S3 SDK.

use crate::capabilities::BucketPolicyClient;
use crate::credential_manager::SessionManager;
use crate::error::{CloudError, CloudResult};
use crate::policy::PolicyDocument;
use crate::types::AccountScope;
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use std::sync::Arc;
use tracing::debug;

/// Reads and writes bucket policies through an assumed-role session in the bucket's account.
pub struct AwsBucketPolicyClient {
    sessions: Arc<SessionManager>,
}

impl AwsBucketPolicyClient {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    async fn build_client(&self, scope: &AccountScope) -> CloudResult<S3Client> {
        let creds = self.sessions.credentials(&scope.account_id).await?;
        if creds.is_expired() {
            return Err(CloudError::CredentialExpired);
        }

        let mut config_builder = aws_sdk_s3::Config::builder()
            .region(aws_types::region::Region::new(scope.region.clone()))
            .credentials_provider(creds.to_sdk_credentials())
            .behavior_version_latest();

        if let Some(ref endpoint) = self.sessions.config().endpoint_override {
            config_builder = config_builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(S3Client::from_conf(config_builder.build()))
    }
}

#[async_trait]
impl BucketPolicyClient for AwsBucketPolicyClient {
    async fn get_bucket_policy(&self, scope: &AccountScope, bucket: &str) -> CloudResult<Option<PolicyDocument>> {
        let client = self.build_client(scope).await?;
        match client.get_bucket_policy().bucket(bucket).send().await {
            Ok(out) => out.policy().map(PolicyDocument::from_json_str).transpose(),
            Err(e) if e.code() == Some("NoSuchBucketPolicy") => Ok(None),
            Err(e) => Err(CloudError::S3(format!("get bucket policy failed for {bucket}: {e}"))),
        }
    }

    async fn put_bucket_policy(&self, scope: &AccountScope, bucket: &str, policy: &PolicyDocument) -> CloudResult<()> {
        let client = self.build_client(scope).await?;
        client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy.to_json_string()?)
            .send()
            .await
            .map_err(|e| CloudError::S3(format!("put bucket policy failed for {bucket}: {e}")))?;

        debug!("updated bucket policy of s3://{bucket} ({} statements)", policy.statement.len());
        Ok(())
    }
}
