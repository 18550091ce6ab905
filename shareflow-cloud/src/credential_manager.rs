//! Assumed-role session management with auto-refresh.
//!
//! Keeps one set of STS credentials per account, assuming the pivot role
//! in that account and refreshing before expiry.

use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::StsCredentials;
use aws_config::BehaviorVersion;
use aws_types::region::Region;
use chrono::DateTime;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Caches assumed-role credentials per account.
pub struct SessionManager {
    sts: aws_sdk_sts::Client,
    config: CloudConfig,
    sessions: Arc<RwLock<HashMap<String, StsCredentials>>>,
}

impl SessionManager {
    pub fn new(sts: aws_sdk_sts::Client, config: CloudConfig) -> Self {
        Self {
            sts,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Builds the STS client from the default provider chain.
    pub async fn from_env(config: CloudConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint_override {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        Self::new(aws_sdk_sts::Client::new(&shared), config)
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// Gets valid credentials for the account, refreshing if needed.
    pub async fn credentials(&self, account_id: &str) -> CloudResult<StsCredentials> {
        {
            let sessions = self.sessions.read().await;
            if let Some(c) = sessions.get(account_id) {
                if !c.expires_within_secs(self.config.credential_refresh_margin_secs) {
                    return Ok(c.clone());
                }
                debug!(
                    "credentials for {account_id} expiring within {}s, refreshing",
                    self.config.credential_refresh_margin_secs
                );
            }
        }

        self.refresh(account_id).await
    }

    /// Forces a new assume-role call for the account.
    pub async fn refresh(&self, account_id: &str) -> CloudResult<StsCredentials> {
        let role_arn = format!("arn:aws:iam::{account_id}:role/{}", self.config.pivot_role_name);
        let resp = self
            .sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(&self.config.session_name)
            .duration_seconds(self.config.session_duration_secs)
            .send()
            .await
            .map_err(|e| {
                warn!("assume role {role_arn} failed: {e}");
                CloudError::AssumeRole(format!("{role_arn}: {e}"))
            })?;

        let creds = resp
            .credentials()
            .ok_or_else(|| CloudError::AssumeRole(format!("{role_arn}: no credentials returned")))?;
        let expires_at = DateTime::from_timestamp(creds.expiration().secs(), 0)
            .ok_or_else(|| CloudError::AssumeRole(format!("{role_arn}: invalid expiration")))?;

        let new_creds = StsCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at,
        };

        debug!("refreshed credentials for account {account_id}, expires at {}", new_creds.expires_at);

        let mut sessions = self.sessions.write().await;
        sessions.insert(account_id.to_string(), new_creds.clone());
        Ok(new_creds)
    }

    /// Drops every cached session.
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    pub async fn has_valid_credentials(&self, account_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(account_id)
            .is_some_and(|c| !c.expires_within_secs(self.config.credential_refresh_margin_secs))
    }
}
