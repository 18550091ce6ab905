//! Cloud client configuration.

use serde::{Deserialize, Serialize};

/// Configuration for AWS-backed capability clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Region of the control-plane account (STS calls).
    pub region: String,

    /// Optional endpoint override (for LocalStack in testing).
    pub endpoint_override: Option<String>,

    /// Role assumed in every source and target account.
    pub pivot_role_name: String,

    /// Session name recorded on assumed-role sessions.
    pub session_name: String,

    /// Lifetime requested for assumed-role sessions (seconds).
    pub session_duration_secs: i32,

    /// Credential refresh margin in seconds (refresh before expiry).
    pub credential_refresh_margin_secs: i64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_override: None,
            pivot_role_name: "shareflowPivotRole".to_string(),
            session_name: "shareflow-engine".to_string(),
            session_duration_secs: 3600,
            credential_refresh_margin_secs: 300, // 5 minutes before expiry
        }
    }
}
