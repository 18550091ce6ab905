use shareflow_cloud::{CloudConfig, CloudError};

#[test]
fn default_region() {
    let config = CloudConfig::default();
    assert_eq!(config.region, "us-east-1");
    assert!(config.endpoint_override.is_none());
}

#[test]
fn default_pivot_role_and_session() {
    let config = CloudConfig::default();
    assert_eq!(config.pivot_role_name, "shareflowPivotRole");
    assert_eq!(config.session_name, "shareflow-engine");
    assert_eq!(config.session_duration_secs, 3600);
    assert_eq!(config.credential_refresh_margin_secs, 300);
}

#[test]
fn partial_json_keeps_defaults() {
    let config: CloudConfig =
        serde_json::from_str(r#"{"region":"eu-west-1","endpoint_override":"http://localhost:4566"}"#).unwrap();
    assert_eq!(config.region, "eu-west-1");
    assert_eq!(config.endpoint_override.as_deref(), Some("http://localhost:4566"));
    assert_eq!(config.pivot_role_name, "shareflowPivotRole");
}

#[test]
fn error_messages() {
    assert_eq!(
        CloudError::NotFound("role team-a".into()).to_string(),
        "not found: role team-a"
    );
    assert_eq!(
        CloudError::CredentialExpired.to_string(),
        "STS credentials expired or invalid"
    );
    let err: CloudError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert!(matches!(err, CloudError::Serialization(_)));
}
