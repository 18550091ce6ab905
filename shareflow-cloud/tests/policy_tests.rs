//! Tests for policy documents: parsing IAM shapes and Sid-addressed edits.

use pretty_assertions::assert_eq;
use shareflow_cloud::{Effect, PolicyDocument, PolicyStatement, Principal};

const ROLE_A: &str = "arn:aws:iam::222222222222:role/team-a";
const ROLE_B: &str = "arn:aws:iam::333333333333:role/team-b";

fn delegation_doc() -> PolicyDocument {
    let mut doc = PolicyDocument::new();
    doc.upsert_statement(
        PolicyStatement::allow("DelegateToAccessPoints", ["s3:*"], ["arn:aws:s3:::bucket", "arn:aws:s3:::bucket/*"])
            .with_principals([ROLE_A]),
    );
    doc
}

// ── Parsing ─────────────────────────────────────────────────────

#[test]
fn parses_scalar_and_array_fields() {
    let json = r#"{
        "Version": "2012-10-17",
        "Statement": {
            "Sid": "Read",
            "Effect": "Allow",
            "Principal": {"AWS": "arn:aws:iam::222222222222:role/team-a"},
            "Action": "s3:GetObject",
            "Resource": ["arn:aws:s3:::bucket/*"]
        }
    }"#;
    let doc = PolicyDocument::from_json_str(json).unwrap();
    assert_eq!(doc.statement.len(), 1);
    let statement = doc.statement("Read").unwrap();
    assert_eq!(statement.effect, Effect::Allow);
    assert_eq!(statement.principals(), &[ROLE_A.to_string()]);
    assert_eq!(statement.action, vec!["s3:GetObject".to_string()]);
}

#[test]
fn parses_wildcard_principal() {
    let json = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Deny","Principal":"*","Action":["s3:*"],"Resource":"*","Condition":{"Bool":{"aws:SecureTransport":"false"}}}]}"#;
    let doc = PolicyDocument::from_json_str(json).unwrap();
    let statement = &doc.statement[0];
    assert_eq!(statement.principal, Some(Principal::Wildcard("*".into())));
    assert!(statement.principals().is_empty());
    assert!(statement.condition.is_some());
}

#[test]
fn invalid_json_is_invalid_policy() {
    let err = PolicyDocument::from_json_str("{\"Version\": 3}").unwrap_err();
    assert!(err.to_string().starts_with("invalid policy document"));
}

#[test]
fn single_values_serialize_as_scalars() {
    let mut doc = PolicyDocument::new();
    doc.upsert_statement(PolicyStatement::allow("One", ["kms:Decrypt"], ["*"]).with_principals([ROLE_A]));
    let json: serde_json::Value = serde_json::from_str(&doc.to_json_string().unwrap()).unwrap();
    assert_eq!(json["Statement"][0]["Action"], "kms:Decrypt");
    assert_eq!(json["Statement"][0]["Principal"]["AWS"], ROLE_A);
}

// ── Editing ─────────────────────────────────────────────────────

#[test]
fn upsert_replaces_same_sid() {
    let mut doc = delegation_doc();
    doc.upsert_statement(PolicyStatement::allow("DelegateToAccessPoints", ["s3:GetObject"], ["*"]));
    assert_eq!(doc.statement.len(), 1);
    assert_eq!(doc.statement("DelegateToAccessPoints").unwrap().action, vec!["s3:GetObject".to_string()]);
}

#[test]
fn add_principal_is_idempotent() {
    let mut doc = delegation_doc();
    assert!(!doc.add_principal("DelegateToAccessPoints", ROLE_A));
    assert!(doc.add_principal("DelegateToAccessPoints", ROLE_B));
    assert!(!doc.add_principal("DelegateToAccessPoints", ROLE_B));
    assert_eq!(doc.statement_principals("DelegateToAccessPoints"), vec![ROLE_A.to_string(), ROLE_B.to_string()]);
}

#[test]
fn add_principal_to_missing_statement_is_refused() {
    let mut doc = PolicyDocument::new();
    assert!(!doc.add_principal("Nope", ROLE_A));
    assert!(doc.is_empty());
}

#[test]
fn removing_last_principal_drops_statement() {
    let mut doc = delegation_doc();
    doc.add_principal("DelegateToAccessPoints", ROLE_B);

    assert!(doc.remove_principal("DelegateToAccessPoints", ROLE_A));
    assert!(doc.has_principal("DelegateToAccessPoints", ROLE_B));

    assert!(doc.remove_principal("DelegateToAccessPoints", ROLE_B));
    assert!(doc.statement("DelegateToAccessPoints").is_none());
    assert!(doc.is_empty());
}

#[test]
fn remove_principal_leaves_principal_less_statements() {
    let mut doc = PolicyDocument::new();
    doc.upsert_statement(PolicyStatement::allow("RolePolicy", ["s3:*"], ["arn:aws:s3:::bucket"]));
    assert!(!doc.remove_principal("RolePolicy", ROLE_A));
    assert!(doc.statement("RolePolicy").is_some());
}

#[test]
fn resources_add_and_remove() {
    let mut doc = PolicyDocument::new();
    doc.upsert_statement(PolicyStatement::allow("Share", ["s3:*"], ["arn:a"]));
    assert!(doc.add_resources("Share", &["arn:a".into(), "arn:b".into()]));
    assert!(!doc.add_resources("Share", &["arn:b".into()]));
    assert!(doc.has_resource("Share", "arn:b"));

    assert!(doc.remove_resources("Share", &["arn:a".into()]));
    assert!(doc.statement("Share").is_some());
    assert!(doc.remove_resources("Share", &["arn:b".into()]));
    assert!(doc.statement("Share").is_none());
}

#[test]
fn document_survives_json() {
    let mut doc = delegation_doc();
    doc.add_principal("DelegateToAccessPoints", ROLE_B);
    let parsed = PolicyDocument::from_json_str(&doc.to_json_string().unwrap()).unwrap();
    assert_eq!(parsed, doc);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arn() -> impl Strategy<Value = String> {
        "[0-9]{12}".prop_flat_map(|account| "[a-z]{1,12}".prop_map(move |role| format!("arn:aws:iam::{account}:role/{role}")))
    }

    proptest! {
        #[test]
        fn principal_set_matches_edits(adds in proptest::collection::vec(arn(), 1..8), removes in proptest::collection::vec(any::<prop::sample::Index>(), 0..8)) {
            let mut doc = PolicyDocument::new();
            doc.upsert_statement(PolicyStatement::allow("S", ["s3:GetObject"], ["*"]).with_principals(Vec::<String>::new()));

            let mut expected: Vec<String> = Vec::new();
            for arn in &adds {
                let added = doc.add_principal("S", arn);
                prop_assert_eq!(added, !expected.contains(arn));
                if added {
                    expected.push(arn.clone());
                }
            }
            for index in &removes {
                if expected.is_empty() {
                    break;
                }
                let arn = expected.remove(index.index(expected.len()));
                prop_assert!(doc.remove_principal("S", &arn));
            }

            prop_assert_eq!(doc.statement_principals("S"), expected.clone());
            prop_assert_eq!(doc.statement("S").is_some(), !expected.is_empty());

            let parsed = PolicyDocument::from_json_str(&doc.to_json_string().unwrap()).unwrap();
            prop_assert_eq!(parsed, doc);
        }
    }
}
