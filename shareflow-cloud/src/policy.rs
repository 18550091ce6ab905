//! IAM-style JSON policy documents.
//!
//! Covers the subset used by bucket, access point, key and role policies:
//! statements addressed by `Sid`, with AWS principal lists and resource lists
//! that may be serialized either as a single string or an array.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// The `Principal` element of a statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// `"Principal": "*"`
    Wildcard(String),
    Aws {
        #[serde(rename = "AWS", with = "one_or_many")]
        aws: Vec<String>,
    },
    /// Service or federated principals, kept as-is.
    Other(serde_json::Value),
}

impl Principal {
    pub fn aws(arns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Principal::Aws {
            aws: arns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arns(&self) -> &[String] {
        match self {
            Principal::Aws { aws } => aws,
            Principal::Wildcard(_) | Principal::Other(_) => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(with = "one_or_many")]
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "one_or_many")]
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

impl PolicyStatement {
    pub fn allow(
        sid: impl Into<String>,
        actions: impl IntoIterator<Item = impl Into<String>>,
        resources: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            sid: Some(sid.into()),
            effect: Effect::Allow,
            principal: None,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    pub fn with_principals(mut self, arns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.principal = Some(Principal::aws(arns));
        self
    }

    pub fn with_condition(mut self, condition: serde_json::Value) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn principals(&self) -> &[String] {
        self.principal.as_ref().map(Principal::arns).unwrap_or_default()
    }

    /// AWS principal list, created if absent. Other principal forms are not editable.
    fn aws_principals_mut(&mut self) -> Option<&mut Vec<String>> {
        match self.principal.get_or_insert_with(|| Principal::Aws { aws: Vec::new() }) {
            Principal::Aws { aws } => Some(aws),
            Principal::Wildcard(_) | Principal::Other(_) => None,
        }
    }
}

/// A policy document with `Sid`-addressed editing helpers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    #[serde(default, deserialize_with = "one_or_many::deserialize")]
    pub statement: Vec<PolicyStatement>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: Vec::new(),
        }
    }

    pub fn from_json_str(json: &str) -> CloudResult<Self> {
        serde_json::from_str(json).map_err(|e| CloudError::InvalidPolicy(e.to_string()))
    }

    pub fn to_json_string(&self) -> CloudResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }

    pub fn statement(&self, sid: &str) -> Option<&PolicyStatement> {
        self.statement.iter().find(|s| s.sid.as_deref() == Some(sid))
    }

    pub fn statement_mut(&mut self, sid: &str) -> Option<&mut PolicyStatement> {
        self.statement.iter_mut().find(|s| s.sid.as_deref() == Some(sid))
    }

    /// Replaces the statement with the same `Sid`, or appends it.
    pub fn upsert_statement(&mut self, statement: PolicyStatement) {
        let existing = statement
            .sid
            .as_deref()
            .and_then(|sid| self.statement.iter().position(|s| s.sid.as_deref() == Some(sid)));
        match existing {
            Some(index) => self.statement[index] = statement,
            None => self.statement.push(statement),
        }
    }

    pub fn remove_statement(&mut self, sid: &str) -> bool {
        let before = self.statement.len();
        self.statement.retain(|s| s.sid.as_deref() != Some(sid));
        self.statement.len() != before
    }

    pub fn statement_principals(&self, sid: &str) -> Vec<String> {
        self.statement(sid).map(|s| s.principals().to_vec()).unwrap_or_default()
    }

    pub fn has_principal(&self, sid: &str, arn: &str) -> bool {
        self.statement(sid).is_some_and(|s| s.principals().iter().any(|p| p == arn))
    }

    /// Adds `arn` to the statement's principals. Returns false if the statement
    /// is missing or already lists it.
    pub fn add_principal(&mut self, sid: &str, arn: &str) -> bool {
        let Some(principals) = self.statement_mut(sid).and_then(PolicyStatement::aws_principals_mut) else {
            return false;
        };
        if principals.iter().any(|p| p == arn) {
            return false;
        }
        principals.push(arn.to_string());
        true
    }

    /// Removes `arn` from the statement's principals. A statement left without
    /// principals is removed.
    pub fn remove_principal(&mut self, sid: &str, arn: &str) -> bool {
        let Some(Some(Principal::Aws { aws: principals })) = self.statement_mut(sid).map(|s| s.principal.as_mut()) else {
            return false;
        };
        let before = principals.len();
        principals.retain(|p| p != arn);
        let changed = principals.len() != before;
        if principals.is_empty() {
            self.remove_statement(sid);
        }
        changed
    }

    pub fn has_resource(&self, sid: &str, resource: &str) -> bool {
        self.statement(sid).is_some_and(|s| s.resource.iter().any(|r| r == resource))
    }

    /// Adds missing resources to the statement. Returns true if anything was added.
    pub fn add_resources(&mut self, sid: &str, resources: &[String]) -> bool {
        let Some(statement) = self.statement_mut(sid) else {
            return false;
        };
        let mut changed = false;
        for resource in resources {
            if !statement.resource.contains(resource) {
                statement.resource.push(resource.clone());
                changed = true;
            }
        }
        changed
    }

    /// Removes resources from the statement. A statement left without
    /// resources is removed.
    pub fn remove_resources(&mut self, sid: &str, resources: &[String]) -> bool {
        let Some(statement) = self.statement_mut(sid) else {
            return false;
        };
        let before = statement.resource.len();
        statement.resource.retain(|r| !resources.contains(r));
        let changed = statement.resource.len() != before;
        if statement.resource.is_empty() {
            self.remove_statement(sid);
        }
        changed
    }
}

/// Serde helpers for IAM fields that accept either a scalar or an array.
mod one_or_many {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize<T: Serialize, S: Serializer>(values: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error> {
        match values.as_slice() {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Ok(match OneOrMany::<T>::deserialize(deserializer)? {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        })
    }
}
