//! Policy edits shared by the object storage processors.
//!
//! The principal role carries one inline share policy listing every bucket and
//! access point it was granted. Dataset keys list share principals in one
//! key policy statement.

use super::ProcessorContext;
use crate::error::{EngineError, EngineResult};
use crate::naming;
use crate::share_data::ShareData;
use shareflow_cloud::{PolicyDocument, PolicyStatement};
use shareflow_storage::ItemFilter;
use shareflow_types::{ShareItemStatus, ShareableType};
use tracing::{debug, info};

pub(crate) const KEY_DECRYPT_SID: &str = "ShareflowKmsDecrypt";
pub(crate) const ROLE_KMS_SID: &str = "ShareflowKms";

const KEY_ACTIONS: &[&str] = &["kms:Decrypt", "kms:DescribeKey"];

pub(crate) fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

/// Bucket ARN and the ARN of every object in it.
pub(crate) fn bucket_resources(bucket: &str) -> Vec<String> {
    let arn = bucket_arn(bucket);
    vec![arn.clone(), format!("{arn}/*")]
}

fn policy_name(ctx: &ProcessorContext, data: &ShareData) -> String {
    naming::share_policy_name(&ctx.config.resource_prefix, &data.share.environment_uri)
}

/// Adds resources to a statement of the role share policy, creating it if needed.
pub(crate) async fn add_role_resources(
    ctx: &ProcessorContext,
    data: &ShareData,
    sid: &str,
    actions: &[&str],
    resources: Vec<String>,
) -> EngineResult<()> {
    let scope = data.target_scope();
    let role = data.principal_role_name();
    let name = policy_name(ctx, data);
    let mut policy = ctx
        .cloud
        .identity
        .get_role_policy(&scope, role, &name)
        .await?
        .unwrap_or_default();
    let changed = if policy.statement(sid).is_some() {
        policy.add_resources(sid, &resources)
    } else {
        policy.upsert_statement(PolicyStatement::allow(sid, actions.iter().copied(), resources));
        true
    };
    if changed {
        ctx.cloud.identity.put_role_policy(&scope, role, &name, &policy).await?;
        debug!("share {}: updated {name} on role {role}", data.share_uri());
    }
    Ok(())
}

/// Removes resources from the role share policy, deleting the policy once empty.
pub(crate) async fn remove_role_resources(
    ctx: &ProcessorContext,
    data: &ShareData,
    sid: &str,
    resources: &[String],
) -> EngineResult<()> {
    let scope = data.target_scope();
    let role = data.principal_role_name();
    let name = policy_name(ctx, data);
    let Some(mut policy) = ctx.cloud.identity.get_role_policy(&scope, role, &name).await? else {
        return Ok(());
    };
    if !policy.remove_resources(sid, resources) {
        return Ok(());
    }
    if policy_without(&policy, ROLE_KMS_SID).is_empty() {
        ctx.cloud.identity.delete_role_policy(&scope, role, &name).await?;
        info!("share {}: deleted {name} from role {role}", data.share_uri());
    } else {
        ctx.cloud.identity.put_role_policy(&scope, role, &name, &policy).await?;
    }
    Ok(())
}

/// Resources of the role share policy statement that are missing.
pub(crate) async fn missing_role_resources(
    ctx: &ProcessorContext,
    data: &ShareData,
    sid: &str,
    resources: &[String],
) -> EngineResult<Vec<String>> {
    let name = policy_name(ctx, data);
    let policy = ctx
        .cloud
        .identity
        .get_role_policy(&data.target_scope(), data.principal_role_name(), &name)
        .await?
        .unwrap_or_default();
    Ok(resources
        .iter()
        .filter(|r| !policy.has_resource(sid, r))
        .cloned()
        .collect())
}

/// A key statement alone does not keep a share policy alive.
fn policy_without(policy: &PolicyDocument, sid: &str) -> PolicyDocument {
    let mut rest = policy.clone();
    rest.remove_statement(sid);
    rest
}

async fn key_id(ctx: &ProcessorContext, data: &ShareData, alias: &str) -> EngineResult<String> {
    ctx.cloud
        .keys
        .get_key_id(&data.source_scope(), alias)
        .await?
        .ok_or_else(|| EngineError::AwsResourceNotFound {
            action: "update key policy".to_string(),
            message: format!("KMS key {alias} does not exist in account {}", data.dataset.aws_account_id),
        })
}

/// Lets the principal decrypt with the key behind `alias`, in the key policy and its role policy.
pub(crate) async fn grant_key_decrypt(ctx: &ProcessorContext, data: &ShareData, alias: &str) -> EngineResult<()> {
    let source = data.source_scope();
    let key_id = key_id(ctx, data, alias).await?;
    let principal = data.principal_role_arn();
    let mut policy = ctx.cloud.keys.get_key_policy(&source, &key_id).await?;
    let changed = if policy.statement(KEY_DECRYPT_SID).is_some() {
        policy.add_principal(KEY_DECRYPT_SID, &principal)
    } else {
        policy.upsert_statement(
            PolicyStatement::allow(KEY_DECRYPT_SID, ["kms:Decrypt"], ["*"]).with_principals([principal.clone()]),
        );
        true
    };
    if changed {
        ctx.cloud.keys.put_key_policy(&source, &key_id, &policy).await?;
        debug!("share {}: {principal} added to key {key_id}", data.share_uri());
    }
    add_role_resources(ctx, data, ROLE_KMS_SID, KEY_ACTIONS, vec![source.key_arn(&key_id)]).await
}

/// Removes the principal from the key policy and the key from its role policy.
pub(crate) async fn revoke_key_decrypt(ctx: &ProcessorContext, data: &ShareData, alias: &str) -> EngineResult<()> {
    let source = data.source_scope();
    let Some(key_id) = ctx.cloud.keys.get_key_id(&source, alias).await? else {
        return Ok(());
    };
    let principal = data.principal_role_arn();
    let mut policy = ctx.cloud.keys.get_key_policy(&source, &key_id).await?;
    if policy.remove_principal(KEY_DECRYPT_SID, &principal) {
        ctx.cloud.keys.put_key_policy(&source, &key_id, &policy).await?;
        info!("share {}: {principal} removed from key {key_id}", data.share_uri());
    }
    remove_role_resources(ctx, data, ROLE_KMS_SID, &[source.key_arn(&key_id)]).await
}

/// Problems with the principal's access to the key behind `alias`.
pub(crate) async fn check_key_decrypt(ctx: &ProcessorContext, data: &ShareData, alias: &str) -> EngineResult<Vec<String>> {
    let source = data.source_scope();
    let key_id = match key_id(ctx, data, alias).await {
        Ok(id) => id,
        Err(e) => return Ok(vec![e.to_string()]),
    };
    let mut errors = Vec::new();
    let policy = ctx.cloud.keys.get_key_policy(&source, &key_id).await?;
    if !policy.has_principal(KEY_DECRYPT_SID, &data.principal_role_arn()) {
        errors.push(format!("key policy of {alias} does not grant decrypt to {}", data.principal_role_name()));
    }
    if !missing_role_resources(ctx, data, ROLE_KMS_SID, &[source.key_arn(&key_id)]).await?.is_empty() {
        errors.push(format!("role {} has no access to key {alias}", data.principal_role_name()));
    }
    Ok(errors)
}

/// Whether any object storage item of the share still holds a grant.
pub(crate) fn storage_items_still_shared(ctx: &ProcessorContext, data: &ShareData) -> EngineResult<bool> {
    for item_type in [ShareableType::StorageLocation, ShareableType::S3Bucket] {
        let filter = ItemFilter::any().of_type(item_type).with_statuses(ShareItemStatus::SHARED);
        if ctx.store.has_items(data.share_uri(), &filter)? {
            return Ok(true);
        }
    }
    Ok(false)
}
