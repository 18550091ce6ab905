//! Whole buckets shared through bucket policy statements.

use super::s3_access::{self, add_role_resources, bucket_resources, missing_role_resources, remove_role_resources};
use super::{BatchOutcome, ProcessMode, ProcessorContext, ShareProcessor};
use crate::error::{EngineError, EngineResult};
use crate::share_data::ShareData;
use async_trait::async_trait;
use shareflow_cloud::{PolicyDocument, PolicyStatement};
use shareflow_types::{DatasetBucket, ShareObjectItem, ShareableType, SharedResource};
use tracing::{debug, info, warn};

const READ_SID: &str = "ShareflowRead";
const WRITE_SID: &str = "ShareflowWrite";
const ROLE_BUCKET_SID: &str = "ShareflowBuckets";

const READ_ACTIONS: &[&str] = &["s3:List*", "s3:GetObject"];
const WRITE_ACTIONS: &[&str] = &["s3:PutObject", "s3:DeleteObject"];
const ROLE_ACTIONS: &[&str] = &["s3:*"];

#[derive(Clone, Copy, Debug, Default)]
pub struct BucketProcessor;

fn resolve_bucket(ctx: &ProcessorContext, item: &ShareObjectItem) -> EngineResult<DatasetBucket> {
    match ctx.resolve(item)? {
        SharedResource::S3Bucket(bucket) => Ok(bucket),
        other => Err(EngineError::invalid_input(
            "item_type",
            format!("{} is a {}, not a bucket", item.item_uri, other.item_type()),
        )),
    }
}

/// Bucket key alias, falling back to the dataset key.
fn key_alias<'a>(data: &'a ShareData, bucket: &'a DatasetBucket) -> Option<&'a str> {
    bucket.kms_alias.as_deref().or(data.dataset.kms_alias.as_deref())
}

/// Statement ids the share's permissions call for, with their actions.
fn statements(data: &ShareData) -> Vec<(&'static str, &'static [&'static str])> {
    let mut wanted = vec![(READ_SID, READ_ACTIONS)];
    if data.share.has_write_access() {
        wanted.push((WRITE_SID, WRITE_ACTIONS));
    }
    wanted
}

/// Adds the principal to a bucket policy statement, creating the statement if needed.
fn grant_statement(
    policy: &mut PolicyDocument,
    sid: &str,
    actions: &[&str],
    bucket: &str,
    principal: &str,
) -> bool {
    if policy.statement(sid).is_some() {
        let added = policy.add_principal(sid, principal);
        policy.add_resources(sid, &bucket_resources(bucket)) || added
    } else {
        policy.upsert_statement(
            PolicyStatement::allow(sid, actions.iter().copied(), bucket_resources(bucket))
                .with_principals([principal.to_string()]),
        );
        true
    }
}

impl BucketProcessor {
    async fn share_bucket(&self, ctx: &ProcessorContext, data: &ShareData, item: &ShareObjectItem) -> EngineResult<()> {
        let bucket = resolve_bucket(ctx, item)?;
        let source = data.source_scope();
        let principal = data.principal_role_arn();

        let mut policy = ctx
            .cloud
            .buckets
            .get_bucket_policy(&source, &bucket.bucket_name)
            .await?
            .unwrap_or_default();
        let mut changed = false;
        for (sid, actions) in statements(data) {
            changed |= grant_statement(&mut policy, sid, actions, &bucket.bucket_name, &principal);
        }
        if changed {
            ctx.cloud
                .buckets
                .put_bucket_policy(&source, &bucket.bucket_name, &policy)
                .await?;
            debug!("share {}: bucket policy of {} updated", data.share_uri(), bucket.bucket_name);
        }

        add_role_resources(ctx, data, ROLE_BUCKET_SID, ROLE_ACTIONS, bucket_resources(&bucket.bucket_name)).await?;
        if let Some(alias) = key_alias(data, &bucket) {
            s3_access::grant_key_decrypt(ctx, data, alias).await?;
        }
        Ok(())
    }

    async fn revoke_bucket(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        item: &ShareObjectItem,
    ) -> EngineResult<DatasetBucket> {
        let bucket = resolve_bucket(ctx, item)?;
        let source = data.source_scope();
        let principal = data.principal_role_arn();

        if let Some(mut policy) = ctx.cloud.buckets.get_bucket_policy(&source, &bucket.bucket_name).await? {
            let removed_read = policy.remove_principal(READ_SID, &principal);
            let removed_write = policy.remove_principal(WRITE_SID, &principal);
            if removed_read || removed_write {
                ctx.cloud
                    .buckets
                    .put_bucket_policy(&source, &bucket.bucket_name, &policy)
                    .await?;
                info!("share {}: {principal} removed from bucket {}", data.share_uri(), bucket.bucket_name);
            }
        }
        remove_role_resources(ctx, data, ROLE_BUCKET_SID, &bucket_resources(&bucket.bucket_name)).await?;
        Ok(bucket)
    }

    async fn verify_bucket(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        item: &ShareObjectItem,
    ) -> EngineResult<Vec<String>> {
        let bucket = match resolve_bucket(ctx, item) {
            Ok(bucket) => bucket,
            Err(e) => return Ok(vec![e.to_string()]),
        };
        let principal = data.principal_role_arn();
        let mut errors = Vec::new();

        let policy = ctx
            .cloud
            .buckets
            .get_bucket_policy(&data.source_scope(), &bucket.bucket_name)
            .await?
            .unwrap_or_default();
        for (sid, _) in statements(data) {
            if !policy.has_principal(sid, &principal) {
                errors.push(format!(
                    "bucket {} policy statement {sid} does not grant {}",
                    bucket.bucket_name,
                    data.principal_role_name()
                ));
            }
        }

        let missing = missing_role_resources(ctx, data, ROLE_BUCKET_SID, &bucket_resources(&bucket.bucket_name)).await?;
        if !missing.is_empty() {
            errors.push(format!(
                "role {} policy is missing {}",
                data.principal_role_name(),
                missing.join(", ")
            ));
        }

        if let Some(alias) = key_alias(data, &bucket) {
            errors.extend(s3_access::check_key_decrypt(ctx, data, alias).await?);
        }
        Ok(errors)
    }
}

#[async_trait]
impl ShareProcessor for BucketProcessor {
    fn shareable_type(&self) -> ShareableType {
        ShareableType::S3Bucket
    }

    async fn process_approved_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
        mode: ProcessMode,
    ) -> EngineResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for item in items {
            let mut sm = ctx.start_item(item, mode)?;
            let result = self.share_bucket(ctx, data, item).await;
            outcome.items.push(ctx.finish_share(data, item, &mut sm, mode, result)?);
        }
        Ok(outcome)
    }

    async fn process_revoked_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
    ) -> EngineResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut aliases: Vec<String> = Vec::new();
        for item in items {
            let mut sm = ctx.start_item(item, ProcessMode::Share)?;
            let result = match self.revoke_bucket(ctx, data, item).await {
                Ok(bucket) => {
                    if let Some(alias) = key_alias(data, &bucket) {
                        if !aliases.iter().any(|a| a == alias) {
                            aliases.push(alias.to_string());
                        }
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            };
            outcome.items.push(ctx.finish_revoke(data, item, &mut sm, result)?);
        }

        if aliases.is_empty() {
            return Ok(outcome);
        }
        let still_shared = match s3_access::storage_items_still_shared(ctx, data) {
            Ok(shared) => shared,
            Err(e) => {
                outcome.cleanup = Err(e.to_string());
                return Ok(outcome);
            }
        };
        if !still_shared {
            for alias in &aliases {
                if let Err(e) = s3_access::revoke_key_decrypt(ctx, data, alias).await {
                    warn!("share {}: failed to clean up key policy of {alias}: {e}", data.share_uri());
                    outcome.cleanup = Err(e.to_string());
                }
            }
        }
        Ok(outcome)
    }

    async fn verify_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
    ) -> EngineResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for item in items {
            let errors = match self.verify_bucket(ctx, data, item).await {
                Ok(errors) => errors,
                Err(e) => vec![e.to_string()],
            };
            outcome.items.push(ctx.record_health(data, item, errors)?);
        }
        Ok(outcome)
    }
}
