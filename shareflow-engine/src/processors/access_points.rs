//! Storage locations shared through per-principal access points.
//!
//! The dataset bucket delegates access control to access points owned by its
//! account. Each shared location gets an access point whose policy grants the
//! principal role the location prefix.

use super::s3_access::{
    self, add_role_resources, bucket_resources, grant_key_decrypt, missing_role_resources, remove_role_resources,
};
use super::{BatchOutcome, ProcessMode, ProcessorContext, ShareProcessor};
use crate::error::{EngineError, EngineResult};
use crate::naming;
use crate::retry::{Attempt, RetryError};
use crate::share_data::ShareData;
use async_trait::async_trait;
use serde_json::json;
use shareflow_cloud::{AccessPoint, AccessPointStatus, CloudError, PolicyDocument, PolicyStatement, Principal};
use shareflow_types::{DatasetStorageLocation, ShareObjectItem, ShareableType, SharedResource};
use tracing::{debug, info, warn};

pub(crate) const DELEGATE_SID: &str = "DelegateAccessToAccessPoint";
const ACCESS_POINT_SID: &str = "ShareflowAccessPointRead";
const ROLE_ACCESS_POINT_SID: &str = "ShareflowAccessPoints";

const READ_ACTIONS: &[&str] = &["s3:GetObject", "s3:ListBucket"];
const ROLE_ACTIONS: &[&str] = &["s3:*"];

#[derive(Clone, Copy, Debug, Default)]
pub struct AccessPointProcessor;

/// Names and ARNs for one location share.
struct LocationTargets {
    location: DatasetStorageLocation,
    access_point: String,
    access_point_arn: String,
}

impl LocationTargets {
    fn role_resources(&self) -> Vec<String> {
        vec![self.access_point_arn.clone(), format!("{}/*", self.access_point_arn)]
    }

    fn policy_resources(&self) -> Vec<String> {
        let prefix = self.location.s3_prefix.trim_matches('/');
        vec![
            self.access_point_arn.clone(),
            format!("{}/object/{prefix}/*", self.access_point_arn),
        ]
    }
}

fn resolve_location(ctx: &ProcessorContext, data: &ShareData, item: &ShareObjectItem) -> EngineResult<LocationTargets> {
    let location = match ctx.resolve(item)? {
        SharedResource::StorageLocation(location) => location,
        other => {
            return Err(EngineError::invalid_input(
                "item_type",
                format!("{} is a {}, not a storage location", item.item_uri, other.item_type()),
            ));
        }
    };
    let access_point = naming::access_point_name(&data.share.principal_id, &location.location_uri);
    let access_point_arn = data.source_scope().access_point_arn(&access_point);
    Ok(LocationTargets {
        location,
        access_point,
        access_point_arn,
    })
}

fn delegate_statement(data: &ShareData) -> PolicyStatement {
    let mut statement = PolicyStatement::allow(DELEGATE_SID, ["s3:*"], bucket_resources(&data.dataset.s3_bucket_name))
        .with_condition(json!({
            "StringEquals": { "s3:DataAccessPointAccount": data.dataset.aws_account_id }
        }));
    statement.principal = Some(Principal::Wildcard("*".to_string()));
    statement
}

impl AccessPointProcessor {
    async fn manage_bucket_policy(&self, ctx: &ProcessorContext, data: &ShareData) -> EngineResult<()> {
        let source = data.source_scope();
        let bucket = &data.dataset.s3_bucket_name;
        let mut policy = ctx
            .cloud
            .buckets
            .get_bucket_policy(&source, bucket)
            .await?
            .unwrap_or_default();
        let wanted = delegate_statement(data);
        if policy.statement(DELEGATE_SID) != Some(&wanted) {
            policy.upsert_statement(wanted);
            ctx.cloud.buckets.put_bucket_policy(&source, bucket, &policy).await?;
            debug!("share {}: bucket {bucket} delegates to access points", data.share_uri());
        }
        Ok(())
    }

    /// Creates the access point if absent and waits until it is ready.
    async fn ensure_access_point(&self, ctx: &ProcessorContext, data: &ShareData, name: &str) -> EngineResult<AccessPoint> {
        let source = data.source_scope();
        let client = ctx.cloud.access_points.clone();
        if client.get_access_point(&source, name).await?.is_none() {
            info!("share {}: creating access point {name}", data.share_uri());
            client
                .create_access_point(&source, &data.dataset.s3_bucket_name, name)
                .await?;
        }
        let polled = ctx
            .config
            .access_point_retry_policy()
            .retry(|_| {
                let client = client.clone();
                let source = source.clone();
                async move {
                    match client.get_access_point(&source, name).await {
                        Ok(Some(point)) if point.status == AccessPointStatus::Ready => Attempt::Done(point),
                        Ok(Some(_)) => Attempt::Retry(format!("access point {name} is still being created")),
                        Ok(None) => Attempt::Fail(CloudError::NotFound(format!("access point {name}"))),
                        Err(e) => Attempt::Fail(e),
                    }
                }
            })
            .await;
        match polled {
            Ok(point) => Ok(point),
            Err(RetryError::Failed(e)) => Err(e.into()),
            Err(RetryError::Exhausted { attempts, .. }) => Err(CloudError::S3(format!(
                "access point {name} not ready after {attempts} polls"
            ))
            .into()),
        }
    }

    async fn grant_access_point_policy(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        targets: &LocationTargets,
    ) -> EngineResult<()> {
        let source = data.source_scope();
        let principal = data.principal_role_arn();
        let client = &ctx.cloud.access_points;
        let mut policy = client
            .get_access_point_policy(&source, &targets.access_point)
            .await?
            .unwrap_or_default();
        let changed = if policy.statement(ACCESS_POINT_SID).is_some() {
            let added_principal = policy.add_principal(ACCESS_POINT_SID, &principal);
            policy.add_resources(ACCESS_POINT_SID, &targets.policy_resources()) || added_principal
        } else {
            policy.upsert_statement(
                PolicyStatement::allow(ACCESS_POINT_SID, READ_ACTIONS.iter().copied(), targets.policy_resources())
                    .with_principals([principal]),
            );
            true
        };
        if changed {
            client
                .put_access_point_policy(&source, &targets.access_point, &policy)
                .await?;
        }
        Ok(())
    }

    async fn share_location(&self, ctx: &ProcessorContext, data: &ShareData, item: &ShareObjectItem) -> EngineResult<()> {
        let targets = resolve_location(ctx, data, item)?;
        self.manage_bucket_policy(ctx, data).await?;
        add_role_resources(ctx, data, ROLE_ACCESS_POINT_SID, ROLE_ACTIONS, targets.role_resources()).await?;
        self.ensure_access_point(ctx, data, &targets.access_point).await?;
        self.grant_access_point_policy(ctx, data, &targets).await?;
        if let Some(alias) = data.dataset.kms_alias.as_deref() {
            grant_key_decrypt(ctx, data, alias).await?;
        }
        debug!("share {}: {} shared through {}", data.share_uri(), targets.location.name, targets.access_point);
        Ok(())
    }

    async fn revoke_location(&self, ctx: &ProcessorContext, data: &ShareData, item: &ShareObjectItem) -> EngineResult<()> {
        let targets = resolve_location(ctx, data, item)?;
        let source = data.source_scope();
        let client = &ctx.cloud.access_points;
        let mut policy = client
            .get_access_point_policy(&source, &targets.access_point)
            .await?
            .unwrap_or_else(PolicyDocument::new);
        policy.remove_principal(ACCESS_POINT_SID, &data.principal_role_arn());

        if policy.is_empty() {
            info!("share {}: deleting access point {}", data.share_uri(), targets.access_point);
            client.delete_access_point(&source, &targets.access_point).await?;
            remove_role_resources(ctx, data, ROLE_ACCESS_POINT_SID, &targets.role_resources()).await?;
        } else {
            client
                .put_access_point_policy(&source, &targets.access_point, &policy)
                .await?;
        }
        Ok(())
    }

    async fn verify_location(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        item: &ShareObjectItem,
    ) -> EngineResult<Vec<String>> {
        let targets = match resolve_location(ctx, data, item) {
            Ok(targets) => targets,
            Err(e) => return Ok(vec![e.to_string()]),
        };
        let source = data.source_scope();
        let mut errors = Vec::new();

        let bucket_policy = ctx
            .cloud
            .buckets
            .get_bucket_policy(&source, &data.dataset.s3_bucket_name)
            .await?
            .unwrap_or_default();
        if bucket_policy.statement(DELEGATE_SID).is_none() {
            errors.push(format!(
                "bucket {} does not delegate access to access points",
                data.dataset.s3_bucket_name
            ));
        }

        let missing = missing_role_resources(ctx, data, ROLE_ACCESS_POINT_SID, &targets.role_resources()).await?;
        if !missing.is_empty() {
            errors.push(format!(
                "role {} policy is missing {}",
                data.principal_role_name(),
                missing.join(", ")
            ));
        }

        match ctx.cloud.access_points.get_access_point(&source, &targets.access_point).await? {
            None => errors.push(format!("access point {} does not exist", targets.access_point)),
            Some(_) => {
                let policy = ctx
                    .cloud
                    .access_points
                    .get_access_point_policy(&source, &targets.access_point)
                    .await?
                    .unwrap_or_default();
                if !policy.has_principal(ACCESS_POINT_SID, &data.principal_role_arn()) {
                    errors.push(format!(
                        "access point {} policy does not grant {}",
                        targets.access_point,
                        data.principal_role_name()
                    ));
                }
            }
        }

        if let Some(alias) = data.dataset.kms_alias.as_deref() {
            errors.extend(s3_access::check_key_decrypt(ctx, data, alias).await?);
        }
        Ok(errors)
    }
}

#[async_trait]
impl ShareProcessor for AccessPointProcessor {
    fn shareable_type(&self) -> ShareableType {
        ShareableType::StorageLocation
    }

    async fn process_approved_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
        mode: ProcessMode,
    ) -> EngineResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if items.is_empty() {
            debug!("share {}: no folders to share", data.share_uri());
        }
        for item in items {
            let mut sm = ctx.start_item(item, mode)?;
            let result = self.share_location(ctx, data, item).await;
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
        if items.is_empty() {
            return Ok(outcome);
        }
        for item in items {
            let mut sm = ctx.start_item(item, ProcessMode::Share)?;
            let result = self.revoke_location(ctx, data, item).await;
            outcome.items.push(ctx.finish_revoke(data, item, &mut sm, result)?);
        }

        if let Some(alias) = data.dataset.kms_alias.as_deref() {
            let cleanup = match s3_access::storage_items_still_shared(ctx, data) {
                Ok(true) => Ok(()),
                Ok(false) => s3_access::revoke_key_decrypt(ctx, data, alias).await,
                Err(e) => Err(e),
            };
            if let Err(e) = cleanup {
                warn!("share {}: failed to clean up key policy: {e}", data.share_uri());
                outcome.cleanup = Err(e.to_string());
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
            let errors = match self.verify_location(ctx, data, item).await {
                Ok(errors) => errors,
                Err(e) => vec![e.to_string()],
            };
            outcome.items.push(ctx.record_health(data, item, errors)?);
        }
        Ok(outcome)
    }
}
