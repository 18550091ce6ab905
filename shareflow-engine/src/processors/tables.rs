//! Catalog tables shared through resource links.
//!
//! The target account gets a database named after the source database with
//! a `_shared` suffix. Each shared table becomes a resource link in it. Cross
//! account shares first grant the target account on the source table and
//! accept the resulting resource-share invitation.

use super::{BatchOutcome, ProcessMode, ProcessorContext, ShareProcessor};
use crate::error::{EngineError, EngineResult};
use crate::naming;
use crate::retry::{Attempt, RetryError};
use crate::share_data::ShareData;
use async_trait::async_trait;
use shareflow_cloud::{CatalogGrant, CatalogPermission, CatalogResource, CloudError, TableRef};
use shareflow_storage::ItemFilter;
use shareflow_types::{DatasetTable, ShareItemStatus, ShareObjectItem, ShareableType, SharedResource};
use tracing::{debug, info, warn};

use CatalogPermission::{Describe, Select};

#[derive(Clone, Copy, Debug, Default)]
pub struct TableProcessor;

/// Catalog resources one table share touches.
struct TableTargets {
    source_table: CatalogResource,
    link: CatalogResource,
}

fn shared_database(data: &ShareData) -> CatalogResource {
    CatalogResource::database(
        &data.target_environment.aws_account_id,
        naming::shared_database_name(&data.dataset.glue_database_name),
    )
}

fn targets(data: &ShareData, table: &DatasetTable) -> TableTargets {
    let source = TableRef {
        catalog_id: data.dataset.aws_account_id.clone(),
        database: table.glue_database_name.clone(),
        table: table.glue_table_name.clone(),
    };
    TableTargets {
        source_table: CatalogResource::Table(source.clone()),
        link: CatalogResource::ResourceLink {
            database: naming::shared_database_name(&data.dataset.glue_database_name),
            name: table.glue_table_name.clone(),
            target: source,
        },
    }
}

fn resolve_table(ctx: &ProcessorContext, item: &ShareObjectItem) -> EngineResult<DatasetTable> {
    match ctx.resolve(item)? {
        SharedResource::Table(table) => Ok(table),
        other => Err(EngineError::invalid_input(
            "item_type",
            format!("{} is a {}, not a table", item.item_uri, other.item_type()),
        )),
    }
}

impl TableProcessor {
    async fn ensure_shared_database(&self, ctx: &ProcessorContext, data: &ShareData) -> EngineResult<()> {
        let target = data.target_scope();
        let database = shared_database(data);
        if !ctx.cloud.catalog.resource_exists(&target, &database).await? {
            info!("share {}: creating {database}", data.share_uri());
            ctx.cloud.catalog.create_resource(&target, &database).await?;
        }
        let grant = CatalogGrant::new(data.principal_role_arn(), database, [Describe]);
        ctx.cloud.catalog.grant(&target, &grant).await?;
        Ok(())
    }

    /// Accepts the invitation opened by a cross-account grant, retrying while it is pending.
    async fn accept_invitations(&self, ctx: &ProcessorContext, data: &ShareData) -> EngineResult<()> {
        let target = data.target_scope();
        let source_account = data.dataset.aws_account_id.clone();
        let client = ctx.cloud.resource_shares.clone();
        let accepted = ctx
            .config
            .invitation_retry_policy()
            .retry(|attempt| {
                let client = client.clone();
                let target = target.clone();
                let source_account = source_account.clone();
                async move {
                    match client.accept_invitations(&target, &source_account).await {
                        Ok(outcome) if outcome.pending == 0 => Attempt::Done(outcome),
                        Ok(outcome) => {
                            Attempt::Retry(format!("{} invitations pending (attempt {attempt})", outcome.pending))
                        }
                        Err(e) => Attempt::Fail(e),
                    }
                }
            })
            .await;
        match accepted {
            Ok(outcome) => {
                debug!("share {}: accepted {} invitations", data.share_uri(), outcome.accepted);
                Ok(())
            }
            Err(RetryError::Failed(e)) => Err(e.into()),
            Err(RetryError::Exhausted { attempts, last_reason }) => Err(CloudError::ResourceShare(format!(
                "invitation from {source_account} not accepted after {attempts} attempts: {last_reason}"
            ))
            .into()),
        }
    }

    async fn share_table(&self, ctx: &ProcessorContext, data: &ShareData, item: &ShareObjectItem) -> EngineResult<()> {
        let table = resolve_table(ctx, item)?;
        let TableTargets { source_table, link } = targets(data, &table);
        let source = data.source_scope();
        let target = data.target_scope();
        let catalog = &ctx.cloud.catalog;

        if !catalog.resource_exists(&source, &source_table).await? {
            return Err(EngineError::AwsResourceNotFound {
                action: "share table".to_string(),
                message: format!(
                    "Table {} does not exist in database {}",
                    table.glue_table_name, table.glue_database_name
                ),
            });
        }

        if data.is_cross_account() {
            let account_grant = CatalogGrant::new(&target.account_id, source_table.clone(), [Describe, Select]);
            catalog.grant(&source, &account_grant).await?;
            self.accept_invitations(ctx, data).await?;
        }

        if !catalog.resource_exists(&target, &link).await? {
            catalog.create_resource(&target, &link).await?;
            debug!("share {}: created {link}", data.share_uri());
        }

        let principal = data.principal_role_arn();
        catalog
            .grant(&target, &CatalogGrant::new(&principal, link, [Describe]))
            .await?;
        catalog
            .grant(&target, &CatalogGrant::new(&principal, source_table, [Describe, Select]))
            .await?;
        Ok(())
    }

    async fn revoke_table(&self, ctx: &ProcessorContext, data: &ShareData, item: &ShareObjectItem) -> EngineResult<()> {
        let table = resolve_table(ctx, item)?;
        let TableTargets { source_table, link } = targets(data, &table);
        let source = data.source_scope();
        let target = data.target_scope();
        let catalog = &ctx.cloud.catalog;

        let other_shares = ctx.store.count_item_references_in_environment(
            &data.share.environment_uri,
            &item.item_uri,
            &item.share_item_uri,
            ShareItemStatus::SHARED,
        )?;

        if catalog.resource_exists(&target, &link).await? {
            let principal = data.principal_role_arn();
            catalog
                .revoke(&target, &CatalogGrant::new(&principal, link.clone(), [Describe]))
                .await?;
            catalog
                .revoke(&target, &CatalogGrant::new(&principal, source_table.clone(), [Describe, Select]))
                .await?;
            if other_shares == 0 {
                info!("share {}: deleting {link}", data.share_uri());
                catalog.delete_resource(&target, &link).await?;
            }
        }

        if other_shares == 0 && data.is_cross_account() {
            let account_grant = CatalogGrant::new(&target.account_id, source_table, [Describe, Select]);
            catalog.revoke(&source, &account_grant).await?;
        } else if other_shares > 0 {
            debug!(
                "share {}: {} still shared by {other_shares} items in the environment",
                data.share_uri(),
                table.glue_table_name
            );
        }
        Ok(())
    }

    /// Drops database grants and the shared database once nothing references them.
    async fn cleanup(&self, ctx: &ProcessorContext, data: &ShareData) -> EngineResult<()> {
        let target = data.target_scope();
        let database = shared_database(data);
        let shared_here = ItemFilter::any()
            .of_type(ShareableType::Table)
            .with_statuses(ShareItemStatus::SHARED);
        if !ctx.store.has_items(data.share_uri(), &shared_here)? {
            let grant = CatalogGrant::new(data.principal_role_arn(), database.clone(), [Describe]);
            ctx.cloud.catalog.revoke(&target, &grant).await?;
        }

        let shared_in_environment = ctx.store.count_dataset_items_in_environment(
            &data.dataset.dataset_uri,
            &data.share.environment_uri,
            ShareableType::Table,
            ShareItemStatus::SHARED,
        )?;
        if shared_in_environment == 0 {
            info!("share {}: deleting {database}", data.share_uri());
            ctx.cloud.catalog.delete_resource(&target, &database).await?;
        } else {
            debug!(
                "share {}: {shared_in_environment} tables of the dataset still shared to the environment",
                data.share_uri()
            );
        }
        Ok(())
    }

    async fn verify_table(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        item: &ShareObjectItem,
    ) -> EngineResult<Vec<String>> {
        let table = match resolve_table(ctx, item) {
            Ok(table) => table,
            Err(e) => return Ok(vec![e.to_string()]),
        };
        let TableTargets { source_table, link } = targets(data, &table);
        let source = data.source_scope();
        let target = data.target_scope();
        let catalog = &ctx.cloud.catalog;
        let principal = data.principal_role_arn();
        let mut errors = Vec::new();

        if !catalog.resource_exists(&source, &source_table).await? {
            errors.push(format!("source table {} does not exist", table.glue_table_name));
        }
        if data.is_cross_account() {
            let expected = CatalogGrant::new(&target.account_id, source_table.clone(), [Describe, Select]);
            let granted = catalog.list_grants(&source, &source_table).await?;
            if !granted.iter().any(|g| g.covers(&expected)) {
                errors.push(format!("account {} has no access to {}", target.account_id, table.glue_table_name));
            }
        }
        if !catalog.resource_exists(&target, &link).await? {
            errors.push(format!("resource link {link} does not exist"));
        } else {
            let expected = CatalogGrant::new(&principal, link.clone(), [Describe]);
            if !catalog.list_grants(&target, &link).await?.iter().any(|g| g.covers(&expected)) {
                errors.push(format!("{} cannot describe {link}", data.principal_role_name()));
            }
        }
        let expected = CatalogGrant::new(&principal, source_table.clone(), [Select]);
        if !catalog
            .list_grants(&target, &source_table)
            .await?
            .iter()
            .any(|g| g.covers(&expected))
        {
            errors.push(format!("{} cannot select {}", data.principal_role_name(), table.glue_table_name));
        }
        Ok(errors)
    }
}

#[async_trait]
impl ShareProcessor for TableProcessor {
    fn shareable_type(&self) -> ShareableType {
        ShareableType::Table
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
            debug!("share {}: no tables to share", data.share_uri());
            return Ok(outcome);
        }
        info!("share {}: sharing {} tables", data.share_uri(), items.len());
        self.ensure_shared_database(ctx, data).await?;

        for item in items {
            let mut sm = ctx.start_item(item, mode)?;
            let result = self.share_table(ctx, data, item).await;
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
        info!("share {}: revoking {} tables", data.share_uri(), items.len());
        for item in items {
            let mut sm = ctx.start_item(item, ProcessMode::Share)?;
            let result = self.revoke_table(ctx, data, item).await;
            outcome.items.push(ctx.finish_revoke(data, item, &mut sm, result)?);
        }

        if let Err(e) = self.cleanup(ctx, data).await {
            warn!("share {}: failed to clean up the shared database: {e}", data.share_uri());
            outcome.cleanup = Err(e.to_string());
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
            let errors = match self.verify_table(ctx, data, item).await {
                Ok(errors) => errors,
                Err(e) => vec![e.to_string()],
            };
            outcome.items.push(ctx.record_health(data, item, errors)?);
        }
        Ok(outcome)
    }
}
