//! Warehouse tables shared through datashares.
//!
//! The producer namespace holds one datashare per dataset and consumer
//! namespace. The consumer mounts it as a local database, exposes the shared
//! schema as an external schema and grants the principal's warehouse role
//! on it.

use super::{BatchOutcome, ProcessMode, ProcessorContext, ShareProcessor};
use crate::error::{EngineError, EngineResult};
use crate::naming;
use crate::share_data::ShareData;
use async_trait::async_trait;
use shareflow_cloud::{AccountScope, WarehouseConnection, WarehouseGrant, WarehouseObject};
use shareflow_storage::ItemFilter;
use shareflow_types::{
    RedshiftConnection, RedshiftTable, ShareItemStatus, ShareObject, ShareObjectItem, ShareableType, SharedResource,
};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default)]
pub struct RedshiftProcessor;

/// Everything a datashare run addresses, resolved once per call.
struct Datashare {
    producer: WarehouseConnection,
    consumer: WarehouseConnection,
    name: String,
    schema: String,
    local_database: String,
    local_schema: String,
    role: String,
}

impl Datashare {
    fn share_object(&self) -> WarehouseObject {
        WarehouseObject::Datashare { name: self.name.clone() }
    }

    fn share_schema(&self) -> WarehouseObject {
        WarehouseObject::DatashareSchema {
            datashare: self.name.clone(),
            schema: self.schema.clone(),
        }
    }

    fn share_table(&self, table: &str) -> WarehouseObject {
        WarehouseObject::DatashareTable {
            datashare: self.name.clone(),
            schema: self.schema.clone(),
            table: table.to_string(),
        }
    }

    fn usage(&self) -> WarehouseGrant {
        WarehouseGrant::DatashareUsage {
            datashare: self.name.clone(),
            consumer_namespace: self.consumer.namespace_id.clone(),
        }
    }

    fn consumer_database(&self) -> WarehouseObject {
        WarehouseObject::DatashareDatabase {
            database: self.local_database.clone(),
            datashare: self.name.clone(),
            producer_namespace: self.producer.namespace_id.clone(),
        }
    }

    fn external_schema(&self) -> WarehouseObject {
        WarehouseObject::ExternalSchema {
            database: self.local_database.clone(),
            schema: self.schema.clone(),
            local_schema: self.local_schema.clone(),
        }
    }

    fn database_usage(&self) -> WarehouseGrant {
        WarehouseGrant::DatabaseUsage {
            database: self.local_database.clone(),
            role: self.role.clone(),
        }
    }

    fn schema_usage(&self) -> WarehouseGrant {
        WarehouseGrant::SchemaUsage {
            schema: self.local_schema.clone(),
            role: self.role.clone(),
        }
    }

    /// Select grants for a table: one on the mounted database, one through the external schema.
    fn table_selects(&self, table: &str) -> [WarehouseGrant; 2] {
        [
            WarehouseGrant::TableSelect {
                database: self.local_database.clone(),
                schema: self.schema.clone(),
                table: table.to_string(),
                role: self.role.clone(),
            },
            WarehouseGrant::TableSelect {
                database: self.consumer.database.clone(),
                schema: self.local_schema.clone(),
                table: table.to_string(),
                role: self.role.clone(),
            },
        ]
    }
}

fn connection(conn: &RedshiftConnection, scope: AccountScope) -> WarehouseConnection {
    WarehouseConnection {
        scope,
        namespace_id: conn.namespace_id.clone(),
        database: conn.database.clone(),
        workgroup: conn.workgroup.clone(),
        cluster_id: conn.cluster_id.clone(),
        secret_arn: conn.secret_arn.clone(),
        user: conn.redshift_user.clone(),
    }
}

fn require_connection(ctx: &ProcessorContext, connection_uri: &str) -> EngineResult<RedshiftConnection> {
    ctx.catalog
        .get_redshift_connection(connection_uri)?
        .ok_or_else(|| EngineError::not_found(format!("redshift connection {connection_uri}")))
}

fn resolve_datashare(ctx: &ProcessorContext, data: &ShareData) -> EngineResult<Datashare> {
    let dataset = &data.dataset;
    let producer_uri = dataset
        .redshift_connection_uri
        .as_deref()
        .ok_or_else(|| EngineError::invalid_input("redshift_connection_uri", format!("dataset {} has no connection", dataset.dataset_uri)))?;
    let schema = dataset
        .redshift_schema
        .clone()
        .ok_or_else(|| EngineError::invalid_input("redshift_schema", format!("dataset {} has no schema", dataset.dataset_uri)))?;
    let producer = require_connection(ctx, producer_uri)?;
    let consumer = require_connection(ctx, &data.share.principal_id)?;
    let role = data
        .share
        .principal_role_name
        .clone()
        .ok_or_else(|| EngineError::invalid_input("principal_role_name", "redshift shares need a warehouse role"))?;

    Ok(Datashare {
        name: naming::datashare_name(&ctx.config.resource_prefix, &dataset.dataset_uri, &consumer.namespace_id),
        local_database: naming::consumer_database_name(&consumer.name, &producer.database),
        local_schema: naming::external_schema_name(&producer.database, &schema),
        producer: connection(&producer, data.source_scope()),
        consumer: connection(&consumer, data.target_scope()),
        schema,
        role,
    })
}

fn resolve_table(ctx: &ProcessorContext, item: &ShareObjectItem) -> EngineResult<RedshiftTable> {
    match ctx.resolve(item)? {
        SharedResource::RedshiftTable(table) => Ok(table),
        other => Err(EngineError::invalid_input(
            "item_type",
            format!("{} is a {}, not a warehouse table", item.item_uri, other.item_type()),
        )),
    }
}

impl RedshiftProcessor {
    async fn ensure(&self, ctx: &ProcessorContext, conn: &WarehouseConnection, object: WarehouseObject) -> EngineResult<()> {
        if !ctx.cloud.warehouse.object_exists(conn, &object).await? {
            debug!("creating {object} in namespace {}", conn.namespace_id);
            ctx.cloud.warehouse.create_object(conn, &object).await?;
        }
        Ok(())
    }

    /// Producer datashare and consumer mounts shared by every table of the run.
    async fn prepare(&self, ctx: &ProcessorContext, ds: &Datashare) -> EngineResult<()> {
        let warehouse = &ctx.cloud.warehouse;
        self.ensure(ctx, &ds.producer, ds.share_object()).await?;
        self.ensure(ctx, &ds.producer, ds.share_schema()).await?;
        warehouse.grant(&ds.producer, &ds.usage()).await?;

        self.ensure(ctx, &ds.consumer, ds.consumer_database()).await?;
        warehouse.grant(&ds.consumer, &ds.database_usage()).await?;
        self.ensure(ctx, &ds.consumer, ds.external_schema()).await?;
        warehouse.grant(&ds.consumer, &ds.schema_usage()).await?;
        Ok(())
    }

    async fn share_table(&self, ctx: &ProcessorContext, ds: &Datashare, item: &ShareObjectItem) -> EngineResult<()> {
        let table = resolve_table(ctx, item)?;
        self.ensure(ctx, &ds.producer, ds.share_table(&table.name)).await?;
        for grant in ds.table_selects(&table.name) {
            ctx.cloud.warehouse.grant(&ds.consumer, &grant).await?;
        }
        Ok(())
    }

    /// Other shares of the dataset into the same consumer namespace, holding `item_uri` when given.
    fn other_namespace_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        ds: &Datashare,
        item_uri: Option<&str>,
    ) -> EngineResult<Vec<ShareObject>> {
        let shares = ctx.store.list_shares_holding(
            &data.dataset.dataset_uri,
            ShareableType::RedshiftTable,
            item_uri,
            ShareItemStatus::SHARED,
        )?;
        let mut same_namespace = Vec::new();
        for share in shares.into_iter().filter(|s| s.share_uri != data.share.share_uri) {
            match ctx.catalog.get_redshift_connection(&share.principal_id)? {
                Some(conn) if conn.namespace_id == ds.consumer.namespace_id => same_namespace.push(share),
                _ => {}
            }
        }
        Ok(same_namespace)
    }

    async fn revoke_table(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        ds: &Datashare,
        item: &ShareObjectItem,
    ) -> EngineResult<()> {
        let table = resolve_table(ctx, item)?;
        for grant in ds.table_selects(&table.name) {
            ctx.cloud.warehouse.revoke(&ds.consumer, &grant).await?;
        }
        if self.other_namespace_shares(ctx, data, ds, Some(&item.item_uri))?.is_empty() {
            info!("share {}: removing {} from datashare {}", data.share_uri(), table.name, ds.name);
            ctx.cloud
                .warehouse
                .drop_object(&ds.producer, &ds.share_table(&table.name))
                .await?;
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: &ProcessorContext, data: &ShareData, ds: &Datashare) -> EngineResult<()> {
        let warehouse = &ctx.cloud.warehouse;
        let shared_here = ItemFilter::any()
            .of_type(ShareableType::RedshiftTable)
            .with_statuses(ShareItemStatus::SHARED);
        if ctx.store.has_items(data.share_uri(), &shared_here)? {
            return Ok(());
        }
        warehouse.revoke(&ds.consumer, &ds.schema_usage()).await?;
        warehouse.revoke(&ds.consumer, &ds.database_usage()).await?;

        if !self.other_namespace_shares(ctx, data, ds, None)?.is_empty() {
            debug!("share {}: datashare {} still used by the namespace", data.share_uri(), ds.name);
            return Ok(());
        }
        info!("share {}: dropping datashare {}", data.share_uri(), ds.name);
        warehouse.drop_object(&ds.consumer, &ds.external_schema()).await?;
        warehouse.drop_object(&ds.consumer, &ds.consumer_database()).await?;
        warehouse.revoke(&ds.producer, &ds.usage()).await?;
        warehouse.drop_object(&ds.producer, &ds.share_object()).await?;
        Ok(())
    }

    async fn verify_table(&self, ctx: &ProcessorContext, ds: &Datashare, item: &ShareObjectItem) -> EngineResult<Vec<String>> {
        let table = match resolve_table(ctx, item) {
            Ok(table) => table,
            Err(e) => return Ok(vec![e.to_string()]),
        };
        let mut errors = Vec::new();
        let member = ds.share_table(&table.name);
        if !ctx.cloud.warehouse.object_exists(&ds.producer, &member).await? {
            errors.push(format!("{} is not in datashare {}", table.name, ds.name));
        }
        let grants = ctx.cloud.warehouse.list_grants(&ds.consumer).await?;
        for expected in ds.table_selects(&table.name) {
            if !grants.contains(&expected) {
                errors.push(format!("missing grant: {expected}"));
            }
        }
        for expected in [ds.database_usage(), ds.schema_usage()] {
            if !grants.contains(&expected) {
                errors.push(format!("missing grant: {expected}"));
            }
        }
        Ok(errors)
    }
}

#[async_trait]
impl ShareProcessor for RedshiftProcessor {
    fn shareable_type(&self) -> ShareableType {
        ShareableType::RedshiftTable
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
            return Ok(outcome);
        }
        let ds = resolve_datashare(ctx, data)?;
        self.prepare(ctx, &ds).await?;
        for item in items {
            let mut sm = ctx.start_item(item, mode)?;
            let result = self.share_table(ctx, &ds, item).await;
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
        let ds = resolve_datashare(ctx, data)?;
        for item in items {
            let mut sm = ctx.start_item(item, ProcessMode::Share)?;
            let result = self.revoke_table(ctx, data, &ds, item).await;
            outcome.items.push(ctx.finish_revoke(data, item, &mut sm, result)?);
        }
        if let Err(e) = self.cleanup(ctx, data, &ds).await {
            warn!("share {}: failed to clean up datashare {}: {e}", data.share_uri(), ds.name);
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
        if items.is_empty() {
            return Ok(outcome);
        }
        let ds = match resolve_datashare(ctx, data) {
            Ok(ds) => ds,
            Err(e) => {
                for item in items {
                    outcome.items.push(ctx.record_health(data, item, vec![e.to_string()])?);
                }
                return Ok(outcome);
            }
        };
        for item in items {
            let errors = match self.verify_table(ctx, &ds, item).await {
                Ok(errors) => errors,
                Err(e) => vec![e.to_string()],
            };
            outcome.items.push(ctx.record_health(data, item, errors)?);
        }
        Ok(outcome)
    }
}
