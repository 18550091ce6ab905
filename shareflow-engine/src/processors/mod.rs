//! Per-type share processors.
//!
//! Each [`ShareProcessor`] grants, revokes and verifies one shareable type
//! against the remote accounts. A run hands every processor the same
//! [`ShareData`] and only the items of its type. A failing item never stops
//! its siblings: its outcome is recorded and the loop moves on.

mod access_points;
mod buckets;
mod redshift;
mod s3_access;
mod tables;

pub use access_points::AccessPointProcessor;
pub use buckets::BucketProcessor;
pub use redshift::RedshiftProcessor;
pub use tables::TableProcessor;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::notifications::{NotificationKind, NotificationSink, ShareNotification};
use crate::share_data::ShareData;
use crate::state_machine::ShareItemSM;
use async_trait::async_trait;
use chrono::Utc;
use shareflow_cloud::CloudClients;
use shareflow_storage::{CatalogRepository, ShareStore};
use shareflow_types::{
    ShareItemAction, ShareItemHealthStatus, ShareObjectItem, ShareableType, SharedResource,
};
use std::sync::Arc;
use tracing::{info, warn};

/// How approved items are processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessMode {
    /// Lifecycle run: items move through Share_In_Progress to Succeeded or Failed.
    Share,
    /// Healing run: lifecycle status is kept, health status records the result.
    Reapply,
}

/// Result of one item in a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemOutcome {
    pub share_item_uri: String,
    pub item_name: String,
    pub result: Result<(), String>,
}

/// Per-item results of one processor call plus its cleanup step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    pub items: Vec<ItemOutcome>,
    pub cleanup: Result<(), String>,
}

impl Default for BatchOutcome {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            cleanup: Ok(()),
        }
    }
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.cleanup.is_ok() && self.items.iter().all(|i| i.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| i.result.is_err())
    }
}

/// Remote grant strategy for one shareable type.
#[async_trait]
pub trait ShareProcessor: Send + Sync {
    fn shareable_type(&self) -> ShareableType;

    /// Grants access for items in Share_Approved, or re-grants Share_Succeeded items when reapplying.
    async fn process_approved_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
        mode: ProcessMode,
    ) -> EngineResult<BatchOutcome>;

    /// Revokes access for items in Revoke_Approved, then cleans up unreferenced intermediaries.
    async fn process_revoked_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
    ) -> EngineResult<BatchOutcome>;

    /// Compares remote state with what the items should grant and records health.
    async fn verify_shares(
        &self,
        ctx: &ProcessorContext,
        data: &ShareData,
        items: &[ShareObjectItem],
    ) -> EngineResult<BatchOutcome>;
}

/// Collaborators shared by every processor.
#[derive(Clone)]
pub struct ProcessorContext {
    pub store: ShareStore,
    pub catalog: Arc<dyn CatalogRepository>,
    pub cloud: CloudClients,
    pub config: Arc<EngineConfig>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl ProcessorContext {
    pub fn new(
        store: ShareStore,
        catalog: Arc<dyn CatalogRepository>,
        cloud: CloudClients,
        config: Arc<EngineConfig>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            cloud,
            config,
            notifier,
        }
    }

    /// Catalog record an item points at.
    pub(crate) fn resolve(&self, item: &ShareObjectItem) -> EngineResult<SharedResource> {
        self.catalog
            .get_shared_resource(item.item_type, &item.item_uri)?
            .ok_or_else(|| EngineError::AwsResourceNotFound {
                action: format!("share {}", item.item_type),
                message: format!("{} {} is not in the catalog", item.item_type, item.item_uri),
            })
    }

    /// Moves an item to its in-progress state. Reapply runs leave lifecycle status alone.
    pub(crate) fn start_item(&self, item: &ShareObjectItem, mode: ProcessMode) -> EngineResult<ShareItemSM> {
        let mut sm = ShareItemSM::new(item.status);
        if mode == ProcessMode::Share {
            let next = sm.run_transition(ShareItemAction::Start)?;
            sm.update_state_single_item(&self.store, &item.share_item_uri, next)?;
        }
        Ok(sm)
    }

    /// Records the result of granting one item.
    pub(crate) fn finish_share(
        &self,
        data: &ShareData,
        item: &ShareObjectItem,
        sm: &mut ShareItemSM,
        mode: ProcessMode,
        result: EngineResult<()>,
    ) -> EngineResult<ItemOutcome> {
        let now = Utc::now();
        let result = result.map_err(|e| e.to_string());
        match (&result, mode) {
            (Ok(()), ProcessMode::Share) => {
                let next = sm.run_transition(ShareItemAction::Success)?;
                sm.update_state_single_item(&self.store, &item.share_item_uri, next)?;
                self.store
                    .update_item_health(&item.share_item_uri, Some(ShareItemHealthStatus::Healthy), None, Some(now))?;
            }
            (Ok(()), ProcessMode::Reapply) => {
                self.store
                    .update_item_health(&item.share_item_uri, Some(ShareItemHealthStatus::Healthy), None, Some(now))?;
                self.notify_health(data, item, ShareItemHealthStatus::Healthy, "share re-applied");
            }
            (Err(reason), ProcessMode::Share) => {
                let next = sm.run_transition(ShareItemAction::Failure)?;
                sm.update_state_single_item(&self.store, &item.share_item_uri, next)?;
                self.store
                    .update_item_health(&item.share_item_uri, item.health_status, Some(reason.as_str()), None)?;
                warn!("share {}: sharing {} failed: {reason}", data.share_uri(), item.item_name);
                self.notifier
                    .notify(ShareNotification::item_failed(&data.share, &data.dataset, item, reason));
            }
            (Err(reason), ProcessMode::Reapply) => {
                self.store.update_item_health(
                    &item.share_item_uri,
                    Some(ShareItemHealthStatus::Unhealthy),
                    Some(reason.as_str()),
                    Some(now),
                )?;
                warn!("share {}: re-applying {} failed: {reason}", data.share_uri(), item.item_name);
                self.notify_health(data, item, ShareItemHealthStatus::Unhealthy, reason);
            }
        }
        Ok(self.outcome(item, result))
    }

    /// Records the result of revoking one item. Revoked items carry no health.
    pub(crate) fn finish_revoke(
        &self,
        data: &ShareData,
        item: &ShareObjectItem,
        sm: &mut ShareItemSM,
        result: EngineResult<()>,
    ) -> EngineResult<ItemOutcome> {
        let result = result.map_err(|e| e.to_string());
        match &result {
            Ok(()) => {
                let next = sm.run_transition(ShareItemAction::Success)?;
                sm.update_state_single_item(&self.store, &item.share_item_uri, next)?;
                self.store
                    .update_item_health(&item.share_item_uri, None, None, item.last_verification_time)?;
            }
            Err(reason) => {
                let next = sm.run_transition(ShareItemAction::Failure)?;
                sm.update_state_single_item(&self.store, &item.share_item_uri, next)?;
                self.store
                    .update_item_health(&item.share_item_uri, item.health_status, Some(reason.as_str()), None)?;
                warn!("share {}: revoking {} failed: {reason}", data.share_uri(), item.item_name);
                self.notifier
                    .notify(ShareNotification::item_failed(&data.share, &data.dataset, item, reason));
            }
        }
        Ok(self.outcome(item, result))
    }

    /// Records a verification result. An empty error list means healthy.
    pub(crate) fn record_health(
        &self,
        data: &ShareData,
        item: &ShareObjectItem,
        errors: Vec<String>,
    ) -> EngineResult<ItemOutcome> {
        let now = Utc::now();
        if errors.is_empty() {
            self.store
                .update_item_health(&item.share_item_uri, Some(ShareItemHealthStatus::Healthy), None, Some(now))?;
            return Ok(self.outcome(item, Ok(())));
        }
        let message = errors.join(" | ");
        self.store.update_item_health(
            &item.share_item_uri,
            Some(ShareItemHealthStatus::Unhealthy),
            Some(message.as_str()),
            Some(now),
        )?;
        info!("share {}: {} is unhealthy: {message}", data.share_uri(), item.item_name);
        self.notify_health(data, item, ShareItemHealthStatus::Unhealthy, &message);
        Ok(self.outcome(item, Err(message)))
    }

    fn notify_health(&self, data: &ShareData, item: &ShareObjectItem, health: ShareItemHealthStatus, message: &str) {
        let kind = match health {
            ShareItemHealthStatus::Healthy => NotificationKind::Healthy,
            _ => NotificationKind::Unhealthy,
        };
        self.notifier.notify(ShareNotification::for_share(
            kind,
            &data.share,
            &data.dataset,
            format!("{} {}: {message}", item.item_type, item.item_name),
        ));
    }

    fn outcome(&self, item: &ShareObjectItem, result: Result<(), String>) -> ItemOutcome {
        ItemOutcome {
            share_item_uri: item.share_item_uri.clone(),
            item_name: item.item_name.clone(),
            result,
        }
    }
}

/// Processors in dispatch order.
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn ShareProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self { processors: Vec::new() }
    }

    /// Table, StorageLocation, S3Bucket, then RedshiftTable.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TableProcessor));
        registry.register(Arc::new(AccessPointProcessor));
        registry.register(Arc::new(BucketProcessor));
        registry.register(Arc::new(RedshiftProcessor));
        registry
    }

    /// Adds a processor, replacing any registered for the same type in place.
    pub fn register(&mut self, processor: Arc<dyn ShareProcessor>) {
        let item_type = processor.shareable_type();
        match self.processors.iter().position(|p| p.shareable_type() == item_type) {
            Some(index) => self.processors[index] = processor,
            None => self.processors.push(processor),
        }
    }

    pub fn get(&self, item_type: ShareableType) -> Option<&Arc<dyn ShareProcessor>> {
        self.processors.iter().find(|p| p.shareable_type() == item_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ShareProcessor>> {
        self.processors.iter()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
