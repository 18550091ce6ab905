//! Share orchestration runs.
//!
//! A mutating run goes Idle → Locking → Dispatching → Finalizing → Unlocked:
//!
//! 1. Load the [`ShareData`] snapshot and confirm the principal role resolves
//! 2. Lock the dataset and the principal scope as one set, then reload the snapshot
//! 3. Start the share object, then hand each processor its approved items
//! 4. Finish the share object from the aggregated result and release the locks
//!
//! Every run locks under its own [`LockOwner`], so a second run of the same
//! share waits for the first and then starts from the state it left.
//!
//! Principal and lock failures abort before anything is mutated. Failures
//! inside a processor are isolated to that processor's items.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::lock::{HeldLocks, ResourceLockManager};
use crate::notifications::{NotificationKind, NotificationSink, ShareNotification};
use crate::principal::{IamPrincipalResolver, PrincipalResolver};
use crate::processors::{ProcessMode, ProcessorContext, ProcessorRegistry};
use crate::share_data::ShareData;
use crate::state_machine::{ShareItemSM, ShareObjectSM};
use chrono::Utc;
use shareflow_cloud::CloudClients;
use shareflow_storage::{CatalogRepository, ItemFilter, ShareStore};
use shareflow_types::{
    LockOwner, ShareItemAction, ShareItemHealthStatus, ShareItemStatus, ShareObjectAction, ShareableType,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const APPROVE_ACTION: &str = "process approved shares";
const REVOKE_ACTION: &str = "process revoked shares";
const REAPPLY_ACTION: &str = "reapply shares";

/// Phase of a mutating run, logged as it advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Locking,
    Dispatching,
    Finalizing,
    Unlocked,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which side of the lifecycle a run drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunKind {
    Approve,
    Revoke,
}

impl RunKind {
    fn action(&self) -> &'static str {
        match self {
            RunKind::Approve => APPROVE_ACTION,
            RunKind::Revoke => REVOKE_ACTION,
        }
    }

    /// Item states owned by a run of this kind.
    fn pending_states(&self) -> [ShareItemStatus; 2] {
        match self {
            RunKind::Approve => [ShareItemStatus::ShareApproved, ShareItemStatus::ShareInProgress],
            RunKind::Revoke => [ShareItemStatus::RevokeApproved, ShareItemStatus::RevokeInProgress],
        }
    }
}

/// Orchestrates approve, revoke, verify and reapply runs.
pub struct SharingService {
    ctx: ProcessorContext,
    registry: ProcessorRegistry,
    resolver: Arc<dyn PrincipalResolver>,
    locks: ResourceLockManager,
}

impl SharingService {
    pub fn new(
        ctx: ProcessorContext,
        registry: ProcessorRegistry,
        resolver: Arc<dyn PrincipalResolver>,
        locks: ResourceLockManager,
    ) -> Self {
        Self {
            ctx,
            registry,
            resolver,
            locks,
        }
    }

    /// Default processors, IAM principal resolution and configured lock policy.
    pub fn from_config(
        store: ShareStore,
        catalog: Arc<dyn CatalogRepository>,
        cloud: CloudClients,
        notifier: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let locks = ResourceLockManager::from_config(store.clone(), &config);
        let resolver = Arc::new(IamPrincipalResolver::new(cloud.identity.clone()));
        let ctx = ProcessorContext::new(store, catalog, cloud, Arc::new(config), notifier);
        Self::new(ctx, ProcessorRegistry::with_defaults(), resolver, locks)
    }

    pub fn context(&self) -> &ProcessorContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &ResourceLockManager {
        &self.locks
    }

    fn store(&self) -> &ShareStore {
        &self.ctx.store
    }

    fn phase(&self, share_uri: &str, phase: RunPhase) {
        debug!("share {share_uri}: {phase}");
    }

    fn load(&self, share_uri: &str) -> EngineResult<ShareData> {
        ShareData::load(self.store(), self.ctx.catalog.as_ref(), share_uri)
    }

    async fn principal_resolves(&self, data: &ShareData) -> EngineResult<bool> {
        self.resolver
            .verify_principal_role(&data.share, &data.target_environment)
            .await
    }

    async fn require_principal(&self, data: &ShareData, action: &str) -> EngineResult<()> {
        if self.principal_resolves(data).await? {
            return Ok(());
        }
        error!("share {}: principal role {} not found", data.share_uri(), data.principal_role_name());
        Err(EngineError::PrincipalRoleNotFound {
            action: action.to_string(),
            role: data.principal_role_name().to_string(),
        })
    }

    async fn lock(&self, data: &ShareData, action: &str) -> EngineResult<HeldLocks> {
        self.phase(data.share_uri(), RunPhase::Locking);
        self.locks
            .acquire_lock_with_retry(data.lock_keys(), LockOwner::share(data.share_uri()), action)
            .await
    }

    fn unlock(&self, share_uri: &str, locks: HeldLocks) {
        match locks.is_held() {
            Ok(true) => {}
            Ok(false) => error!("share {share_uri}: run {} lost its locks while running", locks.owner().run_id),
            Err(e) => warn!("share {share_uri}: could not check lock ownership: {e}"),
        }
        if let Err(e) = locks.release() {
            error!("share {share_uri}: failed to release locks: {e}");
        }
        self.phase(share_uri, RunPhase::Unlocked);
    }

    /// Grants every Share_Approved item of the share.
    ///
    /// Returns `Ok(false)` when any item or cleanup step failed. Fails before
    /// mutating anything when the principal role is missing or the locks stay busy.
    pub async fn approve_share(&self, share_uri: &str) -> EngineResult<bool> {
        self.run(share_uri, RunKind::Approve).await
    }

    /// Revokes every Revoke_Approved item of the share.
    ///
    /// The share returns to Draft instead of Processed when items still await approval.
    pub async fn revoke_share(&self, share_uri: &str) -> EngineResult<bool> {
        self.run(share_uri, RunKind::Revoke).await
    }

    async fn run(&self, share_uri: &str, kind: RunKind) -> EngineResult<bool> {
        let data = self.load(share_uri)?;
        self.phase(share_uri, RunPhase::Idle);
        self.require_principal(&data, kind.action()).await?;
        let locks = self.lock(&data, kind.action()).await?;
        // Another run may have moved the share while this one waited.
        let data = self.load(share_uri)?;

        info!("share {share_uri}: starting {}", kind.action());
        let mut share_sm = ShareObjectSM::new(data.share.status);
        let started = share_sm.run_transition(ShareObjectAction::Start)?;
        share_sm.update_state(self.store(), share_uri, started)?;

        self.phase(share_uri, RunPhase::Dispatching);
        let dispatched = match kind {
            RunKind::Approve => self.dispatch_approved(&data, ProcessMode::Share).await,
            RunKind::Revoke => self.dispatch_revoked(&data).await,
        };

        self.phase(share_uri, RunPhase::Finalizing);
        let success = match dispatched {
            Ok(success) => success,
            Err(e) => {
                error!("share {share_uri}: error during {}: {e}", kind.action());
                self.fail_pending_items(share_uri, &kind.pending_states(), None)?;
                self.ctx.notifier.notify(ShareNotification::for_share(
                    NotificationKind::Failed,
                    &data.share,
                    &data.dataset,
                    format!("{} failed: {e}", kind.action()),
                ));
                false
            }
        };

        let finish = match kind {
            RunKind::Revoke if self.store().has_items(share_uri, &ItemFilter::any().with_status(ShareItemStatus::PendingApproval))? => {
                ShareObjectAction::FinishPending
            }
            _ => ShareObjectAction::Finish,
        };
        let finished = share_sm.run_transition(finish)?;
        share_sm.update_state(self.store(), share_uri, finished)?;
        self.unlock(share_uri, locks);

        info!("share {share_uri}: {} succeeded = {success}", kind.action());
        Ok(success)
    }

    fn approved_filter(item_type: ShareableType, mode: ProcessMode) -> ItemFilter {
        let filter = ItemFilter::any().of_type(item_type);
        match mode {
            ProcessMode::Share => filter.with_status(ShareItemStatus::ShareApproved),
            ProcessMode::Reapply => filter.with_health(ShareItemHealthStatus::PendingReApply),
        }
    }

    async fn dispatch_approved(&self, data: &ShareData, mode: ProcessMode) -> EngineResult<bool> {
        let share_uri = data.share_uri();
        let mut success = true;
        for processor in self.registry.iter() {
            let item_type = processor.shareable_type();
            let items = self.store().list_items(share_uri, &Self::approved_filter(item_type, mode))?;
            if items.is_empty() {
                continue;
            }
            info!("share {share_uri}: granting {} {item_type} items ({mode:?})", items.len());
            match processor.process_approved_shares(&self.ctx, data, &items, mode).await {
                Ok(outcome) => {
                    info!("share {share_uri}: sharing {item_type} succeeded = {}", outcome.succeeded());
                    success &= outcome.succeeded();
                }
                Err(e) => {
                    error!("share {share_uri}: error during sharing of {item_type}: {e}");
                    match mode {
                        ProcessMode::Share => self.fail_pending_items(
                            share_uri,
                            &RunKind::Approve.pending_states(),
                            Some(item_type),
                        )?,
                        ProcessMode::Reapply => {
                            self.store().update_item_health_where(
                                share_uri,
                                &Self::approved_filter(item_type, mode),
                                ShareItemHealthStatus::Unhealthy,
                                Some(&e.to_string()),
                                Some(Utc::now()),
                            )?;
                        }
                    }
                    success = false;
                }
            }
        }
        Ok(success)
    }

    async fn dispatch_revoked(&self, data: &ShareData) -> EngineResult<bool> {
        let share_uri = data.share_uri();
        let mut success = true;
        for processor in self.registry.iter() {
            let item_type = processor.shareable_type();
            let filter = ItemFilter::any()
                .of_type(item_type)
                .with_status(ShareItemStatus::RevokeApproved);
            let items = self.store().list_items(share_uri, &filter)?;
            if items.is_empty() {
                continue;
            }
            info!("share {share_uri}: revoking {} {item_type} items", items.len());
            match processor.process_revoked_shares(&self.ctx, data, &items).await {
                Ok(outcome) => {
                    info!("share {share_uri}: revoking {item_type} succeeded = {}", outcome.succeeded());
                    success &= outcome.succeeded();
                }
                Err(e) => {
                    error!("share {share_uri}: error during share revoking of {item_type}: {e}");
                    self.fail_pending_items(share_uri, &RunKind::Revoke.pending_states(), Some(item_type))?;
                    success = false;
                }
            }
        }
        Ok(success)
    }

    /// Moves items still owned by the run to their failed state.
    fn fail_pending_items(
        &self,
        share_uri: &str,
        states: &[ShareItemStatus],
        item_type: Option<ShareableType>,
    ) -> EngineResult<()> {
        for state in states {
            let mut sm = ShareItemSM::new(*state);
            let failed = sm.run_transition(ShareItemAction::Failure)?;
            let moved = sm.update_state_for_type(self.store(), share_uri, item_type, failed)?;
            if moved > 0 {
                warn!("share {share_uri}: {moved} items {state} -> {failed}");
            }
        }
        Ok(())
    }

    /// Checks remote grants of the share's items in PendingVerify health and records their health.
    ///
    /// Takes no locks and never changes lifecycle status. `status` narrows the
    /// selection; `None` matches any. Returns whether every verified item is healthy.
    pub async fn verify_share(&self, share_uri: &str, status: Option<ShareItemStatus>) -> EngineResult<bool> {
        self.verify_share_with_health(share_uri, status, Some(ShareItemHealthStatus::PendingVerify))
            .await
    }

    /// [`verify_share`](Self::verify_share) with an explicit health selection; `None` matches any.
    pub async fn verify_share_with_health(
        &self,
        share_uri: &str,
        status: Option<ShareItemStatus>,
        health: Option<ShareItemHealthStatus>,
    ) -> EngineResult<bool> {
        let data = self.load(share_uri)?;
        let selected = |item_type: Option<ShareableType>| {
            let mut filter = ItemFilter::any();
            if let Some(health) = health {
                filter = filter.with_health(health);
            }
            if let Some(status) = status {
                filter = filter.with_status(status);
            }
            if let Some(item_type) = item_type {
                filter = filter.of_type(item_type);
            }
            filter
        };

        if !self.principal_resolves(&data).await? {
            error!(
                "share {share_uri}: failed to get principal role {}, updating health status",
                data.principal_role_name()
            );
            let message = format!(
                "Share principal Role {} not found. Check the team or consumption IAM role used.",
                data.principal_role_name()
            );
            self.store().update_item_health_where(
                share_uri,
                &selected(None),
                ShareItemHealthStatus::Unhealthy,
                Some(&message),
                Some(Utc::now()),
            )?;
            self.ctx.notifier.notify(ShareNotification::for_share(
                NotificationKind::Unhealthy,
                &data.share,
                &data.dataset,
                message,
            ));
            return Ok(false);
        }

        let mut healthy = true;
        for processor in self.registry.iter() {
            let item_type = processor.shareable_type();
            let items = self.store().list_items(share_uri, &selected(Some(item_type)))?;
            if items.is_empty() {
                continue;
            }
            debug!("share {share_uri}: verifying {} {item_type} items", items.len());
            match processor.verify_shares(&self.ctx, &data, &items).await {
                Ok(outcome) => healthy &= outcome.succeeded(),
                Err(e) => {
                    error!("share {share_uri}: error during share verifying of {item_type}: {e}");
                    healthy = false;
                }
            }
        }
        Ok(healthy)
    }

    /// Re-grants items in PendingReApply health without touching lifecycle status.
    ///
    /// A lock timeout marks those items Unhealthy and returns `Ok(false)`.
    pub async fn reapply_share(&self, share_uri: &str) -> EngineResult<bool> {
        let data = self.load(share_uri)?;
        self.phase(share_uri, RunPhase::Idle);
        if !self.principal_resolves(&data).await? {
            error!(
                "share {share_uri}: failed to get principal role {}, exiting",
                data.principal_role_name()
            );
            return Ok(false);
        }

        let locks = match self.lock(&data, REAPPLY_ACTION).await {
            Ok(locks) => locks,
            Err(EngineError::ResourceLockTimeout { .. }) => {
                let message = format!(
                    "SHARING PROCESS TIMEOUT: Failed to acquire lock for dataset {}",
                    data.dataset.dataset_uri
                );
                error!("share {share_uri}: {message}");
                self.store().update_item_health_where(
                    share_uri,
                    &ItemFilter::any().with_health(ShareItemHealthStatus::PendingReApply),
                    ShareItemHealthStatus::Unhealthy,
                    Some(&message),
                    Some(Utc::now()),
                )?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let data = self.load(share_uri)?;

        self.phase(share_uri, RunPhase::Dispatching);
        let success = match self.dispatch_approved(&data, ProcessMode::Reapply).await {
            Ok(success) => success,
            Err(e) => {
                error!("share {share_uri}: error during share reapply: {e}");
                false
            }
        };
        self.phase(share_uri, RunPhase::Finalizing);
        self.unlock(share_uri, locks);
        info!("share {share_uri}: reapply succeeded = {success}");
        Ok(success)
    }
}
