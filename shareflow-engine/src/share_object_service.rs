//! Share request lifecycle: create, submit, review, extend, revoke and delete.
//!
//! Every operation is checked against the state machines before anything is
//! persisted. Operations that need remote work enqueue a [`ShareTask`].

use crate::error::{EngineError, EngineResult};
use crate::expiry::{requested_expiry, validate_expiration_period};
use crate::notifications::{NotificationKind, NotificationSink, ShareNotification};
use crate::principal::PrincipalResolver;
use crate::state_machine::{apply_share_action, approve_item_revokes, ShareItemSM, ShareObjectSM};
use crate::worker::{ShareTask, TaskQueue};
use chrono::Utc;
use shareflow_storage::{CatalogRepository, ItemFilter, ShareStore};
use shareflow_types::{
    Dataset, PrincipalType, ShareItemAction, ShareItemHealthStatus, ShareItemStatus, ShareObject,
    ShareObjectAction, ShareObjectItem, ShareObjectStatus, SharePermission, SharePrincipal, ShareStatistics,
    ShareableType,
};
use std::sync::Arc;
use tracing::{debug, info};

const CREATE_SHARE_OBJECT: &str = "create share object";
const ADD_ITEM: &str = "add item to share object";
const REMOVE_ITEM: &str = "remove item from share object";
const SUBMIT_SHARE_OBJECT: &str = "submit share object";
const APPROVE_SHARE_OBJECT: &str = "approve share object";
const REJECT_SHARE_OBJECT: &str = "reject share object";
const REVOKE_ITEMS: &str = "revoke items share object";
const SUBMIT_EXTENSION: &str = "submit share extension";
const APPROVE_EXTENSION: &str = "approve share object extension";
const CANCEL_EXTENSION: &str = "cancel share object extension";
const DELETE_SHARE_OBJECT: &str = "delete share object";
const VERIFY_ITEMS: &str = "verify items share object";
const REAPPLY_ITEMS: &str = "reapply items share object";
const UPDATE_SHARE: &str = "update share object";

/// The caller of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub username: String,
    pub groups: Vec<String>,
}

impl RequestContext {
    pub fn new<G: Into<String>>(username: impl Into<String>, groups: impl IntoIterator<Item = G>) -> Self {
        Self {
            username: username.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// A request for access to a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateShareRequest {
    pub dataset_uri: String,
    /// Target environment.
    pub environment_uri: String,
    /// Requesting team.
    pub group_uri: String,
    pub principal_id: String,
    pub principal_type: PrincipalType,
    /// Warehouse role; other principal types resolve their role from the catalog.
    pub principal_role_name: Option<String>,
    pub item: Option<(ShareableType, String)>,
    pub request_purpose: Option<String>,
    pub permissions: Vec<SharePermission>,
    pub share_expiration_period: Option<u32>,
    pub non_expirable: bool,
}

impl CreateShareRequest {
    /// A request on behalf of the team itself.
    pub fn for_group(
        dataset_uri: impl Into<String>,
        environment_uri: impl Into<String>,
        group_uri: impl Into<String>,
    ) -> Self {
        let group_uri = group_uri.into();
        Self {
            dataset_uri: dataset_uri.into(),
            environment_uri: environment_uri.into(),
            principal_id: group_uri.clone(),
            group_uri,
            principal_type: PrincipalType::Group,
            principal_role_name: None,
            item: None,
            request_purpose: None,
            permissions: vec![SharePermission::Read],
            share_expiration_period: None,
            non_expirable: false,
        }
    }

    /// Requests for another principal owned by the same team.
    pub fn with_principal(mut self, principal_id: impl Into<String>, principal_type: PrincipalType) -> Self {
        self.principal_id = principal_id.into();
        self.principal_type = principal_type;
        self
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.principal_role_name = Some(role_name.into());
        self
    }

    pub fn with_item(mut self, item_type: ShareableType, item_uri: impl Into<String>) -> Self {
        self.item = Some((item_type, item_uri.into()));
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.request_purpose = Some(purpose.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<SharePermission>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_expiration_period(mut self, period: u32) -> Self {
        self.share_expiration_period = Some(period);
        self
    }

    pub fn non_expirable(mut self) -> Self {
        self.non_expirable = true;
        self
    }
}

/// A share returned by [`ShareObjectService::create_share_object`].
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedShare {
    pub share: ShareObject,
    /// The dataset already had a live share for this principal.
    pub already_existed: bool,
}

enum RequestedItem {
    Existing(ShareObjectItem),
    New(ShareObjectItem),
}

/// Share request operations on behalf of authenticated callers.
pub struct ShareObjectService {
    store: ShareStore,
    catalog: Arc<dyn CatalogRepository>,
    resolver: Arc<dyn PrincipalResolver>,
    notifier: Arc<dyn NotificationSink>,
    queue: Arc<dyn TaskQueue>,
}

impl ShareObjectService {
    pub fn new(
        store: ShareStore,
        catalog: Arc<dyn CatalogRepository>,
        resolver: Arc<dyn PrincipalResolver>,
        notifier: Arc<dyn NotificationSink>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            store,
            catalog,
            resolver,
            notifier,
            queue,
        }
    }

    // ── Lookups and checks ──────────────────────────────────────

    pub fn get_share_object(&self, share_uri: &str) -> EngineResult<ShareObject> {
        Ok(self.store.require_share(share_uri)?)
    }

    fn dataset(&self, dataset_uri: &str) -> EngineResult<Dataset> {
        self.catalog
            .get_dataset(dataset_uri)?
            .ok_or_else(|| EngineError::not_found(format!("dataset {dataset_uri}")))
    }

    fn load(&self, share_uri: &str) -> EngineResult<(ShareObject, Dataset)> {
        let share = self.store.require_share(share_uri)?;
        let dataset = self.dataset(&share.dataset_uri)?;
        Ok((share, dataset))
    }

    fn is_approver(ctx: &RequestContext, dataset: &Dataset) -> bool {
        dataset.approver_groups().into_iter().any(|g| ctx.in_group(g))
    }

    fn require_requester(ctx: &RequestContext, share: &ShareObject, action: &str) -> EngineResult<()> {
        if ctx.in_group(&share.group_uri) {
            return Ok(());
        }
        Err(EngineError::unauthorized(
            action,
            format!("{} is not a member of the requesting team {}", ctx.username, share.group_uri),
        ))
    }

    fn require_approver(ctx: &RequestContext, dataset: &Dataset, action: &str) -> EngineResult<()> {
        if Self::is_approver(ctx, dataset) {
            return Ok(());
        }
        Err(EngineError::unauthorized(
            action,
            format!("{} is not an approver of dataset {}", ctx.username, dataset.label),
        ))
    }

    fn require_participant(ctx: &RequestContext, share: &ShareObject, dataset: &Dataset, action: &str) -> EngineResult<()> {
        if ctx.in_group(&share.group_uri) || Self::is_approver(ctx, dataset) {
            return Ok(());
        }
        Err(EngineError::unauthorized(
            action,
            format!("{} has no access to share {}", ctx.username, share.share_uri),
        ))
    }

    async fn require_principal(&self, share: &ShareObject, action: &str) -> EngineResult<()> {
        let environment = self
            .catalog
            .get_environment(&share.environment_uri)?
            .ok_or_else(|| EngineError::not_found(format!("environment {}", share.environment_uri)))?;
        if self.resolver.verify_principal_role(share, &environment).await? {
            return Ok(());
        }
        Err(EngineError::PrincipalRoleNotFound {
            action: action.to_string(),
            role: share.role_name().to_string(),
        })
    }

    fn notify(&self, kind: NotificationKind, share: &ShareObject, dataset: &Dataset, message: impl Into<String>) {
        self.notifier
            .notify(ShareNotification::for_share(kind, share, dataset, message));
    }

    /// Items of the share with the given share item URIs, failing on unknown URIs.
    fn select_items(&self, share_uri: &str, share_item_uris: &[String], field: &str) -> EngineResult<Vec<ShareObjectItem>> {
        if share_item_uris.is_empty() {
            return Err(EngineError::invalid_input(field, "no share items given"));
        }
        let items = self.store.list_items(share_uri, &ItemFilter::any())?;
        share_item_uris
            .iter()
            .map(|uri| {
                items
                    .iter()
                    .find(|item| &item.share_item_uri == uri)
                    .cloned()
                    .ok_or_else(|| EngineError::not_found(format!("share item {uri} in share {share_uri}")))
            })
            .collect()
    }

    // ── Requests ────────────────────────────────────────────────

    /// Creates a Draft share, or returns the live share the principal already has.
    pub async fn create_share_object(&self, ctx: &RequestContext, request: CreateShareRequest) -> EngineResult<CreatedShare> {
        let dataset = self.dataset(&request.dataset_uri)?;
        let environment = self
            .catalog
            .get_environment(&request.environment_uri)?
            .ok_or_else(|| EngineError::not_found(format!("environment {}", request.environment_uri)))?;

        if !ctx.in_group(&request.group_uri) {
            return Err(EngineError::unauthorized(
                CREATE_SHARE_OBJECT,
                format!("{} is not a member of {}", ctx.username, request.group_uri),
            ));
        }
        if environment.region != dataset.region {
            return Err(EngineError::unauthorized(
                CREATE_SHARE_OBJECT,
                format!(
                    "Requester Team {} works in region {} and the requested dataset is stored in region {}",
                    request.group_uri, environment.region, dataset.region
                ),
            ));
        }
        let manages_dataset = request.group_uri == dataset.admin_group
            || dataset.stewards.as_deref() == Some(request.group_uri.as_str());
        if request.principal_type == PrincipalType::Group
            && manages_dataset
            && environment.environment_uri == dataset.environment_uri
        {
            return Err(EngineError::unauthorized(
                CREATE_SHARE_OBJECT,
                format!("Team: {} is managing the dataset {}", request.group_uri, dataset.label),
            ));
        }

        let role_name = self.principal_role_name(&request)?;
        let requested_expiry_date = requested_expiry(
            &dataset,
            request.share_expiration_period,
            request.non_expirable,
            Utc::now(),
        )?;

        let existing = self.store.find_share(
            &dataset.dataset_uri,
            &environment.environment_uri,
            &request.principal_id,
            &request.group_uri,
        )?;
        let already_existed = existing.is_some();
        let share = match existing {
            Some(share) => share,
            None => {
                let principal = SharePrincipal {
                    principal_id: request.principal_id.clone(),
                    principal_type: request.principal_type,
                    principal_role_name: Some(role_name),
                };
                let mut share = ShareObject::draft(
                    &dataset.dataset_uri,
                    &environment.environment_uri,
                    &request.group_uri,
                    principal,
                    &ctx.username,
                );
                if !request.permissions.is_empty() {
                    share.permissions = request.permissions.clone();
                }
                share.request_purpose = request.request_purpose.clone();
                share.requested_expiry_date = requested_expiry_date;
                share.non_expirable = request.non_expirable;
                share.share_expiration_period = if request.non_expirable {
                    None
                } else {
                    request.share_expiration_period
                };
                self.store.insert_share(&share)?;
                info!(
                    "share {}: created for {} on dataset {} by {}",
                    share.share_uri, share.principal_id, dataset.label, ctx.username
                );
                share
            }
        };

        if let Some((item_type, item_uri)) = &request.item {
            if let RequestedItem::New(item) = self.requested_item(ctx, &share, *item_type, item_uri)? {
                self.store.insert_item(&item)?;
                info!("share {}: added {item_type} {}", share.share_uri, item.item_name);
            }
        }
        Ok(CreatedShare { share, already_existed })
    }

    fn principal_role_name(&self, request: &CreateShareRequest) -> EngineResult<String> {
        match request.principal_type {
            PrincipalType::Group => {
                let group = self
                    .catalog
                    .get_environment_group(&request.group_uri, &request.environment_uri)?
                    .ok_or_else(|| {
                        EngineError::not_found(format!(
                            "team {} in environment {}",
                            request.group_uri, request.environment_uri
                        ))
                    })?;
                Ok(group.iam_role_name)
            }
            PrincipalType::ConsumptionRole => {
                let role = self
                    .catalog
                    .get_consumption_role(&request.principal_id)?
                    .ok_or_else(|| EngineError::not_found(format!("consumption role {}", request.principal_id)))?;
                if role.group_uri != request.group_uri {
                    return Err(EngineError::unauthorized(
                        CREATE_SHARE_OBJECT,
                        format!(
                            "consumption role {} belongs to {}, not {}",
                            role.consumption_role_name, role.group_uri, request.group_uri
                        ),
                    ));
                }
                Ok(role.iam_role_name)
            }
            PrincipalType::RedshiftRole => request
                .principal_role_name
                .clone()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| EngineError::invalid_input("principal_role_name", "a warehouse role is required")),
        }
    }

    /// Resolves a requested item: the one already in the share, or a validated new one.
    fn requested_item(
        &self,
        ctx: &RequestContext,
        share: &ShareObject,
        item_type: ShareableType,
        item_uri: &str,
    ) -> EngineResult<RequestedItem> {
        if let Some(existing) = self.store.find_item(&share.share_uri, item_uri)? {
            debug!("share {}: {item_uri} already requested", share.share_uri);
            return Ok(RequestedItem::Existing(existing));
        }
        let resource = self
            .catalog
            .get_shared_resource(item_type, item_uri)?
            .ok_or_else(|| EngineError::not_found(format!("{item_type} {item_uri}")))?;
        if resource.dataset_uri() != share.dataset_uri {
            return Err(EngineError::invalid_input(
                "item_uri",
                format!("{} does not belong to dataset {}", resource.name(), share.dataset_uri),
            ));
        }
        Ok(RequestedItem::New(ShareObjectItem::pending(
            &share.share_uri,
            item_type,
            item_uri,
            resource.name(),
            &ctx.username,
        )))
    }

    /// Adds an item to the share, moving a reviewed share back to Draft.
    pub async fn add_shared_item(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        item_type: ShareableType,
        item_uri: &str,
    ) -> EngineResult<ShareObjectItem> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_requester(ctx, &share, ADD_ITEM)?;
        let mut share_sm = ShareObjectSM::new(share.status);
        let next = share_sm.run_transition(ShareObjectAction::AddItem)?;
        let item = match self.requested_item(ctx, &share, item_type, item_uri)? {
            RequestedItem::Existing(item) => {
                share_sm.update_state(&self.store, share_uri, next)?;
                item
            }
            RequestedItem::New(item) => {
                let share_status = (next != share.status).then_some(next);
                self.store.insert_item_with_share_status(&item, share_status)?;
                info!("share {share_uri}: added {item_type} {}", item.item_name);
                item
            }
        };
        if share.status != ShareObjectStatus::Draft {
            self.notify(
                NotificationKind::ShareItemRequest,
                &share,
                &dataset,
                format!("{} requested access to {}", ctx.username, item.item_name),
            );
        }
        Ok(item)
    }

    /// Removes an item not holding a grant.
    pub async fn remove_shared_item(&self, ctx: &RequestContext, share_item_uri: &str) -> EngineResult<()> {
        let item = self
            .store
            .get_item(share_item_uri)?
            .ok_or_else(|| EngineError::not_found(format!("share item {share_item_uri}")))?;
        let share = self.store.require_share(&item.share_uri)?;
        Self::require_requester(ctx, &share, REMOVE_ITEM)?;
        ShareItemSM::new(item.status).run_transition(ShareItemAction::RemoveItem)?;
        self.store.delete_item(share_item_uri)?;
        info!("share {}: removed {}", share.share_uri, item.item_name);
        Ok(())
    }

    /// Submits the share for review. Auto-approved when the dataset allows it.
    pub async fn submit_share_object(&self, ctx: &RequestContext, share_uri: &str) -> EngineResult<ShareObject> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_requester(ctx, &share, SUBMIT_SHARE_OBJECT)?;
        self.require_principal(&share, SUBMIT_SHARE_OBJECT).await?;

        let pending = ItemFilter::any().with_status(ShareItemStatus::PendingApproval);
        if !self.store.has_items(share_uri, &pending)? {
            return Err(EngineError::ShareItemsFound {
                action: SUBMIT_SHARE_OBJECT.to_string(),
                message: "The request is empty of pending items. Add items to share request.".to_string(),
            });
        }
        validate_expiration_period(&dataset, share.share_expiration_period, share.non_expirable)?;

        apply_share_action(&self.store, &share, ShareObjectAction::Submit)?;
        let share = self.store.require_share(share_uri)?;
        self.notify(
            NotificationKind::ShareObjectSubmitted,
            &share,
            &dataset,
            format!("{} submitted a share request for {}", ctx.username, dataset.label),
        );

        if dataset.auto_approval_enabled {
            info!("share {share_uri}: dataset {} approves shares automatically", dataset.label);
            return self.approve(ctx, share, &dataset).await;
        }
        Ok(share)
    }

    /// Approves the pending items and enqueues the approve run.
    pub async fn approve_share_object(&self, ctx: &RequestContext, share_uri: &str) -> EngineResult<ShareObject> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_approver(ctx, &dataset, APPROVE_SHARE_OBJECT)?;
        self.approve(ctx, share, &dataset).await
    }

    async fn approve(&self, ctx: &RequestContext, share: ShareObject, dataset: &Dataset) -> EngineResult<ShareObject> {
        self.require_principal(&share, APPROVE_SHARE_OBJECT).await?;
        if dataset.enable_expiration && share.requested_expiry_date.is_some_and(|d| d < Utc::now()) {
            return Err(EngineError::invalid_input(
                "requested_expiry_date",
                "Cannot approve share since it is past the requested expiration date. \
                 Please reject this share and submit a new share request",
            ));
        }

        apply_share_action(&self.store, &share, ShareObjectAction::Approve)?;
        let mut share = self.store.require_share(&share.share_uri)?;
        share.reject_purpose = None;
        // Later approvals of added items keep the expiry set by the first one.
        if share.submitted_for_extension || share.expiry_date.is_none() {
            share.expiry_date = share.requested_expiry_date;
        }
        share.requested_expiry_date = None;
        share.submitted_for_extension = false;
        self.store.update_share(&share)?;

        self.notify(
            NotificationKind::Approved,
            &share,
            dataset,
            format!("{} approved the share request for {}", ctx.username, dataset.label),
        );
        self.queue
            .enqueue(ShareTask::Approve {
                share_uri: share.share_uri.clone(),
            })
            .await?;
        Ok(share)
    }

    /// Rejects a submitted share, or a submitted extension.
    pub async fn reject_share_object(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        reject_purpose: Option<String>,
    ) -> EngineResult<ShareObject> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_approver(ctx, &dataset, REJECT_SHARE_OBJECT)?;
        let extension = share.submitted_for_extension;
        let action = if extension {
            ShareObjectAction::ExtensionReject
        } else {
            ShareObjectAction::Reject
        };
        apply_share_action(&self.store, &share, action)?;

        let mut share = self.store.require_share(share_uri)?;
        share.reject_purpose = reject_purpose;
        share.submitted_for_extension = false;
        share.requested_expiry_date = None;
        share.non_expirable = share.non_expirable && share.expiry_date.is_none();
        self.store.update_share(&share)?;

        let (kind, what) = if extension {
            (NotificationKind::ExtensionRejected, "share extension request")
        } else {
            (NotificationKind::Rejected, "share request")
        };
        self.notify(
            kind,
            &share,
            &dataset,
            format!("{} rejected the {what} for {}", ctx.username, dataset.label),
        );
        Ok(share)
    }

    /// Moves the given shared items to Revoke_Approved and enqueues the revoke run.
    pub async fn revoke_items_share_object(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        share_item_uris: &[String],
    ) -> EngineResult<ShareObject> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_participant(ctx, &share, &dataset, REVOKE_ITEMS)?;
        let items = self.select_items(share_uri, share_item_uris, "share_item_uris")?;

        approve_item_revokes(&self.store, &share, &items)?;
        info!("share {share_uri}: {} items approved for revoke by {}", items.len(), ctx.username);

        self.queue
            .enqueue(ShareTask::Revoke {
                share_uri: share_uri.to_string(),
            })
            .await?;
        Ok(self.store.require_share(share_uri)?)
    }

    // ── Extensions ──────────────────────────────────────────────

    /// Requests a new expiry for a processed share.
    pub async fn submit_share_extension(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        expiration_period: Option<u32>,
        non_expirable: bool,
        extension_reason: Option<String>,
    ) -> EngineResult<ShareObject> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_requester(ctx, &share, SUBMIT_EXTENSION)?;
        if !dataset.enable_expiration {
            return Err(EngineError::invalid_input(
                "share_expiration_period",
                "Share expiration cannot be extended as the dataset doesn't have expiration enabled",
            ));
        }
        if !non_expirable && expiration_period.is_none() {
            return Err(EngineError::invalid_input(
                "share_expiration_period",
                "period not provided. Either make your share non-expiring or provide a expiration period",
            ));
        }
        let requested = requested_expiry(&dataset, expiration_period, non_expirable, Utc::now())?;

        apply_share_action(&self.store, &share, ShareObjectAction::Extension)?;
        let mut share = self.store.require_share(share_uri)?;
        if non_expirable {
            share.non_expirable = true;
            share.requested_expiry_date = None;
            share.share_expiration_period = None;
        } else {
            share.requested_expiry_date = requested;
            share.share_expiration_period = expiration_period;
        }
        share.extension_reason = extension_reason;
        share.submitted_for_extension = true;
        self.store.update_share(&share)?;
        self.notify(
            NotificationKind::ExtensionSubmitted,
            &share,
            &dataset,
            format!("{} requested an extension of the share of {}", ctx.username, dataset.label),
        );

        if dataset.auto_approval_enabled {
            return self.approve_extension(ctx, share, &dataset).await;
        }
        Ok(share)
    }

    pub async fn approve_share_object_extension(&self, ctx: &RequestContext, share_uri: &str) -> EngineResult<ShareObject> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_approver(ctx, &dataset, APPROVE_EXTENSION)?;
        self.approve_extension(ctx, share, &dataset).await
    }

    async fn approve_extension(&self, ctx: &RequestContext, share: ShareObject, dataset: &Dataset) -> EngineResult<ShareObject> {
        self.require_principal(&share, APPROVE_EXTENSION).await?;
        let now = Utc::now();
        if dataset.enable_expiration && share.requested_expiry_date.is_some_and(|d| d < now) {
            return Err(EngineError::invalid_input(
                "requested_expiry_date",
                "Cannot approve share extension since it is past the requested expiration date. \
                 Please reject this share and submit a new share request",
            ));
        }
        apply_share_action(&self.store, &share, ShareObjectAction::ExtensionApprove)?;

        let mut share = self.store.require_share(&share.share_uri)?;
        share.reject_purpose = None;
        share.expiry_date = share.requested_expiry_date;
        if share.requested_expiry_date.is_some() {
            share.non_expirable = false;
        }
        share.requested_expiry_date = None;
        share.submitted_for_extension = false;
        share.last_extension_date = Some(now);
        self.store.update_share(&share)?;
        self.notify(
            NotificationKind::Extended,
            &share,
            dataset,
            format!("{} approved the share extension for {}", ctx.username, dataset.label),
        );
        Ok(share)
    }

    pub async fn cancel_share_object_extension(&self, ctx: &RequestContext, share_uri: &str) -> EngineResult<()> {
        let (share, _) = self.load(share_uri)?;
        Self::require_requester(ctx, &share, CANCEL_EXTENSION)?;
        apply_share_action(&self.store, &share, ShareObjectAction::CancelExtension)?;

        let mut share = self.store.require_share(share_uri)?;
        share.submitted_for_extension = false;
        share.requested_expiry_date = None;
        share.non_expirable = share.non_expirable && share.expiry_date.is_none();
        share.share_expiration_period = None;
        self.store.update_share(&share)?;
        info!("share {share_uri}: extension cancelled by {}", ctx.username);
        Ok(())
    }

    /// Changes the requested expiry of a share that has not been granted yet.
    pub async fn update_share_expiration_period(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        expiration_period: Option<u32>,
        non_expirable: bool,
    ) -> EngineResult<ShareObject> {
        let (mut share, dataset) = self.load(share_uri)?;
        Self::require_requester(ctx, &share, UPDATE_SHARE)?;
        let editable = [
            ShareObjectStatus::Submitted,
            ShareObjectStatus::SubmittedForExtension,
            ShareObjectStatus::Draft,
        ];
        if !editable.contains(&share.status) {
            return Err(EngineError::invalid_input(
                "status",
                format!("Cannot update share object's expiration as it is {}", share.status),
            ));
        }
        let granted = [
            ShareItemStatus::ShareSucceeded,
            ShareItemStatus::RevokeInProgress,
            ShareItemStatus::ShareInProgress,
            ShareItemStatus::ShareApproved,
            ShareItemStatus::RevokeApproved,
        ];
        if self.store.has_items(share_uri, &ItemFilter::any().with_statuses(&granted))? {
            return Err(EngineError::invalid_input(
                "status",
                "Cannot update share object's expiration while items are being or have been shared",
            ));
        }

        if non_expirable {
            share.non_expirable = true;
            share.expiry_date = None;
            share.requested_expiry_date = None;
            share.share_expiration_period = None;
        } else {
            if !dataset.enable_expiration {
                return Err(EngineError::invalid_input(
                    "share_expiration_period",
                    "Couldn't update share expiration as dataset doesn't have share expiration enabled",
                ));
            }
            share.non_expirable = false;
            share.requested_expiry_date = requested_expiry(&dataset, expiration_period, false, Utc::now())?;
            share.share_expiration_period = expiration_period;
        }
        self.store.update_share(&share)?;
        Ok(share)
    }

    // ── Deletion ────────────────────────────────────────────────

    /// Deletes a share holding no grants. Returns whether the share row was removed.
    pub async fn delete_share_object(&self, ctx: &RequestContext, share_uri: &str) -> EngineResult<bool> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_participant(ctx, &share, &dataset, DELETE_SHARE_OBJECT)?;
        let shared = ItemFilter::any().with_statuses(ShareItemStatus::SHARED);
        if self.store.has_items(share_uri, &shared)? {
            return Err(EngineError::ShareItemsFound {
                action: DELETE_SHARE_OBJECT.to_string(),
                message: "There are shared items in this request. \
                          Revoke access to these items before deleting the request."
                    .to_string(),
            });
        }
        let next = apply_share_action(&self.store, &share, ShareObjectAction::Delete)?;
        if next == ShareObjectStatus::Deleted {
            let removed = self.store.delete_share(share_uri)?;
            info!("share {share_uri}: deleted by {}", ctx.username);
            return Ok(removed);
        }
        Ok(false)
    }

    // ── Health ──────────────────────────────────────────────────

    /// Marks items for verification and enqueues a verify run.
    pub async fn verify_items_share_object(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        share_item_uris: &[String],
    ) -> EngineResult<()> {
        let (share, dataset) = self.load(share_uri)?;
        Self::require_participant(ctx, &share, &dataset, VERIFY_ITEMS)?;
        self.mark_health(share_uri, share_item_uris, ShareItemHealthStatus::PendingVerify)?;
        self.queue
            .enqueue(ShareTask::Verify {
                share_uri: share_uri.to_string(),
            })
            .await
    }

    /// Marks items for re-granting and enqueues a reapply run. Approvers only.
    pub async fn reapply_items_share_object(
        &self,
        ctx: &RequestContext,
        share_uri: &str,
        share_item_uris: &[String],
    ) -> EngineResult<()> {
        let (_, dataset) = self.load(share_uri)?;
        Self::require_approver(ctx, &dataset, REAPPLY_ITEMS)?;
        self.mark_health(share_uri, share_item_uris, ShareItemHealthStatus::PendingReApply)?;
        self.queue
            .enqueue(ShareTask::Reapply {
                share_uri: share_uri.to_string(),
            })
            .await
    }

    fn mark_health(&self, share_uri: &str, share_item_uris: &[String], health: ShareItemHealthStatus) -> EngineResult<()> {
        for item in self.select_items(share_uri, share_item_uris, "share_item_uris")? {
            if item.status != ShareItemStatus::ShareSucceeded {
                return Err(EngineError::invalid_input(
                    "share_item_uris",
                    format!("{} is {}, only shared items have a health status", item.item_name, item.status),
                ));
            }
        }
        for uri in share_item_uris {
            self.store.update_item_health(uri, Some(health), None, None)?;
        }
        Ok(())
    }

    // ── Purposes and statistics ─────────────────────────────────

    pub fn update_share_request_purpose(&self, ctx: &RequestContext, share_uri: &str, purpose: Option<String>) -> EngineResult<()> {
        let mut share = self.store.require_share(share_uri)?;
        Self::require_requester(ctx, &share, UPDATE_SHARE)?;
        share.request_purpose = purpose;
        self.store.update_share(&share)?;
        Ok(())
    }

    pub fn update_share_reject_purpose(&self, ctx: &RequestContext, share_uri: &str, purpose: Option<String>) -> EngineResult<()> {
        let (mut share, dataset) = self.load(share_uri)?;
        Self::require_approver(ctx, &dataset, UPDATE_SHARE)?;
        share.reject_purpose = purpose;
        self.store.update_share(&share)?;
        Ok(())
    }

    pub fn update_share_extension_purpose(&self, ctx: &RequestContext, share_uri: &str, reason: Option<String>) -> EngineResult<()> {
        let mut share = self.store.require_share(share_uri)?;
        Self::require_requester(ctx, &share, UPDATE_SHARE)?;
        share.extension_reason = reason;
        self.store.update_share(&share)?;
        Ok(())
    }

    pub fn resolve_share_object_statistics(&self, share_uri: &str) -> EngineResult<ShareStatistics> {
        Ok(self.store.statistics(share_uri)?)
    }
}
