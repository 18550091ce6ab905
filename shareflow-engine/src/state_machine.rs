//! Transition tables for share objects and share items.
//!
//! A transition maps an action onto edges `(target, sources)` plus a set of
//! states the action leaves untouched. A state that is already a target of
//! the action is returned as-is, so replaying an action is harmless.

use crate::error::{EngineError, EngineResult};
use shareflow_storage::ShareStore;
use shareflow_types::{
    ShareItemAction, ShareItemStatus, ShareObject, ShareObjectAction, ShareObjectItem, ShareObjectStatus,
    ShareableType,
};
use std::fmt;
use tracing::debug;

/// The edges of one action.
#[derive(Clone, Copy, Debug)]
pub struct Transition<S: 'static> {
    /// `(target, sources)` pairs.
    pub edges: &'static [(S, &'static [S])],
    /// States the action accepts and keeps.
    pub keeps: &'static [S],
}

impl<S: Copy + Eq> Transition<S> {
    pub fn targets(&self) -> impl Iterator<Item = S> + '_ {
        self.edges.iter().map(|(target, _)| *target)
    }

    pub fn accepts(&self, state: S) -> bool {
        self.keeps.contains(&state)
            || self
                .edges
                .iter()
                .any(|(target, sources)| *target == state || sources.contains(&state))
    }
}

/// A status enum driven by a transition table.
pub trait Lifecycle: Copy + Eq + fmt::Display + 'static {
    type Action: Copy + fmt::Display;

    const ENTITY: &'static str;

    fn transition(action: Self::Action) -> Transition<Self>;
}

/// Next state of `state` under `action`.
pub fn run_transition<S: Lifecycle>(state: S, action: S::Action) -> EngineResult<S> {
    let transition = S::transition(action);
    if transition.keeps.contains(&state) || transition.targets().any(|t| t == state) {
        return Ok(state);
    }
    transition
        .edges
        .iter()
        .find(|(_, sources)| sources.contains(&state))
        .map(|(target, _)| *target)
        .ok_or_else(|| EngineError::InvalidStateTransition {
            entity: S::ENTITY,
            state: state.to_string(),
            action: action.to_string(),
        })
}

// ── Share objects ───────────────────────────────────────────────

mod object_table {
    use shareflow_types::ShareObjectStatus::*;
    use shareflow_types::ShareObjectStatus;

    type Edges = &'static [(ShareObjectStatus, &'static [ShareObjectStatus])];

    pub const SUBMIT: Edges = &[(Submitted, &[Draft, Rejected])];
    pub const APPROVE: Edges = &[(Approved, &[Submitted])];
    pub const REJECT: Edges = &[(Rejected, &[Submitted])];
    pub const REVOKE_ITEMS: Edges = &[(Revoked, &[Draft, Submitted, Rejected, Processed])];
    pub const START: Edges = &[(ShareInProgress, &[Approved]), (RevokeInProgress, &[Revoked])];
    pub const FINISH: Edges = &[(Processed, &[ShareInProgress, RevokeInProgress])];
    pub const FINISH_PENDING: Edges = &[(Draft, &[RevokeInProgress])];
    pub const DELETE: Edges = &[(Deleted, &[Rejected, Draft, Submitted, Processed])];
    pub const ADD_ITEM: Edges = &[(Draft, &[Submitted, Rejected, Processed])];
    pub const EXTENSION: Edges = &[(SubmittedForExtension, &[Processed])];
    pub const EXTENSION_CLOSE: Edges = &[(Processed, &[SubmittedForExtension])];
}

impl Lifecycle for ShareObjectStatus {
    type Action = ShareObjectAction;

    const ENTITY: &'static str = "share object";

    fn transition(action: ShareObjectAction) -> Transition<Self> {
        use object_table::*;
        let edges = match action {
            ShareObjectAction::Submit => SUBMIT,
            ShareObjectAction::Approve => APPROVE,
            ShareObjectAction::Reject => REJECT,
            ShareObjectAction::RevokeItems => REVOKE_ITEMS,
            ShareObjectAction::Start => START,
            ShareObjectAction::Finish => FINISH,
            ShareObjectAction::FinishPending => FINISH_PENDING,
            ShareObjectAction::Delete => DELETE,
            ShareObjectAction::AddItem => ADD_ITEM,
            ShareObjectAction::Extension => EXTENSION,
            ShareObjectAction::ExtensionApprove
            | ShareObjectAction::ExtensionReject
            | ShareObjectAction::CancelExtension => EXTENSION_CLOSE,
        };
        Transition { edges, keeps: &[] }
    }
}

// ── Share items ─────────────────────────────────────────────────

mod item_table {
    use shareflow_types::ShareItemStatus::*;
    use shareflow_types::ShareItemStatus;

    type Edges = &'static [(ShareItemStatus, &'static [ShareItemStatus])];
    type States = &'static [ShareItemStatus];

    /// States not owned by a running orchestration.
    pub const SETTLED: States = &[
        PendingApproval,
        ShareRejected,
        ShareFailed,
        ShareSucceeded,
        RevokeApproved,
        RevokeFailed,
        RevokeSucceeded,
    ];

    /// Settled states a review decision does not touch.
    pub const REVIEWED: States = &[
        ShareRejected,
        ShareFailed,
        ShareSucceeded,
        RevokeApproved,
        RevokeFailed,
        RevokeSucceeded,
    ];

    pub const NONE: Edges = &[];
    pub const NO_STATES: States = &[];
    pub const ADD_ITEM: Edges = &[(PendingApproval, &[Deleted])];
    pub const REMOVE: Edges = &[(Deleted, &[PendingApproval, ShareRejected, ShareFailed, RevokeSucceeded])];
    pub const APPROVE: Edges = &[(ShareApproved, &[PendingApproval])];
    pub const REJECT: Edges = &[(ShareRejected, &[PendingApproval])];
    pub const REVOKE_ITEMS: Edges = &[(RevokeApproved, &[ShareSucceeded, RevokeFailed])];
    pub const START: Edges = &[(ShareInProgress, &[ShareApproved]), (RevokeInProgress, &[RevokeApproved])];
    pub const SUCCESS: Edges = &[(ShareSucceeded, &[ShareInProgress]), (RevokeSucceeded, &[RevokeInProgress])];
    pub const FAILURE: Edges = &[
        (ShareFailed, &[ShareInProgress, ShareApproved]),
        (RevokeFailed, &[RevokeInProgress, RevokeApproved]),
    ];
}

impl Lifecycle for ShareItemStatus {
    type Action = ShareItemAction;

    const ENTITY: &'static str = "share item";

    fn transition(action: ShareItemAction) -> Transition<Self> {
        use item_table::*;
        let (edges, keeps) = match action {
            ShareItemAction::AddItem => (ADD_ITEM, NO_STATES),
            ShareItemAction::RemoveItem | ShareItemAction::Delete => (REMOVE, NO_STATES),
            ShareItemAction::Submit
            | ShareItemAction::Extension
            | ShareItemAction::ExtensionApprove
            | ShareItemAction::ExtensionReject
            | ShareItemAction::CancelExtension => (NONE, SETTLED),
            ShareItemAction::Approve => (APPROVE, REVIEWED),
            ShareItemAction::Reject => (REJECT, REVIEWED),
            ShareItemAction::RevokeItems => (REVOKE_ITEMS, NO_STATES),
            ShareItemAction::Start => (START, NO_STATES),
            ShareItemAction::Success => (SUCCESS, NO_STATES),
            ShareItemAction::Failure => (FAILURE, NO_STATES),
        };
        Transition { edges, keeps }
    }
}

// ── Persisting machines ─────────────────────────────────────────

/// Share object state machine bound to its current state.
#[derive(Clone, Copy, Debug)]
pub struct ShareObjectSM {
    state: ShareObjectStatus,
}

impl ShareObjectSM {
    pub fn new(state: ShareObjectStatus) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ShareObjectStatus {
        self.state
    }

    pub fn run_transition(&self, action: ShareObjectAction) -> EngineResult<ShareObjectStatus> {
        run_transition(self.state, action)
    }

    pub fn update_state(&mut self, store: &ShareStore, share_uri: &str, new_state: ShareObjectStatus) -> EngineResult<()> {
        if new_state != self.state {
            store.update_share_status(share_uri, new_state)?;
            debug!("share {share_uri}: {} -> {new_state}", self.state);
        }
        self.state = new_state;
        Ok(())
    }
}

/// Share item state machine for every item of a share in one state.
#[derive(Clone, Copy, Debug)]
pub struct ShareItemSM {
    state: ShareItemStatus,
}

impl ShareItemSM {
    pub fn new(state: ShareItemStatus) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ShareItemStatus {
        self.state
    }

    pub fn run_transition(&self, action: ShareItemAction) -> EngineResult<ShareItemStatus> {
        run_transition(self.state, action)
    }

    /// Moves every item of the share in the current state. Returns the number moved.
    pub fn update_state(&mut self, store: &ShareStore, share_uri: &str, new_state: ShareItemStatus) -> EngineResult<usize> {
        self.update_state_for_type(store, share_uri, None, new_state)
    }

    /// Moves the share's items in the current state, restricted to one item type when given.
    pub fn update_state_for_type(
        &mut self,
        store: &ShareStore,
        share_uri: &str,
        item_type: Option<ShareableType>,
        new_state: ShareItemStatus,
    ) -> EngineResult<usize> {
        let moved = store.update_item_status_batch(share_uri, self.state, new_state, item_type)?;
        self.state = new_state;
        Ok(moved)
    }

    pub fn update_state_single_item(
        &mut self,
        store: &ShareStore,
        share_item_uri: &str,
        new_state: ShareItemStatus,
    ) -> EngineResult<()> {
        if new_state != self.state {
            store.update_item_status(share_item_uri, new_state)?;
        }
        self.state = new_state;
        Ok(())
    }
}

/// Item moves implied by `action` for each distinct item state of a share.
///
/// Fails on the first item state the action does not accept, before anything is persisted.
pub fn plan_item_moves(
    item_states: &[ShareItemStatus],
    action: ShareItemAction,
) -> EngineResult<Vec<(ShareItemStatus, ShareItemStatus)>> {
    item_states
        .iter()
        .map(|state| run_transition(*state, action).map(|next| (*state, next)))
        .collect()
}

/// Applies an object action to a share and fans it out to every item state it holds.
///
/// The object and item moves are committed together.
pub fn apply_share_action(
    store: &ShareStore,
    share: &ShareObject,
    action: ShareObjectAction,
) -> EngineResult<ShareObjectStatus> {
    let next = run_transition(share.status, action)?;
    let moves = match action.item_action() {
        Some(item_action) => plan_item_moves(&store.item_states(&share.share_uri)?, item_action)?,
        None => Vec::new(),
    };
    store.apply_status_changes(&share.share_uri, Some(next), &moves)?;
    debug!("share {}: {action} {} -> {next}", share.share_uri, share.status);
    Ok(next)
}

/// Moves the given items to Revoke_Approved and the share to Revoked.
///
/// Every transition is checked first, then all of them are persisted in one transaction.
pub fn approve_item_revokes(
    store: &ShareStore,
    share: &ShareObject,
    items: &[ShareObjectItem],
) -> EngineResult<ShareObjectStatus> {
    let next = run_transition(share.status, ShareObjectAction::RevokeItems)?;
    let moves = items
        .iter()
        .map(|item| {
            run_transition(item.status, ShareItemAction::RevokeItems)
                .map(|state| (item.share_item_uri.clone(), state))
        })
        .collect::<EngineResult<Vec<_>>>()?;
    store.apply_item_status_changes(&share.share_uri, Some(next), &moves)?;
    debug!(
        "share {}: revoke approved for {} items, {} -> {next}",
        share.share_uri,
        moves.len(),
        share.status
    );
    Ok(next)
}
