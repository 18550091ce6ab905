use super::TaskReport;
use crate::error::EngineResult;
use crate::sharing_service::SharingService;
use crate::state_machine::approve_item_revokes;
use chrono::{DateTime, Utc};
use shareflow_storage::ItemFilter;
use shareflow_types::{ShareItemStatus, ShareObject};
use tracing::{debug, info};

/// Revokes the shared items of every processed, expirable share whose expiry is before `now`.
pub async fn revoke_expired_shares(service: &SharingService, now: DateTime<Utc>) -> EngineResult<TaskReport> {
    let ctx = service.context();
    let shares = ctx.store.list_expired_shares(now)?;
    info!("{} shares expired before {now}", shares.len());

    let mut report = TaskReport::default();
    for share in &shares {
        match expire(service, share) {
            Ok(0) => debug!("share {}: expired with nothing to revoke", share.share_uri),
            Ok(count) => {
                info!("share {}: revoking {count} expired items", share.share_uri);
                report.record(&share.share_uri, service.revoke_share(&share.share_uri).await);
            }
            Err(e) => report.fail(&share.share_uri, e),
        }
    }
    report.notify_admins(ctx.notifier.as_ref(), "Share expiration task");
    Ok(report)
}

/// Approves the revoke of every revokable item. Returns the number of items moved.
fn expire(service: &SharingService, share: &ShareObject) -> EngineResult<usize> {
    let ctx = service.context();
    let revokable = ItemFilter::any().with_statuses(ShareItemStatus::REVOKABLE);
    let items = ctx.store.list_items(&share.share_uri, &revokable)?;
    if items.is_empty() {
        return Ok(0);
    }
    approve_item_revokes(&ctx.store, share, &items)?;
    Ok(items.len())
}
