use super::TaskReport;
use crate::error::EngineResult;
use crate::sharing_service::SharingService;
use shareflow_storage::ItemFilter;
use shareflow_types::ShareItemHealthStatus;
use tracing::{debug, info};

/// Re-grants Unhealthy items of every active share, or of one dataset's shares.
pub async fn reapply_unhealthy_shares(service: &SharingService, dataset_uri: Option<&str>) -> EngineResult<TaskReport> {
    let ctx = service.context();
    let shares = match dataset_uri {
        Some(uri) => ctx.store.list_active_shares_for_dataset(uri)?,
        None => ctx.store.list_active_shares()?,
    };
    info!("checking {} active shares for unhealthy items", shares.len());

    let unhealthy = ItemFilter::any().with_health(ShareItemHealthStatus::Unhealthy);
    let mut report = TaskReport::default();
    for share in &shares {
        let marked = match ctx.store.update_item_health_where(
            &share.share_uri,
            &unhealthy,
            ShareItemHealthStatus::PendingReApply,
            None,
            None,
        ) {
            Ok(marked) => marked,
            Err(e) => {
                report.fail(&share.share_uri, e);
                continue;
            }
        };
        if marked == 0 {
            debug!("share {}: nothing to reapply", share.share_uri);
            continue;
        }
        info!("share {}: reapplying {marked} items", share.share_uri);
        report.record(&share.share_uri, service.reapply_share(&share.share_uri).await);
    }
    report.notify_admins(ctx.notifier.as_ref(), "Share reapplier task");
    Ok(report)
}
