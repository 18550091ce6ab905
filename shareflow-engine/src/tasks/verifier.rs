use super::TaskReport;
use crate::error::EngineResult;
use crate::sharing_service::SharingService;
use shareflow_types::ShareItemStatus;
use tracing::info;

/// Verifies the Share_Succeeded items of every active share, whatever their health.
pub async fn verify_all_shares(service: &SharingService) -> EngineResult<TaskReport> {
    let ctx = service.context();
    let shares = ctx.store.list_active_shares()?;
    info!("verifying {} active shares", shares.len());

    let mut report = TaskReport::default();
    for share in &shares {
        let result = service
            .verify_share_with_health(&share.share_uri, Some(ShareItemStatus::ShareSucceeded), None)
            .await;
        report.record(&share.share_uri, result);
    }
    report.notify_admins(ctx.notifier.as_ref(), "Share verifier task");
    info!("verified {} shares, {} healthy", report.processed, report.succeeded);
    Ok(report)
}
