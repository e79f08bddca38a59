//! 定时刷新任务

use crate::server::{refresh_batch, AppContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// 运行轮询任务：按间隔刷新所有已跟踪的视频
pub async fn run_polling_task(ctx: Arc<AppContext>, interval_secs: u64) {
    let interval = Duration::from_secs(interval_secs);
    let state = Arc::clone(&ctx.state);

    while !state.should_stop() {
        let bvids = state.tracked_ids();

        if bvids.is_empty() {
            info!("[bili] No tracked videos, skipping refresh");
        } else {
            info!("[bili] Starting scheduled refresh of {} videos...", bvids.len());
            match refresh_batch(&ctx, &bvids).await {
                Some(updated) => info!(
                    "[bili] Scheduled refresh updated {}/{} videos",
                    updated.len(),
                    bvids.len()
                ),
                None => info!("[bili] Refresh already running, skipping this round"),
            }
        }

        if state.should_stop() {
            break;
        }

        info!("[bili] Waiting {}s for next refresh...", interval_secs);

        // 分段等待，以便及时响应停止信号
        let check_interval = Duration::from_secs(1);
        let mut remaining = interval;
        while remaining > Duration::ZERO && !state.should_stop() {
            let wait_time = remaining.min(check_interval);
            sleep(wait_time).await;
            remaining = remaining.saturating_sub(wait_time);
        }
    }

    info!("[bili] Polling task stopped");
}
