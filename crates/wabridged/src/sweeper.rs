//! Periodic housekeeping: expire terminal sessions and idle update channels.

use std::time::Duration;

use wabridge_services::SessionManager;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub async fn sweep_loop(manager: SessionManager) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        interval.tick().await;

        let (removed, pruned) = manager.sweep();
        if removed > 0 || pruned > 0 {
            tracing::debug!(removed, pruned, "swept expired sessions and idle channels");
        }
    }
}
