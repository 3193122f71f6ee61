use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::auth::TokenAuthority;

/// Starts the periodic purge of expired families and revocation entries.
///
/// Returns `None` when `interval` is zero, which disables sweeping.
pub fn spawn_sweeper(authority: Arc<TokenAuthority>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::warn!("Session sweeper is disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Session sweeper started");
        let mut timer = tokio::time::interval(interval);

        loop {
            timer.tick().await;

            match authority.sweep().await {
                Ok(report) if report.families > 0 || report.revocations > 0 => {
                    tracing::info!(
                        families = report.families,
                        revocations = report.revocations,
                        "Expired session state purged"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Session sweep failed"),
            }
        }
    }))
}
