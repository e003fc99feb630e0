//! Lease sweeper for import jobs.
//!
//! A running job refreshes its heartbeat while it works. If the process
//! dies mid-job the heartbeat stops; once it is older than the lease the
//! sweeper fails the job, which frees the version for a new submission.
//! Publish and rollback are single transactions, so a dead job has either
//! committed everything or nothing.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use linework_db::repositories::ImportJobRepo;

/// Error message recorded on swept jobs.
pub const LEASE_EXPIRED: &str = "lease expired";

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Sweep every quarter lease, but never more often than every 5 seconds.
pub fn sweep_interval(lease: Duration) -> Duration {
    (lease / 4).max(MIN_SWEEP_INTERVAL)
}

/// Run the sweeper loop until `cancel` is triggered.
pub async fn run(pool: PgPool, lease: Duration, cancel: CancellationToken) {
    let every = sweep_interval(lease);
    let lease_secs = i64::try_from(lease.as_secs()).unwrap_or(i64::MAX);

    tracing::info!(
        lease_secs,
        interval_secs = every.as_secs(),
        "Stale job sweeper started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale job sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                match ImportJobRepo::fail_stale(&pool, lease_secs, LEASE_EXPIRED).await {
                    Ok(ids) if ids.is_empty() => {
                        tracing::debug!("Stale job sweeper: nothing expired");
                    }
                    Ok(ids) => {
                        for job_id in &ids {
                            tracing::warn!(job_id, "Import job lease expired, marked failed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stale job sweeper: sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_a_quarter_lease_with_a_floor() {
        assert_eq!(sweep_interval(Duration::from_secs(900)), Duration::from_secs(225));
        assert_eq!(sweep_interval(Duration::from_secs(8)), Duration::from_secs(5));
    }
}
