//! Job progress reporting.
//!
//! Publish and rollback report progress synchronously from inside their
//! transaction. [`JobProgress`] hands each report to a channel; a forwarder
//! task writes it to the job row on its own connection, so progress is
//! visible to pollers before the transaction commits.

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use linework_core::job::next_progress;
use linework_core::store::ProgressSink;
use linework_core::types::DbId;
use linework_db::repositories::ImportJobRepo;

/// The [`ProgressSink`] handed to a running operation.
pub struct JobProgress {
    tx: mpsc::UnboundedSender<u8>,
}

impl ProgressSink for JobProgress {
    fn report(&self, percent: u8) {
        // The forwarder only stops once every sender is gone.
        let _ = self.tx.send(percent);
    }
}

/// Create a sink for `job_id` and spawn its forwarder. Dropping the sink
/// lets the forwarder drain and finish; await the handle to flush.
pub fn start(pool: PgPool, job_id: DbId) -> (JobProgress, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(forward(pool, job_id, rx));
    (JobProgress { tx }, handle)
}

async fn forward(pool: PgPool, job_id: DbId, mut rx: mpsc::UnboundedReceiver<u8>) {
    let mut written: i16 = 0;
    while let Some(mut percent) = rx.recv().await {
        // Coalesce a burst into its latest value.
        while let Ok(next) = rx.try_recv() {
            percent = next;
        }
        let next = next_progress(written, i32::from(percent));
        if next == written {
            continue;
        }
        match ImportJobRepo::update_progress(&pool, job_id, next).await {
            Ok(()) => {
                written = next;
                tracing::debug!(job_id, percent = next, "Import job progress");
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to update job progress");
            }
        }
    }
}
