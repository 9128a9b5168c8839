//! Expiration sweeper: evicts shares whose expiry has passed.

use crate::{errors::ShareError, services::share_service::ShareService};
use serde::Serialize;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SweepReport {
    /// Expired records found.
    pub found: usize,
    /// Metadata keys removed.
    pub evicted: Vec<String>,
    /// Metadata keys whose removal failed; they stay for the next sweep.
    pub failed: Vec<String>,
}

/// Delete every share that expired before `now_ms`.
///
/// Goes through the engine's delete path with the record's known keys, so no
/// session is involved. A failure on one record is logged and the sweep
/// moves on; deletes racing with user deletes resolve to "already gone".
pub async fn sweep(shares: &ShareService, now_ms: i64) -> Result<SweepReport, ShareError> {
    let expired = shares.expired(now_ms).await?;
    let mut report = SweepReport {
        found: expired.len(),
        ..SweepReport::default()
    };
    if !expired.is_empty() {
        info!("Found {} expired shares", expired.len());
    }

    for (key, record) in expired {
        match shares.delete_record(&key, &record.storage_key).await {
            Ok(()) => {
                info!("Share '{}' deleted", key);
                report.evicted.push(key.to_string());
            }
            Err(err) => {
                warn!("could not evict share '{}': {}", key, err);
                report.failed.push(key.to_string());
            }
        }
    }
    Ok(report)
}

/// Run [`sweep`] every `every` on the tokio runtime.
pub fn spawn_periodic(shares: ShareService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp_millis();
            match sweep(&shares, now).await {
                Ok(report) => {
                    if report.found > 0 {
                        info!(
                            "sweep evicted {} of {} expired shares",
                            report.evicted.len(),
                            report.found
                        );
                    }
                }
                Err(err) => warn!("Error during cleanup: {}", err),
            }
        }
    })
}
