use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::preview::PreviewService;

/// Periodically deletes expired preview links until `shutdown`
/// flips to true.
pub fn spawn(
    previews: Arc<PreviewService>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = previews.sweep_expired().await {
                        tracing::warn!(error = %e, "preview link sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("preview link sweeper stopped");
                        break;
                    }
                }
            }
        }
    })
}
