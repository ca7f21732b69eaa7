use crate::server::ServerId;
use crate::server::lifecycle::WeakController;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Starts the periodic stats refresh for one run of a server.
///
/// The returned task is owned by the process handle and aborted with it. It
/// also ends on its own once the controller is gone or the run it was started
/// for is no longer the supervised one.
pub(crate) fn spawn_stats_monitor(
    controller: WeakController,
    id: ServerId,
    generation: u64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(controller) = controller.upgrade() else {
                break;
            };

            if !controller.refresh_stats(id, generation) {
                tracing::debug!(server_id = %id, generation, "Stats monitor exiting");
                break;
            }
        }
    })
}
