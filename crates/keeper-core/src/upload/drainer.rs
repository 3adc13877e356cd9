//! Background upload drainer
//!
//! Drains the queue on startup, then on a fixed interval and whenever the
//! application comes to the foreground.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{CancelToken, UploadQueue};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns the periodic drain task
pub struct Drainer;

impl Drainer {
    /// Start draining `queue` every `every` until the handle is shut down
    pub fn spawn(queue: Arc<UploadQueue>, every: Duration) -> DrainerHandle {
        let every = every.max(MIN_INTERVAL);
        let trigger = Arc::new(Notify::new());
        let cancel = CancelToken::new();

        info!("Starting upload drainer: every {}s", every.as_secs());

        let task = {
            let trigger = trigger.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                        _ = trigger.notified() => {
                            debug!("Foreground drain requested");
                        }
                    }

                    if let Err(e) = queue.drain(&cancel).await {
                        error!("Upload drain failed: {}", e);
                    }
                }

                debug!("Upload drainer stopped");
            })
        };

        DrainerHandle {
            trigger,
            cancel,
            task,
        }
    }
}

/// Handle to a running drainer
pub struct DrainerHandle {
    trigger: Arc<Notify>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl DrainerHandle {
    /// Drain now (application came to the foreground)
    pub fn foreground(&self) {
        self.trigger.notify_one();
    }

    /// Stop the drainer and wait for an upload in progress to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Upload drainer task panicked: {}", e);
        }
    }
}
