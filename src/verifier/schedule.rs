//! Recurring background tasks with explicit start and stop.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info};

/// Handle to a job running on a fixed period.
///
/// The first run happens immediately. Dropping the handle stops the loop after
/// the current run; `shutdown` does the same and also waits for it to exit.
#[derive(Debug)]
pub struct RecurringTask {
    name: &'static str,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RecurringTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = if period.is_zero() {
            Duration::from_secs(1)
        } else {
            period
        };
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        debug!(task = name, "running recurring task");
                        job().await;
                    }
                }
            }
            debug!(task = name, "recurring task stopped");
        });

        info!(task = name, period_seconds = period.as_secs(), "recurring task started");

        Self { name, stop, handle }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// # Errors
    /// Returns an error if the task panicked.
    pub async fn shutdown(self) -> Result<()> {
        // Err means the task already ended.
        let _ = self.stop.send(());
        self.handle
            .await
            .with_context(|| format!("recurring task {} panicked", self.name))?;
        info!(task = self.name, "recurring task shut down");
        Ok(())
    }
}
