use std::{sync::Arc, time::Duration};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::rate_limit::InMemoryRateLimiter;

/// Background task that periodically evicts expired client windows.
///
/// The task runs until [`stop`](Self::stop) is awaited or the handle is dropped.
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns the sweep loop on the current tokio runtime. The first sweep
    /// happens one `interval` after start.
    pub fn start(limiter: Arc<InMemoryRateLimiter>, interval: Duration) -> Self {
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if limiter.is_empty() {
                            continue;
                        }
                        let removed = limiter.sweep();
                        tracing::debug!(
                            removed,
                            remaining = limiter.len(),
                            "rate limiter sweep"
                        );
                    }
                }
            }
        });

        Self {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    tracing::error!(error = %error, "rate limiter sweeper panicked");
                }
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
