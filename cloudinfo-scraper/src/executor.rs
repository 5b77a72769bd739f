use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Runs a task immediately and then on every interval tick until `shutdown`
/// completes.
///
/// The task's outcome is not observed; it handles its own failures. Ticks are
/// not queued behind a slow task: missed ticks are skipped.
#[derive(Debug, Clone)]
pub struct PeriodicExecutor {
    name: String,
    interval: Duration,
}

impl PeriodicExecutor {
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn execute<S, F, Fut>(&self, shutdown: S, mut task: F)
    where
        S: Future<Output = ()>,
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(executor = %self.name, "periodic executor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            // a long task can still be interrupted by shutdown
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(executor = %self.name, "periodic executor stopped during task");
                    return;
                }
                _ = task() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn runs_immediately_then_on_every_tick() {
        let executor = PeriodicExecutor::new("test", Duration::from_secs(1));
        let count = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let deadline = Duration::from_secs(5);

        let counter = Arc::clone(&count);
        executor
            .execute(tokio::time::sleep(deadline), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert!(started.elapsed() >= deadline);
        assert!(count.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn returns_when_shutdown_fires_during_a_hung_task() {
        let executor = PeriodicExecutor::new("hung", Duration::from_millis(10));
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            executor.execute(tokio::time::sleep(Duration::from_millis(50)), || {
                std::future::pending::<()>()
            }),
        )
        .await;
        assert!(result.is_ok());
    }
}
