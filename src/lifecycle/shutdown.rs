//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Broadcasts the shutdown signal to every long-running task and waits for
/// them to finish within a grace period.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    grace: Duration,
}

impl Shutdown {
    pub fn new(grace: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, grace }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger shutdown and wait for `tasks`. Returns false if any task was
    /// still running when the grace period ran out.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        self.trigger();
        let all = join_all(tasks);
        match tokio::time::timeout(self.grace, all).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(grace_secs = self.grace.as_secs(), "Shutdown grace period elapsed");
                false
            }
        }
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Task failed during shutdown");
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_subscribers() {
        let shutdown = Shutdown::new(Duration::from_secs(1));
        let mut rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        assert_eq!(shutdown.receiver_count(), 1);
        assert!(shutdown.drain(vec![task]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let shutdown = Shutdown::new(Duration::from_secs(2));
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!shutdown.drain(vec![stuck]).await);
    }
}
