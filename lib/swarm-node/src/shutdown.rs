//! Shutdown signalling and bounded task joining

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shutdown trigger shared by a role and its loops.
///
/// Late subscribers still observe a trigger that happened before they
/// subscribed.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown. Triggering twice is a no-op.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ShutdownSignal`]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered
    pub async fn wait(&mut self) {
        // an error means the signal was dropped, which also ends the role
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Named background tasks owned by a role
#[derive(Default)]
pub struct TaskSet {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Forget tasks that already finished
    pub fn reap(&mut self) {
        self.tasks.retain(|(_, handle)| !handle.is_finished());
    }

    /// Wait up to `grace` for every task to finish, then abort the rest.
    /// Returns how many tasks had to be aborted.
    pub async fn join(self, grace: Duration) -> usize {
        let aborts: Vec<_> = self
            .tasks
            .iter()
            .map(|(name, handle)| (*name, handle.abort_handle()))
            .collect();
        let handles = self.tasks.into_iter().map(|(_, handle)| handle);

        match tokio::time::timeout(grace, join_all(handles)).await {
            Ok(results) => {
                for ((name, _), result) in aborts.iter().zip(results) {
                    if let Err(e) = result {
                        if e.is_panic() {
                            warn!("Task {} panicked", name);
                        }
                    }
                }
                debug!("All {} tasks finished", aborts.len());
                0
            }
            Err(_) => {
                let mut aborted = 0;
                for (name, abort) in aborts {
                    if !abort.is_finished() {
                        warn!("Task {} did not stop within {:?}; aborting", name, grace);
                        abort.abort();
                        aborted += 1;
                    }
                }
                aborted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();

        let mut listener = signal.subscribe();
        assert!(listener.is_triggered());
        listener.wait().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();
        let waiter = tokio::spawn(async move { listener.wait().await });

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("listener should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_cooperative_tasks() {
        let signal = ShutdownSignal::new();
        let mut tasks = TaskSet::new();
        for _ in 0..3 {
            let mut listener = signal.subscribe();
            tasks.push("waiter", tokio::spawn(async move { listener.wait().await }));
        }
        assert_eq!(tasks.len(), 3);

        signal.trigger();
        assert_eq!(tasks.join(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_aborts_stragglers() {
        let mut tasks = TaskSet::new();
        tasks.push("stuck", tokio::spawn(std::future::pending::<()>()));
        tasks.push("done", tokio::spawn(async {}));

        assert_eq!(tasks.join(Duration::from_secs(5)).await, 1);
    }

    #[tokio::test]
    async fn test_reap_drops_finished_tasks() {
        let mut tasks = TaskSet::new();
        let done = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());
        while !done.is_finished() {
            tokio::task::yield_now().await;
        }
        tasks.push("done", done);
        tasks.push("stuck", stuck);

        tasks.reap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks.join(Duration::from_millis(10)).await, 1);
    }
}
