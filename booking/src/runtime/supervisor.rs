use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Owns the background workers (relay, finalizers).
///
/// Workers get a `watch::Receiver<bool>` and must exit once it reads `true`.
/// [`Supervisor::shutdown`] flips it, waits up to the grace period, then
/// aborts whatever is still running.
pub struct Supervisor {
    tasks: JoinSet<&'static str>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown_tx,
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: &'static str, worker: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = worker(self.shutdown_tx.subscribe());
        self.tasks.spawn(async move {
            fut.await;
            name
        });
        info!(component = "supervisor", worker = name, "worker spawned");
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals every worker and waits for them. Returns how many had to be
    /// aborted after `grace` ran out.
    pub async fn shutdown(mut self, grace: Duration) -> usize {
        // Receivers may all be gone already; nothing to signal then.
        let _ = self.shutdown_tx.send(true);

        let drained = tokio::time::timeout(grace, async {
            while let Some(res) = self.tasks.join_next().await {
                match res {
                    Ok(name) => info!(component = "supervisor", worker = name, "worker stopped"),
                    Err(e) => error!(component = "supervisor", error = %e, "worker panicked"),
                }
            }
        })
        .await;

        if drained.is_ok() {
            return 0;
        }

        let stuck = self.tasks.len();
        warn!(
            component = "supervisor",
            stuck,
            grace_ms = grace.as_millis() as u64,
            "grace period elapsed; aborting workers"
        );
        self.tasks.shutdown().await;
        stuck
    }
}
