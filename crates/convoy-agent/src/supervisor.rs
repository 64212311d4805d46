//! Restart-on-failure supervision for the agent's long-lived workers.

use convoy_core::RestartPolicy;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AgentError;

/// Aborts the wrapped task when dropped, so aborting a supervisor also stops
/// its current worker.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the worker built by `factory`, restarting it when it returns an error
/// or panics.
///
/// The n-th restart waits `n * policy.backoff`. A worker returning `Ok` is
/// not restarted; after `policy.max_restarts` restarts the worker is given up.
pub async fn supervise<F, Fut>(name: &'static str, policy: RestartPolicy, mut factory: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
{
    let mut restarts = 0u32;
    loop {
        let mut worker = AbortOnDrop(tokio::spawn(factory()));
        match (&mut worker.0).await {
            Ok(Ok(())) => {
                info!(worker = name, "Worker finished");
                return;
            }
            Ok(Err(e)) => error!(worker = name, error = %e, "Worker failed"),
            Err(e) if e.is_cancelled() => return,
            Err(e) => error!(worker = name, error = %e, "Worker panicked"),
        }

        if restarts >= policy.max_restarts {
            error!(worker = name, restarts, "Restart budget exhausted, giving up on worker");
            return;
        }
        restarts += 1;
        let delay = policy.backoff * restarts;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(worker = name, restarts, delay_ms, "Restarting worker");
        tokio::time::sleep(delay).await;
    }
}

/// Spawn [`supervise`] on its own task.
pub fn spawn_supervised<F, Fut>(name: &'static str, policy: RestartPolicy, factory: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
{
    tokio::spawn(supervise(name, policy, factory))
}
