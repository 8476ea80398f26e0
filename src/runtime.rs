//! Run coordination: both long-running loops under one cancellation scope

use crate::ebpf::{consume_events, ConsumerStats, EventSource};
use crate::tc::ReconcileStats;
use crate::Result;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub consumer: ConsumerStats,
    pub reconcile: ReconcileStats,
}

/// Run the consumption loop over `events` and the reconciliation loop built
/// by `reconcile` until `shutdown` fires or the reconciliation loop fails.
///
/// A failing task cancels the shared scope, so the other one stops too.
/// Both tasks are always awaited; the first error is returned.
pub async fn coordinate<S, F, Fut>(
    events: S,
    reconcile: F,
    shutdown: CancellationToken,
) -> Result<RunReport>
where
    S: EventSource + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<ReconcileStats>> + Send + 'static,
{
    let scope = shutdown.child_token();

    let consumer = tokio::spawn(consume_events(events, scope.clone()));
    let reconciler = {
        let task = reconcile(scope.clone());
        let scope = scope.clone();
        tokio::spawn(async move {
            let result = task.await;
            if let Err(e) = &result {
                error!("Filter reconciliation stopped: {}", e);
                scope.cancel();
            }
            result
        })
    };

    scope.cancelled().await;
    info!("Shutting down...");

    let consumer = consumer.await;
    let reconciler = reconciler.await;

    let reconcile = reconciler??;
    let consumer = consumer?;
    Ok(RunReport {
        consumer,
        reconcile,
    })
}

/// Cancel `token` on SIGINT or SIGTERM.
#[cfg(unix)]
pub fn watch_signals(token: CancellationToken) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    }))
}
