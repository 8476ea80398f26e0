//! Periodic re-installation of the classifier filter
//!
//! Every tick re-sends the same create-or-replace request. Each one makes
//! the kernel run its filter validation again, so a failing configuration
//! keeps producing extended-ack messages for the probes to observe.

use super::{ControlClient, FilterDescriptor};
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub attempts: u64,
    pub installed: u64,
    pub failed: u64,
}

/// Re-install `filter` every `period` until `cancel` fires.
///
/// The first attempt happens one period after start. Individual failures
/// are logged and never end the loop. A request still unanswered after one
/// period counts as failed, and cancellation interrupts a pending request.
pub async fn reconcile_filter<C: ControlClient>(
    client: &mut C,
    filter: &FilterDescriptor,
    period: Duration,
    cancel: CancellationToken,
) -> ReconcileStats {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Keep setting tc filter...");

    let mut stats = ReconcileStats::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                stats.attempts += 1;
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = timeout(period, client.replace_filter(filter)) => outcome,
                };
                match outcome {
                    Ok(Ok(())) => {
                        stats.installed += 1;
                        info!("set tc filter");
                    }
                    Ok(Err(e)) => {
                        stats.failed += 1;
                        warn!("set tc filter: {}", e);
                    }
                    Err(_) => {
                        stats.failed += 1;
                        warn!("set tc filter: no reply within {:?}", period);
                    }
                }
            }
        }
    }

    info!(
        "Stopped setting tc filter after {} attempts ({} failed)",
        stats.attempts, stats.failed
    );
    stats
}

/// Load the placeholder program, connect to rtnetlink and reconcile the
/// ingress filter on `ifindex` until cancelled.
///
/// The filter stays installed when this returns.
#[cfg(target_os = "linux")]
pub async fn run_filter_reconciliation(
    ifindex: u32,
    period: Duration,
    cancel: CancellationToken,
) -> crate::Result<ReconcileStats> {
    use super::netlink::NetlinkClient;
    use super::program::PlaceholderProgram;

    let program = PlaceholderProgram::load()?;
    let mut client = NetlinkClient::open()?;
    let filter = FilterDescriptor::ingress_bpf(ifindex, program.raw_fd()? as u32);

    let stats = reconcile_filter(&mut client, &filter, period, cancel).await;
    drop(program);
    Ok(stats)
}
