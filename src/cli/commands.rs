use super::startup_error_report;
use crate::config::Config;
use crate::ebpf::loader::AyaProbeLoader;
use crate::ebpf::{attach_probes, ReadyPipeline};
use crate::runtime::{coordinate, watch_signals};
use crate::tc::reconcile::run_filter_reconciliation;
use crate::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Attach the probes, then consume events and reconcile the tc filter
/// until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signals = watch_signals(shutdown.clone())?;

    let mut loader = AyaProbeLoader::new(&config.pin_dir);
    let ReadyPipeline {
        attachments,
        events,
    } = match attach_probes(config.strategy, &mut loader) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            for line in startup_error_report(&e) {
                error!("{}", line);
            }
            return Err(e);
        }
    };

    info!(
        "Probes attached: {}",
        attachments.labels().collect::<Vec<_>>().join(", ")
    );

    let ifindex = config.ifindex;
    let period = config.reconcile_interval;
    let result = coordinate(
        events,
        move |cancel| run_filter_reconciliation(ifindex, period, cancel),
        shutdown.clone(),
    )
    .await;

    drop(attachments);
    drop(loader);
    signals.abort();

    let report = result?;
    info!(
        "Done: {} events decoded, {} lost, {} filter installs ({} failed)",
        report.consumer.decoded,
        report.consumer.lost,
        report.reconcile.attempts,
        report.reconcile.failed
    );
    Ok(())
}
