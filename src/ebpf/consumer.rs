//! Event consumption loop
//!
//! Drains the event channel in arrival order, decodes each record and logs
//! one classified line per record. Cancellation closes the reader, which is
//! what unblocks a pending read.

use super::{DiagnosticEvent, EventSource};
use crate::error::ChannelError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counters reported when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub decoded: u64,
    pub lost: u64,
    pub read_errors: u64,
}

/// Run until the reader is closed or cancellation is observed.
///
/// Read errors other than closure are logged and the loop keeps reading;
/// closure ends the loop without surfacing an error.
pub async fn consume_events<S: EventSource>(
    mut source: S,
    cancel: CancellationToken,
) -> ConsumerStats {
    let closer = source.closer();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            closer.cancel();
        })
    };

    info!("Listening events...");

    let mut stats = ConsumerStats::default();
    loop {
        let sample = match source.read().await {
            Ok(sample) => sample,
            Err(ChannelError::Closed) => break,
            Err(e) => {
                warn!("{}", e);
                stats.read_errors += 1;
                continue;
            }
        };

        if sample.lost != 0 {
            warn!("Lost {} events", sample.lost);
            stats.lost += sample.lost;
        }

        if !sample.data.is_empty() {
            let event = DiagnosticEvent::decode(&sample.data);
            info!("{}", event);
            stats.decoded += 1;
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    watcher.abort();
    info!(
        "Stopped listening: {} events, {} lost",
        stats.decoded, stats.lost
    );
    stats
}
