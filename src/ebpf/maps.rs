//! Reader over the `EVENTS` ring buffer shared by every probe image

use super::{EventSource, RawSample};
use crate::error::ChannelError;
use async_trait::async_trait;
use aya::maps::{MapData, PerCpuArray, RingBuf};
use std::collections::VecDeque;
use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Event-driven ring buffer reader.
///
/// Records drained from one wakeup are buffered and handed out one per
/// [`EventSource::read`] call, in submission order.
pub struct RingBufSource {
    ring: AsyncFd<RingBuf<MapData>>,
    dropped: Option<PerCpuArray<MapData, u64>>,
    last_dropped: u64,
    pending: VecDeque<Vec<u8>>,
    closer: CancellationToken,
}

impl RingBufSource {
    pub fn new(
        ring: RingBuf<MapData>,
        dropped: Option<PerCpuArray<MapData, u64>>,
    ) -> Result<Self, ChannelError> {
        let ring = AsyncFd::new(ring)
            .map_err(|e| ChannelError::Read(format!("registering ring buffer fd: {}", e)))?;

        let mut source = Self {
            ring,
            dropped,
            last_dropped: 0,
            pending: VecDeque::new(),
            closer: CancellationToken::new(),
        };
        // Drops counted by a previous run on the same pinned map are not ours.
        source.last_dropped = source.dropped_total();
        Ok(source)
    }

    fn dropped_total(&self) -> u64 {
        let Some(map) = &self.dropped else {
            return self.last_dropped;
        };
        match map.get(&0, 0) {
            Ok(values) => values.iter().sum(),
            Err(e) => {
                debug!("Reading DROPPED counter: {}", e);
                self.last_dropped
            }
        }
    }

    /// Samples dropped in the kernel since the last call
    fn take_lost(&mut self) -> u64 {
        let total = self.dropped_total();
        let lost = total.saturating_sub(self.last_dropped);
        self.last_dropped = total;
        lost
    }
}

#[async_trait]
impl EventSource for RingBufSource {
    async fn read(&mut self) -> Result<RawSample, ChannelError> {
        loop {
            if self.closer.is_cancelled() {
                return Err(ChannelError::Closed);
            }

            if let Some(data) = self.pending.pop_front() {
                let lost = self.take_lost();
                return Ok(RawSample { data, lost });
            }

            {
                let mut guard = tokio::select! {
                    _ = self.closer.cancelled() => return Err(ChannelError::Closed),
                    guard = self.ring.readable_mut() => {
                        guard.map_err(|e| ChannelError::Read(e.to_string()))?
                    }
                };

                let ring = guard.get_inner_mut();
                while let Some(item) = ring.next() {
                    self.pending.push_back(item.to_vec());
                }
                guard.clear_ready();
            }

            if self.pending.is_empty() {
                let lost = self.take_lost();
                if lost != 0 {
                    return Ok(RawSample {
                        data: Vec::new(),
                        lost,
                    });
                }
            }
        }
    }

    fn closer(&self) -> CancellationToken {
        self.closer.clone()
    }
}
