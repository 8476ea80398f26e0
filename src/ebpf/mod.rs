pub mod attach;
pub mod consumer;
pub mod events;
#[cfg(target_os = "linux")]
pub mod loader;
#[cfg(target_os = "linux")]
pub mod maps;
pub mod symbols;

use crate::error::{AttachError, ChannelError, LoadError, ResolutionError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use attach::{attach_probes, AttachmentHandle, AttachmentSet, ReadyPipeline, TargetName};
pub use consumer::{consume_events, ConsumerStats};
pub use events::{DiagnosticEvent, ProbeOrigin};

/// Tracepoint subsystem and event the probes hook
pub const TRACEPOINT_CATEGORY: &str = "netlink";
pub const TRACEPOINT_NAME: &str = "netlink_extack";

/// Entry/exit target used when the tracepoint's kernel function cannot be resolved
pub const DEFAULT_TARGET: &str = "do_trace_netlink_extack";

/// How the probes are attached, fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Classic tracepoint only
    TracepointOnly,
    /// BTF-aware tracepoint attached by program reference
    TracepointUnderBtf,
    /// Tracepoint plus fentry/fexit around its kernel function
    TracepointWithEntryExit,
}

impl ProbeStrategy {
    /// `tp_btf` wins over `without_tracing`.
    pub fn from_flags(without_tracing: bool, tp_btf: bool) -> Self {
        if tp_btf {
            ProbeStrategy::TracepointUnderBtf
        } else if without_tracing {
            ProbeStrategy::TracepointOnly
        } else {
            ProbeStrategy::TracepointWithEntryExit
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ProbeStrategy::TracepointOnly => "tracepoint",
            ProbeStrategy::TracepointUnderBtf => "tp_btf",
            ProbeStrategy::TracepointWithEntryExit => "tracepoint+fentry/fexit",
        }
    }
}

impl std::fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loads the precompiled probe images and hands out live attachments.
///
/// Every `attach_*` call returns an owned handle; dropping it detaches.
pub trait ProbeLoader {
    type Events: EventSource + 'static;

    fn load_btf_tracepoint(&mut self) -> Result<(), LoadError>;

    fn attach_btf_tracepoint(&mut self) -> Result<AttachmentHandle, AttachError>;

    fn load_tracepoint(&mut self) -> Result<(), LoadError>;

    /// Name of the kernel function behind the tracepoint
    fn resolve_target(&mut self) -> Result<String, ResolutionError>;

    /// Load the fentry/fexit image bound to `target`, sharing the tracepoint's output map
    fn load_entry_exit(&mut self, target: &str) -> Result<(), LoadError>;

    fn attach_entry(&mut self) -> Result<AttachmentHandle, AttachError>;

    fn attach_exit(&mut self) -> Result<AttachmentHandle, AttachError>;

    fn attach_tracepoint(
        &mut self,
        category: &str,
        name: &str,
    ) -> Result<AttachmentHandle, AttachError>;

    /// Take the reader side of the output map
    fn events(&mut self) -> Result<Self::Events, ChannelError>;
}

/// One read from the event channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSample {
    /// Record bytes, empty when the read only reports lost samples
    pub data: Vec<u8>,
    /// Records the kernel dropped since the previous read
    pub lost: u64,
}

/// Reader side of the kernel-to-user event channel
#[async_trait]
pub trait EventSource: Send {
    /// Block until a record arrives or the reader is closed.
    ///
    /// Returns `ChannelError::Closed` once the closer has been cancelled.
    async fn read(&mut self) -> Result<RawSample, ChannelError>;

    /// Cancelling the returned token closes the reader.
    fn closer(&self) -> CancellationToken;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_flags() {
        assert_eq!(
            ProbeStrategy::from_flags(false, false),
            ProbeStrategy::TracepointWithEntryExit
        );
        assert_eq!(
            ProbeStrategy::from_flags(true, false),
            ProbeStrategy::TracepointOnly
        );
        assert_eq!(
            ProbeStrategy::from_flags(false, true),
            ProbeStrategy::TracepointUnderBtf
        );
        assert_eq!(
            ProbeStrategy::from_flags(true, true),
            ProbeStrategy::TracepointUnderBtf
        );
    }
}
