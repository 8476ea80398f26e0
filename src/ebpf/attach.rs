//! Probe attachment selection
//!
//! One handler per [`ProbeStrategy`]. Every handler either returns a ready
//! pipeline (live attachments plus the event reader) or fails atomically:
//! attachments already made are released, newest first, before the error
//! is returned.

use super::{
    ProbeLoader, ProbeStrategy, DEFAULT_TARGET, TRACEPOINT_CATEGORY, TRACEPOINT_NAME,
};
use crate::Result;
use tracing::{debug, info, warn};

/// One live kernel attachment. Dropping it detaches.
pub struct AttachmentHandle {
    label: String,
    _link: Box<dyn Send>,
}

impl AttachmentHandle {
    pub fn new(label: impl Into<String>, link: impl Send + 'static) -> Self {
        Self {
            label: label.into(),
            _link: Box::new(link),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for AttachmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Attachments owned as a unit, released in reverse acquisition order
#[derive(Debug, Default)]
pub struct AttachmentSet {
    handles: Vec<AttachmentHandle>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: AttachmentHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(AttachmentHandle::label)
    }
}

impl Drop for AttachmentSet {
    fn drop(&mut self) {
        while let Some(handle) = self.handles.pop() {
            debug!("Detaching {}", handle.label());
            drop(handle);
        }
    }
}

/// Outcome of the best-effort target lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetName {
    Resolved(String),
    Fallback(String),
}

impl TargetName {
    pub fn name(&self) -> &str {
        match self {
            TargetName::Resolved(name) | TargetName::Fallback(name) => name,
        }
    }
}

/// Attachments plus the reader over their shared output map
pub struct ReadyPipeline<E> {
    pub attachments: AttachmentSet,
    pub events: E,
}

/// Attach the probes for `strategy`.
///
/// There is no fallback between strategies: any load failure or required
/// attach failure aborts with everything acquired so far released.
pub fn attach_probes<L: ProbeLoader>(
    strategy: ProbeStrategy,
    loader: &mut L,
) -> Result<ReadyPipeline<L::Events>> {
    info!("Attaching probes using strategy {}", strategy);

    let attachments = match strategy {
        ProbeStrategy::TracepointUnderBtf => attach_btf_tracepoint(loader)?,
        ProbeStrategy::TracepointOnly => attach_tracepoint_only(loader)?,
        ProbeStrategy::TracepointWithEntryExit => attach_with_entry_exit(loader)?,
    };

    let events = loader.events()?;
    Ok(ReadyPipeline {
        attachments,
        events,
    })
}

fn attach_btf_tracepoint<L: ProbeLoader>(loader: &mut L) -> Result<AttachmentSet> {
    let mut attachments = AttachmentSet::new();

    loader.load_btf_tracepoint()?;
    attachments.push(loader.attach_btf_tracepoint()?);
    info!("Attached tp_btf({})", TRACEPOINT_NAME);

    Ok(attachments)
}

fn attach_tracepoint_only<L: ProbeLoader>(loader: &mut L) -> Result<AttachmentSet> {
    let mut attachments = AttachmentSet::new();

    loader.load_tracepoint()?;
    attachments.push(loader.attach_tracepoint(TRACEPOINT_CATEGORY, TRACEPOINT_NAME)?);
    info!("Attached tracepoint({})", TRACEPOINT_NAME);

    Ok(attachments)
}

fn attach_with_entry_exit<L: ProbeLoader>(loader: &mut L) -> Result<AttachmentSet> {
    let mut attachments = AttachmentSet::new();

    loader.load_tracepoint()?;

    let target = resolve_target_name(loader);
    loader.load_entry_exit(target.name())?;

    attachments.push(loader.attach_entry()?);
    info!("Attached fentry({})", target.name());

    attachments.push(loader.attach_exit()?);
    info!("Attached fexit({})", target.name());

    attachments.push(loader.attach_tracepoint(TRACEPOINT_CATEGORY, TRACEPOINT_NAME)?);
    info!("Attached tracepoint({})", TRACEPOINT_NAME);

    Ok(attachments)
}

/// Resolve the tracepoint's kernel function, falling back to [`DEFAULT_TARGET`].
pub fn resolve_target_name<L: ProbeLoader>(loader: &mut L) -> TargetName {
    match loader.resolve_target() {
        Ok(name) => {
            debug!("Resolved entry/exit target: {}", name);
            TargetName::Resolved(name)
        }
        Err(e) => {
            warn!(
                "Failed to get func name: {}. Use {} instead",
                e, DEFAULT_TARGET
            );
            TargetName::Fallback(DEFAULT_TARGET.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebpf::{EventSource, RawSample};
    use crate::error::{AttachError, ChannelError, LoadError, ResolutionError};
    use crate::ExtackError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Released {
        label: String,
        journal: Journal,
    }

    impl Drop for Released {
        fn drop(&mut self) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("release {}", self.label));
        }
    }

    struct NoEvents;

    #[async_trait]
    impl EventSource for NoEvents {
        async fn read(&mut self) -> std::result::Result<RawSample, ChannelError> {
            Err(ChannelError::Closed)
        }

        fn closer(&self) -> CancellationToken {
            CancellationToken::new()
        }
    }

    #[derive(Default)]
    struct FakeLoader {
        journal: Journal,
        resolve_fails: bool,
        tracepoint_rejected: bool,
        tracepoint_load_fails: bool,
        entry_fails: bool,
        exit_fails: bool,
        tracepoint_attach_fails: bool,
    }

    impl FakeLoader {
        fn record(&self, entry: impl Into<String>) {
            self.journal.lock().unwrap().push(entry.into());
        }

        fn handle(&self, label: &str) -> AttachmentHandle {
            self.record(format!("attach {}", label));
            AttachmentHandle::new(
                label,
                Released {
                    label: label.to_string(),
                    journal: self.journal.clone(),
                },
            )
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }
    }

    impl ProbeLoader for FakeLoader {
        type Events = NoEvents;

        fn load_btf_tracepoint(&mut self) -> std::result::Result<(), LoadError> {
            self.record("load tp_btf");
            Ok(())
        }

        fn attach_btf_tracepoint(&mut self) -> std::result::Result<AttachmentHandle, AttachError> {
            Ok(self.handle("tp_btf"))
        }

        fn load_tracepoint(&mut self) -> std::result::Result<(), LoadError> {
            self.record("load tracepoint");
            if self.tracepoint_rejected {
                return Err(LoadError::VerifierRejection {
                    program: "tp_netlink_extack".to_string(),
                    reason: "permission denied".to_string(),
                    verifier_log: "0: R1 invalid mem access".to_string(),
                });
            }
            if self.tracepoint_load_fails {
                return Err(LoadError::Generic {
                    program: "tp_netlink_extack".to_string(),
                    reason: "map pin path not writable".to_string(),
                });
            }
            Ok(())
        }

        fn resolve_target(&mut self) -> std::result::Result<String, ResolutionError> {
            self.record("resolve");
            if self.resolve_fails {
                return Err(ResolutionError::NotFound("netlink_extack".to_string()));
            }
            Ok("do_trace_netlink_extack.part.0".to_string())
        }

        fn load_entry_exit(&mut self, target: &str) -> std::result::Result<(), LoadError> {
            self.record(format!("load entry/exit {}", target));
            Ok(())
        }

        fn attach_entry(&mut self) -> std::result::Result<AttachmentHandle, AttachError> {
            if self.entry_fails {
                self.record("attach fentry failed");
                return Err(AttachError::new("fentry", "device busy"));
            }
            Ok(self.handle("fentry"))
        }

        fn attach_exit(&mut self) -> std::result::Result<AttachmentHandle, AttachError> {
            if self.exit_fails {
                self.record("attach fexit failed");
                return Err(AttachError::new("fexit", "device busy"));
            }
            Ok(self.handle("fexit"))
        }

        fn attach_tracepoint(
            &mut self,
            category: &str,
            name: &str,
        ) -> std::result::Result<AttachmentHandle, AttachError> {
            if self.tracepoint_attach_fails {
                self.record("attach tracepoint failed");
                return Err(AttachError::new(format!("{}:{}", category, name), "no such event"));
            }
            Ok(self.handle("tracepoint"))
        }

        fn events(&mut self) -> std::result::Result<NoEvents, ChannelError> {
            self.record("events");
            Ok(NoEvents)
        }
    }

    #[test]
    fn test_entry_exit_attaches_all_three() {
        let mut loader = FakeLoader::default();
        let pipeline = attach_probes(ProbeStrategy::TracepointWithEntryExit, &mut loader).unwrap();

        let labels: Vec<_> = pipeline.attachments.labels().collect();
        assert_eq!(labels, vec!["fentry", "fexit", "tracepoint"]);
        assert!(loader
            .journal()
            .contains(&"load entry/exit do_trace_netlink_extack.part.0".to_string()));
    }

    #[test]
    fn test_resolution_failure_uses_fallback_name() {
        let mut loader = FakeLoader {
            resolve_fails: true,
            ..Default::default()
        };
        let pipeline = attach_probes(ProbeStrategy::TracepointWithEntryExit, &mut loader).unwrap();

        assert_eq!(pipeline.attachments.len(), 3);
        let journal = loader.journal();
        assert!(journal.contains(&format!("load entry/exit {}", DEFAULT_TARGET)));
        assert!(journal.contains(&"attach fentry".to_string()));
        assert!(journal.contains(&"attach fexit".to_string()));
        assert!(journal.contains(&"attach tracepoint".to_string()));
    }

    #[test]
    fn test_resolve_target_name_is_tagged() {
        let mut loader = FakeLoader::default();
        assert_eq!(
            resolve_target_name(&mut loader),
            TargetName::Resolved("do_trace_netlink_extack.part.0".to_string())
        );

        loader.resolve_fails = true;
        let fallback = resolve_target_name(&mut loader);
        assert_eq!(fallback, TargetName::Fallback(DEFAULT_TARGET.to_string()));
        assert_eq!(fallback.name(), DEFAULT_TARGET);
    }

    #[test]
    fn test_exit_failure_releases_entry_and_skips_tracepoint() {
        let mut loader = FakeLoader {
            exit_fails: true,
            ..Default::default()
        };
        let result = attach_probes(ProbeStrategy::TracepointWithEntryExit, &mut loader);

        assert!(matches!(result, Err(ExtackError::Attach(_))));
        let journal = loader.journal();
        assert_eq!(
            &journal[journal.len() - 3..],
            &[
                "attach fentry".to_string(),
                "attach fexit failed".to_string(),
                "release fentry".to_string(),
            ]
        );
        assert!(!journal.contains(&"attach tracepoint".to_string()));
        assert!(!journal.contains(&"events".to_string()));
    }

    #[test]
    fn test_entry_failure_aborts_before_any_attachment() {
        let mut loader = FakeLoader {
            entry_fails: true,
            ..Default::default()
        };
        let result = attach_probes(ProbeStrategy::TracepointWithEntryExit, &mut loader);

        assert!(result.is_err());
        let journal = loader.journal();
        assert_eq!(journal.last().unwrap(), "attach fentry failed");
        assert!(!journal.iter().any(|e| e.starts_with("release")));
    }

    #[test]
    fn test_tracepoint_failure_releases_in_reverse_order() {
        let mut loader = FakeLoader {
            tracepoint_attach_fails: true,
            ..Default::default()
        };
        assert!(attach_probes(ProbeStrategy::TracepointWithEntryExit, &mut loader).is_err());

        let journal = loader.journal();
        assert_eq!(
            &journal[journal.len() - 2..],
            &["release fexit".to_string(), "release fentry".to_string()]
        );
    }

    #[test]
    fn test_verifier_rejection_aborts_without_fallback() {
        let mut loader = FakeLoader {
            tracepoint_rejected: true,
            ..Default::default()
        };
        let err = match attach_probes(ProbeStrategy::TracepointWithEntryExit, &mut loader) {
            Err(e) => e,
            Ok(_) => panic!("expected load failure"),
        };

        match err {
            ExtackError::Load(load) => {
                assert_eq!(load.verifier_log(), Some("0: R1 invalid mem access"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(loader.journal(), vec!["load tracepoint".to_string()]);
    }

    #[test]
    fn test_generic_load_failure_aborts_without_verifier_log() {
        let mut loader = FakeLoader {
            tracepoint_load_fails: true,
            ..Default::default()
        };
        let err = match attach_probes(ProbeStrategy::TracepointOnly, &mut loader) {
            Err(e) => e,
            Ok(_) => panic!("expected load failure"),
        };

        match err {
            ExtackError::Load(load) => {
                assert!(matches!(load, LoadError::Generic { .. }));
                assert_eq!(load.program(), "tp_netlink_extack");
                assert!(load.verifier_log().is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(loader.journal(), vec!["load tracepoint".to_string()]);
    }

    #[test]
    fn test_tracepoint_only_skips_entry_exit() {
        let mut loader = FakeLoader::default();
        let pipeline = attach_probes(ProbeStrategy::TracepointOnly, &mut loader).unwrap();

        assert_eq!(pipeline.attachments.labels().collect::<Vec<_>>(), vec!["tracepoint"]);
        assert!(!loader.journal().iter().any(|e| e == "resolve"));
    }

    #[test]
    fn test_btf_strategy_short_circuits() {
        let mut loader = FakeLoader::default();
        let pipeline = attach_probes(ProbeStrategy::TracepointUnderBtf, &mut loader).unwrap();

        assert_eq!(pipeline.attachments.labels().collect::<Vec<_>>(), vec!["tp_btf"]);
        assert_eq!(
            loader.journal(),
            vec![
                "load tp_btf".to_string(),
                "attach tp_btf".to_string(),
                "events".to_string()
            ]
        );
    }

    #[test]
    fn test_attachment_set_drops_newest_first() {
        let journal: Journal = Arc::default();
        let mut set = AttachmentSet::new();
        for label in ["a", "b", "c"] {
            set.push(AttachmentHandle::new(
                label,
                Released {
                    label: label.to_string(),
                    journal: journal.clone(),
                },
            ));
        }
        drop(set);

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["release c", "release b", "release a"]
        );
    }
}
