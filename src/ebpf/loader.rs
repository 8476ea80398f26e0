//! aya-backed probe loading and attachment
//!
//! Three precompiled images are embedded in the binary:
//! - `extack-tp`: classic tracepoint, pins `EVENTS` and `DROPPED`
//! - `extack-tp-btf`: BTF tracepoint with its own maps
//! - `extack-ff`: fentry/fexit pair, reuses the pinned maps
//!
//! The pins live under a run-scoped bpffs directory and are removed when
//! the loader is dropped.

use super::maps::RingBufSource;
use super::{symbols, AttachmentHandle, ProbeLoader, TRACEPOINT_NAME};
use crate::error::{AttachError, ChannelError, LoadError, ResolutionError};
use aya::{
    maps::{MapData, PerCpuArray, RingBuf},
    programs::{BtfTracePoint, FEntry, FExit, ProgramError, TracePoint},
    Btf, Ebpf, EbpfLoader,
};
use aya_log::EbpfLogger;
use nlextack_common::{DROPPED_MAP, EVENTS_MAP};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TRACEPOINT_PROG: &str = "tp_netlink_extack";
const BTF_TRACEPOINT_PROG: &str = "tp_btf_netlink_extack";
const FENTRY_PROG: &str = "fentry_netlink_extack";
const FEXIT_PROG: &str = "fexit_netlink_extack";

const BTF_PATH: &str = "/sys/kernel/btf/vmlinux";

fn tracepoint_image() -> &'static [u8] {
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/extack-tp"))
}

fn btf_tracepoint_image() -> &'static [u8] {
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/extack-tp-btf"))
}

fn entry_exit_image() -> &'static [u8] {
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/extack-ff"))
}

pub struct AyaProbeLoader {
    pin_dir: PathBuf,
    tracepoint: Option<Ebpf>,
    btf_tracepoint: Option<Ebpf>,
    entry_exit: Option<Ebpf>,
}

impl AyaProbeLoader {
    pub fn new(pin_dir: impl Into<PathBuf>) -> Self {
        preflight();
        Self {
            pin_dir: pin_dir.into(),
            tracepoint: None,
            btf_tracepoint: None,
            entry_exit: None,
        }
    }

    fn load_image(&self, image: &[u8], program: &str) -> Result<Ebpf, LoadError> {
        if image.is_empty() {
            return Err(LoadError::Generic {
                program: program.to_string(),
                reason: "probe image was not built into this binary".to_string(),
            });
        }

        EbpfLoader::new()
            .map_pin_path(&self.pin_dir)
            .load(image)
            .map_err(|e| LoadError::Generic {
                program: program.to_string(),
                reason: e.to_string(),
            })
    }

    fn prepare_pin_dir(&self) -> Result<(), LoadError> {
        std::fs::create_dir_all(&self.pin_dir).map_err(|e| LoadError::Generic {
            program: TRACEPOINT_PROG.to_string(),
            reason: format!("creating pin dir {}: {}", self.pin_dir.display(), e),
        })?;
        remove_pins(&self.pin_dir);
        Ok(())
    }

    /// Image owning the output map for the active strategy
    fn events_image(&mut self) -> Option<&mut Ebpf> {
        self.btf_tracepoint.as_mut().or(self.tracepoint.as_mut())
    }
}

impl Drop for AyaProbeLoader {
    fn drop(&mut self) {
        remove_pins(&self.pin_dir);
    }
}

fn remove_pins(pin_dir: &Path) {
    for name in [EVENTS_MAP, DROPPED_MAP] {
        let pin = pin_dir.join(name);
        match std::fs::remove_file(&pin) {
            Ok(()) => debug!("Removed pin {}", pin.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove pin {}: {}", pin.display(), e),
        }
    }
}

pub(crate) fn load_error(program: &str, err: ProgramError) -> LoadError {
    match err {
        ProgramError::LoadError {
            io_error,
            verifier_log,
        } => LoadError::VerifierRejection {
            program: program.to_string(),
            reason: io_error.to_string(),
            verifier_log: verifier_log.to_string(),
        },
        other => LoadError::Generic {
            program: program.to_string(),
            reason: other.to_string(),
        },
    }
}

fn not_loaded(program: &str) -> AttachError {
    AttachError::new(program, "program not loaded")
}

fn init_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!(
            "Failed to initialize EbpfLogger: {}. eBPF probe logs will not be visible.",
            e
        );
    }
}

fn kernel_btf(program: &str) -> Result<Btf, LoadError> {
    Btf::from_sys_fs().map_err(|e| LoadError::Generic {
        program: program.to_string(),
        reason: format!("kernel BTF unavailable: {}", e),
    })
}

impl ProbeLoader for AyaProbeLoader {
    type Events = RingBufSource;

    fn load_btf_tracepoint(&mut self) -> Result<(), LoadError> {
        let mut bpf = self.load_image(btf_tracepoint_image(), BTF_TRACEPOINT_PROG)?;
        let btf = kernel_btf(BTF_TRACEPOINT_PROG)?;

        let program: &mut BtfTracePoint = bpf
            .program_mut(BTF_TRACEPOINT_PROG)
            .ok_or_else(|| LoadError::Generic {
                program: BTF_TRACEPOINT_PROG.to_string(),
                reason: "program not found in image".to_string(),
            })?
            .try_into()
            .map_err(|e| load_error(BTF_TRACEPOINT_PROG, e))?;
        program
            .load(TRACEPOINT_NAME, &btf)
            .map_err(|e| load_error(BTF_TRACEPOINT_PROG, e))?;

        debug!("Loaded {}", BTF_TRACEPOINT_PROG);
        self.btf_tracepoint = Some(bpf);
        Ok(())
    }

    fn attach_btf_tracepoint(&mut self) -> Result<AttachmentHandle, AttachError> {
        let bpf = self
            .btf_tracepoint
            .as_mut()
            .ok_or_else(|| not_loaded(BTF_TRACEPOINT_PROG))?;
        let program: &mut BtfTracePoint = bpf
            .program_mut(BTF_TRACEPOINT_PROG)
            .ok_or_else(|| not_loaded(BTF_TRACEPOINT_PROG))?
            .try_into()
            .map_err(|e| AttachError::new(BTF_TRACEPOINT_PROG, e))?;

        let link_id = program
            .attach()
            .map_err(|e| AttachError::new(BTF_TRACEPOINT_PROG, e))?;
        let link = program
            .take_link(link_id)
            .map_err(|e| AttachError::new(BTF_TRACEPOINT_PROG, e))?;

        Ok(AttachmentHandle::new(
            format!("tp_btf({})", TRACEPOINT_NAME),
            link,
        ))
    }

    fn load_tracepoint(&mut self) -> Result<(), LoadError> {
        self.prepare_pin_dir()?;
        let mut bpf = self.load_image(tracepoint_image(), TRACEPOINT_PROG)?;
        init_logger(&mut bpf);

        let program: &mut TracePoint = bpf
            .program_mut(TRACEPOINT_PROG)
            .ok_or_else(|| LoadError::Generic {
                program: TRACEPOINT_PROG.to_string(),
                reason: "program not found in image".to_string(),
            })?
            .try_into()
            .map_err(|e| load_error(TRACEPOINT_PROG, e))?;
        program.load().map_err(|e| load_error(TRACEPOINT_PROG, e))?;

        debug!(
            "Loaded {}, maps pinned under {}",
            TRACEPOINT_PROG,
            self.pin_dir.display()
        );
        self.tracepoint = Some(bpf);
        Ok(())
    }

    fn resolve_target(&mut self) -> Result<String, ResolutionError> {
        symbols::resolve_tracepoint_function(TRACEPOINT_NAME)
    }

    fn load_entry_exit(&mut self, target: &str) -> Result<(), LoadError> {
        let mut bpf = self.load_image(entry_exit_image(), FENTRY_PROG)?;
        let btf = kernel_btf(FENTRY_PROG)?;

        for name in [FENTRY_PROG, FEXIT_PROG] {
            let program = bpf.program_mut(name).ok_or_else(|| LoadError::Generic {
                program: name.to_string(),
                reason: "program not found in image".to_string(),
            })?;

            if name == FENTRY_PROG {
                let program: &mut FEntry =
                    program.try_into().map_err(|e| load_error(name, e))?;
                program.load(target, &btf).map_err(|e| load_error(name, e))?;
            } else {
                let program: &mut FExit =
                    program.try_into().map_err(|e| load_error(name, e))?;
                program.load(target, &btf).map_err(|e| load_error(name, e))?;
            }
        }

        debug!("Loaded {} and {} on {}", FENTRY_PROG, FEXIT_PROG, target);
        self.entry_exit = Some(bpf);
        Ok(())
    }

    fn attach_entry(&mut self) -> Result<AttachmentHandle, AttachError> {
        let bpf = self
            .entry_exit
            .as_mut()
            .ok_or_else(|| not_loaded(FENTRY_PROG))?;
        let program: &mut FEntry = bpf
            .program_mut(FENTRY_PROG)
            .ok_or_else(|| not_loaded(FENTRY_PROG))?
            .try_into()
            .map_err(|e| AttachError::new(FENTRY_PROG, e))?;

        let link_id = program
            .attach()
            .map_err(|e| AttachError::new(FENTRY_PROG, e))?;
        let link = program
            .take_link(link_id)
            .map_err(|e| AttachError::new(FENTRY_PROG, e))?;

        Ok(AttachmentHandle::new("fentry", link))
    }

    fn attach_exit(&mut self) -> Result<AttachmentHandle, AttachError> {
        let bpf = self
            .entry_exit
            .as_mut()
            .ok_or_else(|| not_loaded(FEXIT_PROG))?;
        let program: &mut FExit = bpf
            .program_mut(FEXIT_PROG)
            .ok_or_else(|| not_loaded(FEXIT_PROG))?
            .try_into()
            .map_err(|e| AttachError::new(FEXIT_PROG, e))?;

        let link_id = program
            .attach()
            .map_err(|e| AttachError::new(FEXIT_PROG, e))?;
        let link = program
            .take_link(link_id)
            .map_err(|e| AttachError::new(FEXIT_PROG, e))?;

        Ok(AttachmentHandle::new("fexit", link))
    }

    fn attach_tracepoint(
        &mut self,
        category: &str,
        name: &str,
    ) -> Result<AttachmentHandle, AttachError> {
        let bpf = self
            .tracepoint
            .as_mut()
            .ok_or_else(|| not_loaded(TRACEPOINT_PROG))?;
        let program: &mut TracePoint = bpf
            .program_mut(TRACEPOINT_PROG)
            .ok_or_else(|| not_loaded(TRACEPOINT_PROG))?
            .try_into()
            .map_err(|e| AttachError::new(TRACEPOINT_PROG, e))?;

        let link_id = program
            .attach(category, name)
            .map_err(|e| AttachError::new(format!("{}:{}", category, name), e))?;
        let link = program
            .take_link(link_id)
            .map_err(|e| AttachError::new(TRACEPOINT_PROG, e))?;

        Ok(AttachmentHandle::new(
            format!("tracepoint({}:{})", category, name),
            link,
        ))
    }

    fn events(&mut self) -> Result<RingBufSource, ChannelError> {
        let bpf = self
            .events_image()
            .ok_or_else(|| ChannelError::Read("no probe image loaded".to_string()))?;

        let available: Vec<String> = bpf.maps().map(|(name, _)| name.to_string()).collect();
        let events = bpf.take_map(EVENTS_MAP).ok_or_else(|| {
            ChannelError::Read(format!(
                "{} map not found. Available maps: {:?}",
                EVENTS_MAP, available
            ))
        })?;
        let ring = RingBuf::try_from(events).map_err(|e| {
            ChannelError::Read(format!("{} is not a ring buffer: {}", EVENTS_MAP, e))
        })?;

        let dropped = match bpf
            .take_map(DROPPED_MAP)
            .map(PerCpuArray::<MapData, u64>::try_from)
        {
            Some(Ok(map)) => Some(map),
            Some(Err(e)) => {
                warn!(
                    "{} unusable, lost samples will not be reported: {}",
                    DROPPED_MAP, e
                );
                None
            }
            None => None,
        };

        RingBufSource::new(ring, dropped)
    }
}

/// Log what is missing for the probes to load, without failing.
fn preflight() {
    if !Path::new(BTF_PATH).exists() {
        warn!(
            "BTF not found at {}; tp_btf and fentry/fexit need CONFIG_DEBUG_INFO_BTF=y",
            BTF_PATH
        );
    }

    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!(
            "Not running as root (euid={}). Ensure CAP_BPF, CAP_PERFMON and CAP_NET_ADMIN are granted.",
            euid
        );
    } else {
        info!("Running with root privileges");
    }
}
