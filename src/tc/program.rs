//! Classifier program the reconciled filter points at

use crate::ebpf::loader::load_error;
use crate::error::LoadError;
use aya::{
    programs::{ProgramError, SchedClassifier},
    Ebpf,
};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use tracing::debug;

const PROGRAM_NAME: &str = "fake";

fn classifier_image() -> &'static [u8] {
    aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/extack-cls"))
}

/// Loaded `SCHED_CLS` program returning 0 for every packet.
///
/// Closed when dropped; an installed filter keeps its own reference.
pub struct PlaceholderProgram {
    bpf: Ebpf,
}

impl PlaceholderProgram {
    pub fn load() -> Result<Self, LoadError> {
        Self::load_image(classifier_image())
    }

    fn load_image(image: &[u8]) -> Result<Self, LoadError> {
        if image.is_empty() {
            return Err(LoadError::Generic {
                program: PROGRAM_NAME.to_string(),
                reason: "classifier image was not built into this binary".to_string(),
            });
        }

        let mut bpf = Ebpf::load(image).map_err(|e| LoadError::Generic {
            program: PROGRAM_NAME.to_string(),
            reason: e.to_string(),
        })?;

        let program: &mut SchedClassifier = bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| LoadError::Generic {
                program: PROGRAM_NAME.to_string(),
                reason: "program not found in image".to_string(),
            })?
            .try_into()
            .map_err(|e| load_error(PROGRAM_NAME, e))?;
        program.load().map_err(|e| load_error(PROGRAM_NAME, e))?;

        debug!("Loaded classifier {}", PROGRAM_NAME);
        Ok(Self { bpf })
    }

    fn classifier(&self) -> Result<&SchedClassifier, ProgramError> {
        self.bpf
            .program(PROGRAM_NAME)
            .ok_or(ProgramError::NotLoaded)?
            .try_into()
    }

    /// fd handed to cls_bpf in every filter request
    pub fn raw_fd(&self) -> Result<RawFd, LoadError> {
        let program = self
            .classifier()
            .map_err(|e| load_error(PROGRAM_NAME, e))?;
        let fd = program.fd().map_err(|e| load_error(PROGRAM_NAME, e))?;
        Ok(fd.as_fd().as_raw_fd())
    }
}
