//! Shared types between the eBPF probes (kernel) and userspace
//!
//! The record written into the `EVENTS` ring buffer must be:
//! - `#[repr(C)]` with no implicit padding, so both sides agree on the layout
//! - `no_std` compatible for eBPF
//! - exactly 68 bytes, little-endian on the wire

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Capacity of the message buffer carried by every record
pub const MSG_CAPACITY: usize = 64;

/// Size of one encoded record in bytes
pub const EVENT_SIZE: usize = MSG_CAPACITY + 4;

/// Name of the ring buffer map shared by all probe images
pub const EVENTS_MAP: &str = "EVENTS";

/// Name of the per-CPU counter of records dropped because the ring buffer was full
pub const DROPPED_MAP: &str = "DROPPED";

/// One netlink extended-ack message observed by a probe
///
/// Layout (68 bytes, 2-byte aligned):
/// - msg: NUL-padded message bytes, only the first `len` are meaningful
/// - len: declared message length (may exceed `MSG_CAPACITY`)
/// - probe_type: which probe produced the record, see [`probe_type`]
/// - retval: low byte of the traced function's return slot (fexit only)
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct ExtackEvent {
    pub msg: [u8; MSG_CAPACITY],
    pub len: u16,
    pub probe_type: u8,
    pub retval: u8,
}

impl ExtackEvent {
    pub const fn zeroed() -> Self {
        Self {
            msg: [0; MSG_CAPACITY],
            len: 0,
            probe_type: probe_type::TRACEPOINT,
            retval: 0,
        }
    }
}

/// Probe origin tags
pub mod probe_type {
    pub const TRACEPOINT: u8 = 0;
    pub const FENTRY: u8 = 1;
    pub const FEXIT: u8 = 2;
}

const _: () = {
    assert!(
        core::mem::size_of::<ExtackEvent>() == EVENT_SIZE,
        "ExtackEvent must be exactly 68 bytes"
    );
    assert!(
        core::mem::align_of::<ExtackEvent>() == 2,
        "ExtackEvent must be 2-byte aligned"
    );
};
