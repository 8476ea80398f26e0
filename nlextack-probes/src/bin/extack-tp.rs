//! Tracepoint probe on `netlink:netlink_extack`
//!
//! The `EVENTS` map is pinned by name so the fentry/fexit image loaded later
//! writes into the same ring buffer.
//!
//! Note: This binary must be built for the bpfel-unknown-none target.
//! The root crate's build.rs handles cross-compilation automatically.

#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, tracepoint},
    maps::{PerCpuArray, RingBuf},
    programs::TracePointContext,
    EbpfContext,
};
use aya_log_ebpf::warn;
use nlextack_common::probe_type;
use nlextack_probes::{emit, RING_BUF_SIZE};

#[map(name = "EVENTS")]
static EVENTS: RingBuf = RingBuf::pinned(RING_BUF_SIZE, 0);

#[map(name = "DROPPED")]
static DROPPED: PerCpuArray<u64> = PerCpuArray::pinned(1, 0);

/// Offset of `__data_loc char[] msg` in the tracepoint record, right after
/// the 8 bytes of common fields.
const MSG_DATA_LOC_OFFSET: usize = 8;

#[tracepoint]
pub fn tp_netlink_extack(ctx: TracePointContext) -> u32 {
    match try_tp_netlink_extack(&ctx) {
        Ok(ret) => ret,
        Err(e) => {
            warn!(&ctx, "failed to read extack msg location: {}", e);
            0
        }
    }
}

fn try_tp_netlink_extack(ctx: &TracePointContext) -> Result<u32, i64> {
    // __data_loc: low 16 bits offset from the record start, high 16 bits length
    let data_loc: u32 = unsafe { ctx.read_at(MSG_DATA_LOC_OFFSET)? };
    let offset = (data_loc & 0xffff) as usize;
    let msg = unsafe { (ctx.as_ptr() as *const u8).add(offset) };

    emit(&EVENTS, &DROPPED, msg, probe_type::TRACEPOINT, 0);
    Ok(0)
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
