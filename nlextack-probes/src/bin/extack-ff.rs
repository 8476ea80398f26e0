//! fentry/fexit probes around the function that fires `netlink_extack`
//!
//! Userspace chooses the actual target at load time, so the `function`
//! below only names the default. Both programs write into the `EVENTS` ring
//! buffer pinned by the tracepoint image.

#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{fentry, fexit, map},
    maps::{PerCpuArray, RingBuf},
    programs::{FEntryContext, FExitContext},
};
use nlextack_common::probe_type;
use nlextack_probes::{emit, RING_BUF_SIZE};

#[map(name = "EVENTS")]
static EVENTS: RingBuf = RingBuf::pinned(RING_BUF_SIZE, 0);

#[map(name = "DROPPED")]
static DROPPED: PerCpuArray<u64> = PerCpuArray::pinned(1, 0);

#[fentry(function = "do_trace_netlink_extack")]
pub fn fentry_netlink_extack(ctx: FEntryContext) -> u32 {
    let msg: *const u8 = unsafe { ctx.arg(0) };
    emit(&EVENTS, &DROPPED, msg, probe_type::FENTRY, 0);
    0
}

#[fexit(function = "do_trace_netlink_extack")]
pub fn fexit_netlink_extack(ctx: FExitContext) -> u32 {
    let msg: *const u8 = unsafe { ctx.arg(0) };
    // The slot after the last argument holds the return value; 0 for void.
    let retval: u64 = unsafe { ctx.arg(1) };
    emit(&EVENTS, &DROPPED, msg, probe_type::FEXIT, retval as u8);
    0
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
