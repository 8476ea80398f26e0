//! BTF-aware tracepoint probe on `netlink_extack`
//!
//! Attached by program reference (raw tracepoint with BTF), no
//! subsystem/event pair needed. The first argument is the message pointer.

#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{btf_tracepoint, map},
    maps::{PerCpuArray, RingBuf},
    programs::BtfTracePointContext,
};
use nlextack_common::probe_type;
use nlextack_probes::{emit, RING_BUF_SIZE};

#[map(name = "EVENTS")]
static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BUF_SIZE, 0);

#[map(name = "DROPPED")]
static DROPPED: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

#[btf_tracepoint(function = "netlink_extack")]
pub fn tp_btf_netlink_extack(ctx: BtfTracePointContext) -> i32 {
    let msg: *const u8 = unsafe { ctx.arg(0) };
    emit(&EVENTS, &DROPPED, msg, probe_type::TRACEPOINT, 0);
    0
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
