//! eBPF probes for nlextack
//!
//! Every probe observes the message handed to the kernel's netlink
//! extended-ack tracepoint and writes one `ExtackEvent` into the shared
//! `EVENTS` ring buffer:
//! - `extack-tp`: classic tracepoint `netlink:netlink_extack`
//! - `extack-tp-btf`: BTF-aware tracepoint on the same event
//! - `extack-ff`: fentry/fexit pair around the function that fires the tracepoint
//!
//! eBPF probe entry points are in src/bin/

#![cfg_attr(not(test), no_std)]

use aya_ebpf::{
    helpers::bpf_probe_read_kernel_str_bytes,
    maps::{PerCpuArray, RingBuf},
};
use nlextack_common::ExtackEvent;

/// Ring buffer size in bytes. 256KB holds ~3800 records before dropping.
pub const RING_BUF_SIZE: u32 = 256 * 1024;

/// Copy the NUL-terminated kernel string at `msg` into a ring buffer record.
///
/// A full ring buffer bumps the per-CPU `dropped` counter instead, which
/// userspace reports as lost samples.
#[inline(always)]
pub fn emit(
    events: &RingBuf,
    dropped: &PerCpuArray<u64>,
    msg: *const u8,
    probe_type: u8,
    retval: u8,
) {
    let Some(mut entry) = events.reserve::<ExtackEvent>(0) else {
        count_drop(dropped);
        return;
    };

    let event = entry.write(ExtackEvent::zeroed());
    // SAFETY: msg points into kernel memory handed to us by the attach point;
    // the helper bounds the copy by the destination length.
    match unsafe { bpf_probe_read_kernel_str_bytes(msg, &mut event.msg) } {
        Ok(bytes) => event.len = bytes.len() as u16,
        Err(_) => {
            entry.discard(0);
            return;
        }
    }
    event.probe_type = probe_type;
    event.retval = retval;

    entry.submit(0);
}

#[inline(always)]
fn count_drop(dropped: &PerCpuArray<u64>) {
    if let Some(counter) = dropped.get_ptr_mut(0) {
        // SAFETY: per-CPU slot, no concurrent writer on this CPU
        unsafe { *counter += 1 };
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
