//! Classifier the reconciled tc filter points at
//!
//! Returns 0 for every packet. Only its fd matters: each filter request
//! hands it to cls_bpf.

#![no_std]
#![no_main]

use aya_ebpf::{macros::classifier, programs::TcContext};
use nlextack_probes as _;

#[classifier]
pub fn fake(_ctx: TcContext) -> i32 {
    0
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
