//! Traffic-control classifier filter kept installed on one interface

pub mod netlink;
#[cfg(target_os = "linux")]
pub mod program;
pub mod reconcile;

use crate::error::ControlPlaneError;
use async_trait::async_trait;

pub use reconcile::{reconcile_filter, ReconcileStats};

/// Fixed non-zero filter handle
pub const FILTER_HANDLE: u32 = 0xffff_fff1;
pub const FILTER_PRIORITY: u16 = 100;
pub const FILTER_ANNOTATION: &str = "fake";

/// `ETH_P_ALL` in host byte order
pub const ETH_P_ALL: u16 = 0x0003;

const TC_H_ROOT: u32 = 0xffff_ffff;
const TC_H_MIN_INGRESS: u32 = 0xfff2;

/// Combine a major and minor number into a tc handle
pub const fn build_handle(major: u32, minor: u32) -> u32 {
    (major & 0xffff_0000) | (minor & 0x0000_ffff)
}

/// Parent of clsact ingress filters (`ffff:fff2`)
pub const PARENT_INGRESS: u32 = build_handle(TC_H_ROOT, TC_H_MIN_INGRESS);

/// One classifier-filter installation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub ifindex: u32,
    /// fd of the loaded classifier program
    pub prog_fd: u32,
    /// Ethernet protocol in host byte order
    pub protocol: u16,
    pub parent: u32,
    pub priority: u16,
    pub handle: u32,
    pub annotation: String,
    pub direct_action: bool,
}

impl FilterDescriptor {
    /// Direct-action bpf filter on ingress matching every protocol
    pub fn ingress_bpf(ifindex: u32, prog_fd: u32) -> Self {
        Self {
            ifindex,
            prog_fd,
            protocol: ETH_P_ALL,
            parent: PARENT_INGRESS,
            priority: FILTER_PRIORITY,
            handle: FILTER_HANDLE,
            annotation: FILTER_ANNOTATION.to_string(),
            direct_action: true,
        }
    }

    /// `tcm_info`: priority in the upper half, protocol in network order below
    pub fn info(&self) -> u32 {
        (u32::from(self.priority) << 16) | u32::from(self.protocol.to_be())
    }
}

/// Control-plane connection able to install classifier filters
#[async_trait]
pub trait ControlClient: Send {
    /// Create the filter, or replace it if one with the same handle exists.
    async fn replace_filter(&mut self, filter: &FilterDescriptor)
        -> Result<(), ControlPlaneError>;
}
