//! Decoding of the fixed-layout records written by the kernel probes

use bytes::Buf;
use nlextack_common::{probe_type, MSG_CAPACITY};
use std::fmt;

/// Which probe produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOrigin {
    Tracepoint,
    EntryTrace,
    ExitTrace,
}

impl ProbeOrigin {
    /// Unknown tags fall back to the tracepoint origin.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            probe_type::FENTRY => ProbeOrigin::EntryTrace,
            probe_type::FEXIT => ProbeOrigin::ExitTrace,
            _ => ProbeOrigin::Tracepoint,
        }
    }
}

/// One decoded netlink extended-ack observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    msg: [u8; MSG_CAPACITY],
    pub length: u16,
    pub origin: ProbeOrigin,
    pub return_value: u8,
}

impl DiagnosticEvent {
    /// Decode a raw record.
    ///
    /// Layout: `msg[64]`, `len: u16`, `probe_type: u8`, `retval: u8`, little-endian.
    /// Short input yields a partially populated event; missing fields stay zero.
    pub fn decode(mut raw: &[u8]) -> Self {
        let mut msg = [0u8; MSG_CAPACITY];
        let n = raw.len().min(MSG_CAPACITY);
        raw.copy_to_slice(&mut msg[..n]);

        let length = if raw.remaining() >= 2 {
            raw.get_u16_le()
        } else {
            0
        };
        let tag = if raw.has_remaining() { raw.get_u8() } else { 0 };
        let return_value = if raw.has_remaining() { raw.get_u8() } else { 0 };

        Self {
            msg,
            length,
            origin: ProbeOrigin::from_tag(tag),
            return_value,
        }
    }

    /// Meaningful message bytes, clamped to the buffer capacity
    pub fn message(&self) -> &[u8] {
        &self.msg[..usize::from(self.length).min(MSG_CAPACITY)]
    }

    /// Classification label appended to every logged line
    pub fn label(&self) -> String {
        match self.origin {
            ProbeOrigin::Tracepoint => "(tracepoint)".to_string(),
            ProbeOrigin::EntryTrace => "(fentry)".to_string(),
            ProbeOrigin::ExitTrace => format!("(fexit: {})", self.return_value),
        }
    }
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Errmsg: {} {}",
            String::from_utf8_lossy(self.message()),
            self.label()
        )
    }
}
