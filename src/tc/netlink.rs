//! rtnetlink request for the filter and decoding of the kernel's ack
//!
//! The request is `RTM_NEWTFILTER` with `NLM_F_CREATE` and without
//! `NLM_F_EXCL`, so sending it again replaces the existing filter.

use super::FilterDescriptor;
use crate::error::ControlPlaneError;
use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_REQUEST,
};
use netlink_packet_route::tc::{TcAttribute, TcHandle, TcMessage, TcOption};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_packet_utils::nla::{DefaultNla, NlasIterator};

const NLMSG_HDRLEN: usize = 16;

// Ack flags and attribute from linux/netlink.h
const NLM_F_CAPPED: u16 = 0x100;
const NLM_F_ACK_TLVS: u16 = 0x200;
const NLMSGERR_ATTR_MSG: u16 = 1;

// cls_bpf options from linux/pkt_cls.h
const TCA_BPF_FD: u16 = 6;
const TCA_BPF_NAME: u16 = 7;
const TCA_BPF_FLAGS: u16 = 8;
const TCA_BPF_FLAG_ACT_DIRECT: u32 = 1;

const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn c_string(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    bytes
}

/// `TCA_OPTIONS` payload of a cls_bpf filter
fn bpf_options(filter: &FilterDescriptor) -> Vec<TcOption> {
    let flags = if filter.direct_action {
        TCA_BPF_FLAG_ACT_DIRECT
    } else {
        0
    };

    vec![
        TcOption::Other(DefaultNla::new(
            TCA_BPF_FD,
            filter.prog_fd.to_ne_bytes().to_vec(),
        )),
        TcOption::Other(DefaultNla::new(TCA_BPF_NAME, c_string(&filter.annotation))),
        TcOption::Other(DefaultNla::new(TCA_BPF_FLAGS, flags.to_ne_bytes().to_vec())),
    ]
}

/// Build the create-or-replace request for `filter`.
pub fn replace_filter_request(
    filter: &FilterDescriptor,
    seq: u32,
) -> NetlinkMessage<RouteNetlinkMessage> {
    let mut tc = TcMessage::default();
    tc.header.family = AddressFamily::Unspec;
    tc.header.index = filter.ifindex as i32;
    tc.header.handle = TcHandle::from(filter.handle);
    tc.header.parent = TcHandle::from(filter.parent);
    tc.header.info = filter.info();
    tc.attributes.push(TcAttribute::Kind("bpf".to_string()));
    tc.attributes.push(TcAttribute::Options(bpf_options(filter)));

    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE;
    header.sequence_number = seq;

    let mut message = NetlinkMessage::new(
        header,
        NetlinkPayload::from(RouteNetlinkMessage::NewTrafficFilter(tc)),
    );
    message.finalize();
    message
}

/// Serialized form of [`replace_filter_request`].
pub fn encode_replace_filter(filter: &FilterDescriptor, seq: u32) -> Vec<u8> {
    let message = replace_filter_request(filter, seq);
    let mut buf = vec![0u8; message.buffer_len()];
    message.serialize(&mut buf);
    buf
}

/// Find the ack for `seq` in one datagram.
///
/// Returns `None` when the datagram holds no message for `seq`.
pub fn parse_ack(buf: &[u8], seq: u32) -> Option<Result<(), ControlPlaneError>> {
    let mut offset = 0;
    while buf.len().saturating_sub(offset) >= NLMSG_HDRLEN {
        let message = match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..]) {
            Ok(message) => message,
            Err(e) => return Some(Err(ControlPlaneError::Truncated(e.to_string()))),
        };

        let len = message.header.length as usize;
        if len < NLMSG_HDRLEN {
            return Some(Err(ControlPlaneError::Truncated(format!(
                "message length {}",
                len
            ))));
        }
        offset += align4(len);

        if message.header.sequence_number != seq {
            continue;
        }
        match message.payload {
            NetlinkPayload::Error(err) => {
                let Some(code) = err.code else {
                    return Some(Ok(()));
                };
                let message = if message.header.flags & NLM_F_ACK_TLVS != 0 {
                    extack_message(&err.header, message.header.flags)
                } else {
                    None
                };
                return Some(Err(ControlPlaneError::Rejected {
                    errno: code.get().saturating_neg(),
                    message,
                }));
            }
            NetlinkPayload::Done(_) => return Some(Ok(())),
            _ => {}
        }
    }
    None
}

/// Pull `NLMSGERR_ATTR_MSG` out of the TLVs that follow the echoed request.
fn extack_message(payload: &[u8], flags: u16) -> Option<String> {
    let echoed = if flags & NLM_F_CAPPED != 0 {
        NLMSG_HDRLEN
    } else {
        u32::from_ne_bytes(payload.get(..4)?.try_into().ok()?) as usize
    };

    NlasIterator::new(payload.get(align4(echoed)..)?)
        .filter_map(Result::ok)
        .find(|nla| nla.kind() == NLMSGERR_ATTR_MSG)
        .map(|nla| {
            let value = nla.value();
            let text = value.split(|b| *b == 0).next().unwrap_or(value);
            String::from_utf8_lossy(text).into_owned()
        })
}

#[cfg(target_os = "linux")]
pub use client::NetlinkClient;

#[cfg(target_os = "linux")]
mod client {
    use super::{encode_replace_filter, parse_ack};
    use crate::error::ControlPlaneError;
    use crate::tc::{ControlClient, FilterDescriptor};
    use async_trait::async_trait;
    use netlink_sys::{
        protocols::NETLINK_ROUTE, AsyncSocket, AsyncSocketExt, SocketAddr, TokioSocket,
    };
    use tracing::debug;

    const RECV_BUF_SIZE: usize = 64 * 1024;

    /// rtnetlink connection asking the kernel for extended acks
    pub struct NetlinkClient {
        socket: TokioSocket,
        seq: u32,
        buf: Vec<u8>,
    }

    impl NetlinkClient {
        pub fn open() -> Result<Self, ControlPlaneError> {
            let mut socket = TokioSocket::new(NETLINK_ROUTE)?;
            let inner = socket.socket_mut();
            inner.bind_auto()?;
            inner.connect(&SocketAddr::new(0, 0))?;
            inner.set_ext_ack(true)?;

            Ok(Self {
                socket,
                seq: 0,
                buf: Vec::with_capacity(RECV_BUF_SIZE),
            })
        }
    }

    #[async_trait]
    impl ControlClient for NetlinkClient {
        async fn replace_filter(
            &mut self,
            filter: &FilterDescriptor,
        ) -> Result<(), ControlPlaneError> {
            self.seq = self.seq.wrapping_add(1);
            let request = encode_replace_filter(filter, self.seq);
            self.socket.send(&request).await?;
            debug!("Sent RTM_NEWTFILTER seq={} ({} bytes)", self.seq, request.len());

            loop {
                self.buf.clear();
                self.socket.recv(&mut self.buf).await?;
                if self.buf.is_empty() {
                    return Err(ControlPlaneError::Truncated("empty reply".to_string()));
                }
                if let Some(result) = parse_ack(&self.buf, self.seq) {
                    return result;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_packet_core::ErrorMessage;
    use netlink_packet_utils::Emitable;
    use std::num::NonZeroI32;

    fn error_ack(seq: u32, code: i32, extack: Option<&str>) -> Vec<u8> {
        // echoed request header, capped
        let mut echoed = vec![0u8; NLMSG_HDRLEN];
        echoed[..4].copy_from_slice(&(NLMSG_HDRLEN as u32).to_ne_bytes());

        let mut flags = NLM_F_CAPPED;
        if let Some(text) = extack {
            flags |= NLM_F_ACK_TLVS;
            let tlvs = vec![DefaultNla::new(NLMSGERR_ATTR_MSG, c_string(text))];
            let mut raw = vec![0u8; tlvs.as_slice().buffer_len()];
            tlvs.as_slice().emit(&mut raw);
            echoed.extend_from_slice(&raw);
        }

        let mut err = ErrorMessage::default();
        err.code = NonZeroI32::new(code);
        err.header = echoed;

        let mut header = NetlinkHeader::default();
        header.flags = flags;
        header.sequence_number = seq;

        let mut message =
            NetlinkMessage::<RouteNetlinkMessage>::new(header, NetlinkPayload::Error(err));
        message.finalize();
        let mut buf = vec![0u8; message.buffer_len()];
        message.serialize(&mut buf);
        buf
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_request_header_and_tcmsg() {
        let filter = FilterDescriptor::ingress_bpf(1, 42);
        let raw = encode_replace_filter(&filter, 7);
        let message = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&raw).unwrap();

        assert_eq!(message.header.length as usize, raw.len());
        assert_eq!(message.header.sequence_number, 7);
        assert_eq!(
            message.header.flags,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE
        );

        match message.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewTrafficFilter(tc)) => {
                assert_eq!(tc.header.index, 1);
                assert_eq!(u32::from(tc.header.handle), 0xffff_fff1);
                assert_eq!(u32::from(tc.header.parent), 0xffff_fff2);
                assert_eq!(tc.header.info, filter.info());
                assert!(tc
                    .attributes
                    .iter()
                    .any(|a| matches!(a, TcAttribute::Kind(kind) if kind == "bpf")));
                assert!(tc
                    .attributes
                    .iter()
                    .any(|a| matches!(a, TcAttribute::Options(opts) if opts.len() == 3)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_request_carries_bpf_options() {
        let raw = encode_replace_filter(&FilterDescriptor::ingress_bpf(1, 42), 1);

        assert!(contains(&raw, b"bpf\0"));
        assert!(contains(&raw, b"fake\0"));
        assert_eq!(bpf_options(&FilterDescriptor::ingress_bpf(1, 42)).len(), 3);
    }

    #[test]
    fn test_same_descriptor_encodes_identically() {
        let filter = FilterDescriptor::ingress_bpf(1, 5);
        assert_eq!(
            encode_replace_filter(&filter, 3),
            encode_replace_filter(&filter.clone(), 3)
        );
    }

    #[test]
    fn test_parse_success_ack() {
        let ack = error_ack(5, 0, None);
        assert!(matches!(parse_ack(&ack, 5), Some(Ok(()))));
    }

    #[test]
    fn test_parse_error_with_extack_message() {
        let ack = error_ack(9, -22, Some("Parent Qdisc doesn't exists"));

        match parse_ack(&ack, 9) {
            Some(Err(ControlPlaneError::Rejected { errno, message })) => {
                assert_eq!(errno, 22);
                assert_eq!(message.as_deref(), Some("Parent Qdisc doesn't exists"));
            }
            other => panic!("unexpected ack: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_without_extack() {
        let ack = error_ack(2, -19, None);
        match parse_ack(&ack, 2) {
            Some(Err(ControlPlaneError::Rejected { errno, message })) => {
                assert_eq!(errno, 19);
                assert!(message.is_none());
            }
            other => panic!("unexpected ack: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_code_at_i32_min() {
        let ack = error_ack(1, i32::MIN, None);
        match parse_ack(&ack, 1) {
            Some(Err(ControlPlaneError::Rejected { errno, .. })) => assert_eq!(errno, i32::MAX),
            other => panic!("unexpected ack: {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_other_sequence_numbers() {
        let mut datagram = error_ack(1, -1, None);
        datagram.extend_from_slice(&error_ack(2, 0, None));

        assert!(matches!(parse_ack(&datagram, 2), Some(Ok(()))));
        assert!(parse_ack(&datagram, 3).is_none());
    }

    #[test]
    fn test_parse_truncated_message() {
        let mut ack = error_ack(4, -22, None);
        ack[0] = 0xff;
        assert!(matches!(
            parse_ack(&ack, 4),
            Some(Err(ControlPlaneError::Truncated(_)))
        ));
    }
}
