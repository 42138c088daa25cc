//! Packet source: live or offline pcap handle plus link/net/transport
//! slicing down to the flows and payload the pipeline works on.

pub mod dispatch;
pub mod stream;

use chrono::{DateTime, Utc};
use etherparse::{EtherType, NetSlice, SlicedPacket, TransportSlice};
use pcap::{Activated, Capture, Linktype};
use thiserror::Error;

use crate::cli::CaptureArgs;
use crate::record::{Endpoint, Flow, TransportKind};

/// Snapshot length for live captures.
pub const SNAPLEN: i32 = 65_535;

/// Read timeout on live handles. The capture loop uses the resulting
/// `TimeoutExpired` wakeups to drive the stale-flow ticker.
const READ_TIMEOUT_MS: i32 = 1_000;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture on {target}: {source}")]
    OpenFailed { target: String, source: pcap::Error },

    #[error("failed to set filter {filter:?}: {source}")]
    FilterFailed { filter: String, source: pcap::Error },
}

/// TCP metadata the reassembler needs beyond the payload.
#[derive(Debug, Clone, Copy)]
pub struct TcpMeta {
    pub seq: u32,
    pub fin: bool,
    pub rst: bool,
}

/// One captured transport-layer packet.
#[derive(Debug)]
pub struct CapturedPacket {
    pub kind: TransportKind,
    pub net: Flow,
    pub transport: Flow,
    pub payload: Vec<u8>,
    pub seen: DateTime<Utc>,
    /// Present iff `kind` is TCP.
    pub tcp: Option<TcpMeta>,
}

/// What the source produced on one read.
pub enum SourceEvent {
    Packet(CapturedPacket),
    /// Live read timeout; nothing arrived. Used as a ticker.
    Idle,
    /// End of file or unrecoverable capture error.
    Closed,
}

/// Blocking packet source over a pcap handle.
pub struct PacketSource {
    cap: Capture<dyn Activated>,
    linktype: Linktype,
}

impl PacketSource {
    /// Open the source described by `args`: the capture file when `-r` is
    /// given, otherwise a live handle on the interface. Open and filter
    /// failures are fatal to the caller.
    pub fn open(args: &CaptureArgs) -> Result<Self, CaptureError> {
        let mut cap: Capture<dyn Activated> = match &args.file {
            Some(path) => Capture::from_file(path)
                .map_err(|source| CaptureError::OpenFailed {
                    target: path.display().to_string(),
                    source,
                })?
                .into(),
            None => Capture::from_device(args.iface.as_str())
                .and_then(|c| {
                    c.promisc(true)
                        .snaplen(SNAPLEN)
                        .timeout(READ_TIMEOUT_MS)
                        .open()
                })
                .map_err(|source| CaptureError::OpenFailed {
                    target: args.iface.clone(),
                    source,
                })?
                .into(),
        };

        cap.filter(&args.filter, true)
            .map_err(|source| CaptureError::FilterFailed {
                filter: args.filter.clone(),
                source,
            })?;

        let linktype = cap.get_datalink();
        tracing::info!(
            iface = %args.iface,
            file = ?args.file,
            filter = %args.filter,
            ?linktype,
            "capture opened"
        );

        Ok(Self { cap, linktype })
    }

    /// Block for the next TCP/UDP packet. Packets the filter lets through
    /// but that lack a usable network or transport layer are skipped.
    pub fn next_event(&mut self) -> SourceEvent {
        loop {
            match self.cap.next_packet() {
                Ok(packet) => {
                    let seen = DateTime::from_timestamp(
                        packet.header.ts.tv_sec,
                        (packet.header.ts.tv_usec as u32).saturating_mul(1_000),
                    )
                    .unwrap_or_else(Utc::now);

                    match parse_packet(self.linktype, packet.data, seen) {
                        Some(parsed) => return SourceEvent::Packet(parsed),
                        None => continue,
                    }
                }
                Err(pcap::Error::TimeoutExpired) => return SourceEvent::Idle,
                Err(pcap::Error::NoMorePackets) => return SourceEvent::Closed,
                Err(err) => {
                    tracing::error!(%err, "capture read failed, closing source");
                    return SourceEvent::Closed;
                }
            }
        }
    }
}

/// Slice one raw frame down to flows and payload. `None` drops the packet.
fn parse_packet(linktype: Linktype, data: &[u8], seen: DateTime<Utc>) -> Option<CapturedPacket> {
    let sliced = slice_frame(linktype, data)?;

    let net = match &sliced.net {
        Some(NetSlice::Ipv4(v4)) => {
            let header = v4.header();
            Flow::new(
                Endpoint::from_ip(header.source_addr().into()),
                Endpoint::from_ip(header.destination_addr().into()),
            )
        }
        Some(NetSlice::Ipv6(v6)) => {
            let header = v6.header();
            Flow::new(
                Endpoint::from_ip(header.source_addr().into()),
                Endpoint::from_ip(header.destination_addr().into()),
            )
        }
        _ => return None,
    };

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Some(CapturedPacket {
            kind: TransportKind::Tcp,
            net,
            transport: Flow::new(
                Endpoint::tcp_port(tcp.source_port()),
                Endpoint::tcp_port(tcp.destination_port()),
            ),
            payload: tcp.payload().to_vec(),
            seen,
            tcp: Some(TcpMeta {
                seq: tcp.sequence_number(),
                fin: tcp.fin(),
                rst: tcp.rst(),
            }),
        }),
        Some(TransportSlice::Udp(udp)) => Some(CapturedPacket {
            kind: TransportKind::Udp,
            net,
            transport: Flow::new(
                Endpoint::udp_port(udp.source_port()),
                Endpoint::udp_port(udp.destination_port()),
            ),
            payload: udp.payload().to_vec(),
            seen,
            tcp: None,
        }),
        _ => None,
    }
}

/// Strip the link layer according to the handle's datalink type.
fn slice_frame(linktype: Linktype, data: &[u8]) -> Option<SlicedPacket<'_>> {
    match linktype {
        Linktype::ETHERNET => SlicedPacket::from_ethernet(data).ok(),
        // Linux cooked capture ("any" interface): 16-byte header with the
        // EtherType in the last two bytes.
        Linktype::LINUX_SLL => {
            if data.len() < 16 {
                return None;
            }
            let ether_type = EtherType(u16::from_be_bytes([data[14], data[15]]));
            SlicedPacket::from_ether_type(ether_type, &data[16..]).ok()
        }
        // BSD loopback: 4-byte host-order address family.
        Linktype::NULL | Linktype::LOOP => {
            if data.len() < 4 {
                return None;
            }
            SlicedPacket::from_ip(&data[4..]).ok()
        }
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => SlicedPacket::from_ip(data).ok(),
        _ => SlicedPacket::from_ethernet(data).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn build_tcp(payload: &[u8], seq: u32) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(4321, 8080, seq, 1024);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    fn build_udp(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
            .udp(5353, 53);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn parses_tcp_packet() {
        let frame = build_tcp(b"hello", 42);
        let pkt = parse_packet(Linktype::ETHERNET, &frame, Utc::now()).unwrap();
        assert_eq!(pkt.kind, TransportKind::Tcp);
        assert_eq!(pkt.net.to_string(), "10.0.0.1 -> 10.0.0.2");
        assert_eq!(pkt.transport.to_string(), "4321 -> 8080");
        assert_eq!(pkt.payload, b"hello");
        let meta = pkt.tcp.unwrap();
        assert_eq!(meta.seq, 42);
        assert!(!meta.fin);
        assert!(!meta.rst);
    }

    #[test]
    fn parses_udp_packet() {
        let frame = build_udp(b"query");
        let pkt = parse_packet(Linktype::ETHERNET, &frame, Utc::now()).unwrap();
        assert_eq!(pkt.kind, TransportKind::Udp);
        assert_eq!(pkt.transport.to_string(), "5353 -> 53");
        assert_eq!(pkt.payload, b"query");
        assert!(pkt.tcp.is_none());
    }

    #[test]
    fn fin_flag_is_carried() {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(1, 2, 7, 1024)
            .fin();
        let mut frame = Vec::new();
        builder.write(&mut frame, b"").unwrap();

        let pkt = parse_packet(Linktype::ETHERNET, &frame, Utc::now()).unwrap();
        assert!(pkt.tcp.unwrap().fin);
    }

    #[test]
    fn non_ip_frame_is_skipped() {
        // ARP ethertype with no parsable payload behind it
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06;
        assert!(parse_packet(Linktype::ETHERNET, &frame, Utc::now()).is_none());
    }

    #[test]
    fn truncated_sll_frame_is_skipped() {
        assert!(parse_packet(Linktype::LINUX_SLL, &[0u8; 10], Utc::now()).is_none());
    }
}
