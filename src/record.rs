//! Core data model: flow endpoints, decoded records, and the codec contract
//! every embedding application implements.

use std::any::Any;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One opaque decoded body. The framework never looks inside; the
/// application's brief/detail functions downcast back to their own types.
pub type Body = Box<dyn Any + Send + Sync>;

#[derive(Error, Debug)]
pub enum DecodeError {
    /// The buffer does not yet hold a complete frame. The decode loop stops
    /// and waits for more reassembled bytes. Consumption must be 0.
    #[error("insufficient bytes for a complete frame")]
    InsufficientBytes,

    /// The stream cannot be framed at all. Fatal for the stream: its buffer
    /// is dropped and no further decode attempts are made on that flow.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("endpoint raw bytes have length {got}, expected {want}")]
    BadLength { want: usize, got: usize },
}

/// Transport protocol of a captured flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

/// What the raw bytes of an [`Endpoint`] encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Ipv4,
    Ipv6,
    TcpPort,
    UdpPort,
}

impl EndpointKind {
    fn raw_len(self) -> usize {
        match self {
            EndpointKind::Ipv4 => 4,
            EndpointKind::Ipv6 => 16,
            EndpointKind::TcpPort | EndpointKind::UdpPort => 2,
        }
    }
}

/// One side of a flow: a typed raw-byte address (IP address or port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: EndpointKind,
    raw: Vec<u8>,
}

impl Endpoint {
    /// Build an endpoint from its persisted `(kind, raw)` projection,
    /// validating the raw length for the kind.
    pub fn from_parts(kind: EndpointKind, raw: Vec<u8>) -> Result<Self, EndpointError> {
        if raw.len() != kind.raw_len() {
            return Err(EndpointError::BadLength {
                want: kind.raw_len(),
                got: raw.len(),
            });
        }
        Ok(Self { kind, raw })
    }

    pub fn from_ip(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self {
                kind: EndpointKind::Ipv4,
                raw: v4.octets().to_vec(),
            },
            IpAddr::V6(v6) => Self {
                kind: EndpointKind::Ipv6,
                raw: v6.octets().to_vec(),
            },
        }
    }

    pub fn tcp_port(port: u16) -> Self {
        Self {
            kind: EndpointKind::TcpPort,
            raw: port.to_be_bytes().to_vec(),
        }
    }

    pub fn udp_port(port: u16) -> Self {
        Self {
            kind: EndpointKind::UdpPort,
            raw: port.to_be_bytes().to_vec(),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EndpointKind::Ipv4 => {
                let o: [u8; 4] = self.raw[..].try_into().unwrap_or([0; 4]);
                write!(f, "{}", Ipv4Addr::from(o))
            }
            EndpointKind::Ipv6 => {
                let o: [u8; 16] = self.raw[..].try_into().unwrap_or([0; 16]);
                write!(f, "{}", Ipv6Addr::from(o))
            }
            EndpointKind::TcpPort | EndpointKind::UdpPort => {
                let p = u16::from_be_bytes(self.raw[..].try_into().unwrap_or([0; 2]));
                write!(f, "{}", p)
            }
        }
    }
}

/// Ordered source/destination endpoint pair at one layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Flow {
    src: Endpoint,
    dst: Endpoint,
}

impl Flow {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        Self { src, dst }
    }

    pub fn src(&self) -> &Endpoint {
        &self.src
    }

    pub fn dst(&self) -> &Endpoint {
        &self.dst
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// One decoded application-layer message.
///
/// `raw` holds the exact bytes the decoder consumed for this frame; replay
/// and persistence both depend on it being preserved verbatim.
pub struct Record {
    pub transport_kind: TransportKind,
    pub net: Flow,
    pub transport: Flow,
    pub seen: DateTime<Utc>,
    pub bodies: Vec<Body>,
    pub raw: Vec<u8>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("transport_kind", &self.transport_kind)
            .field("net", &self.net)
            .field("transport", &self.transport)
            .field("seen", &self.seen)
            .field("bodies", &self.bodies.len())
            .field("raw_len", &self.raw.len())
            .finish()
    }
}

/// Result of one successful decode call.
pub struct Decoded {
    /// Structured bodies for one framed message. Empty means "consume the
    /// bytes but publish nothing" (skip frame).
    pub bodies: Vec<Body>,
    /// Bytes consumed from the front of the buffer.
    pub consumed: usize,
}

/// The pluggable protocol contract an embedding application supplies.
///
/// `decode` runs on the capture thread (and again on load); `brief` and
/// `detail` run on the UI thread. Implementations are shared across threads,
/// hence the `Send + Sync` bound.
pub trait Codec: Send + Sync + 'static {
    /// Try to frame and parse one message from the front of `buf`.
    ///
    /// Return [`DecodeError::InsufficientBytes`] when the buffer does not yet
    /// hold a complete frame. On success, `consumed` reports how many bytes
    /// belong to this frame; they are removed from the stream buffer and
    /// become the record's raw bytes.
    fn decode(&self, net: &Flow, transport: &Flow, buf: &[u8]) -> Result<Decoded, DecodeError>;

    /// Short column strings for the brief table, one per configured column.
    fn brief(&self, record: &Record) -> Vec<String>;

    /// Long free-form description for the detail pane.
    fn detail(&self, record: &Record) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display_ipv4() {
        let ep = Endpoint::from_ip("192.168.1.5".parse().unwrap());
        assert_eq!(ep.to_string(), "192.168.1.5");
        assert_eq!(ep.kind(), EndpointKind::Ipv4);
        assert_eq!(ep.raw(), &[192, 168, 1, 5]);
    }

    #[test]
    fn endpoint_display_ipv6() {
        let ep = Endpoint::from_ip("2001:db8::1".parse().unwrap());
        assert_eq!(ep.to_string(), "2001:db8::1");
        assert_eq!(ep.raw().len(), 16);
    }

    #[test]
    fn endpoint_display_port() {
        assert_eq!(Endpoint::tcp_port(8080).to_string(), "8080");
        assert_eq!(Endpoint::udp_port(53).raw(), &[0, 53]);
    }

    #[test]
    fn endpoint_from_parts_validates_length() {
        assert!(Endpoint::from_parts(EndpointKind::Ipv4, vec![10, 0, 0, 1]).is_ok());
        let err = Endpoint::from_parts(EndpointKind::Ipv4, vec![10, 0, 0]).unwrap_err();
        assert!(matches!(err, EndpointError::BadLength { want: 4, got: 3 }));
        assert!(Endpoint::from_parts(EndpointKind::TcpPort, vec![1]).is_err());
    }

    #[test]
    fn flow_display() {
        let flow = Flow::new(
            Endpoint::from_ip("10.0.0.1".parse().unwrap()),
            Endpoint::from_ip("10.0.0.2".parse().unwrap()),
        );
        assert_eq!(flow.to_string(), "10.0.0.1 -> 10.0.0.2");
    }
}
