//! Per-flow TCP stream state: sequence-ordered reassembly feeding the
//! user decoder.
//!
//! Bytes reach the decoder in wire order with no duplicates and no gaps;
//! out-of-order segments are withheld until the hole in front of them is
//! filled or the stream is flushed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::capture::{CapturedPacket, TcpMeta};
use crate::record::{Codec, DecodeError, Flow, Record, TransportKind};

/// A stream is flushed once it has been idle this long.
pub const STALE_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    net: Flow,
    transport: Flow,
}

struct Stream {
    net: Flow,
    transport: Flow,
    /// Contiguous bytes not yet consumed by the decoder.
    pending: Vec<u8>,
    /// Sequence number the next in-order segment must carry.
    next_seq: Option<u32>,
    /// Future segments keyed by sequence number, withheld until contiguous.
    out_of_order: BTreeMap<u32, Vec<u8>>,
    last_seen: Instant,
    /// Set after a non-recoverable decode error; later bytes are discarded.
    dead: bool,
}

impl Stream {
    fn new(net: Flow, transport: Flow) -> Self {
        Self {
            net,
            transport,
            pending: Vec::new(),
            next_seq: None,
            out_of_order: BTreeMap::new(),
            last_seen: Instant::now(),
            dead: false,
        }
    }

    /// Fold one segment into the pending buffer. Returns true when new
    /// contiguous bytes were appended.
    fn reassemble(&mut self, seq: u32, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return false;
        }
        let expected = *self.next_seq.get_or_insert(seq);

        if seq == expected {
            self.pending.extend_from_slice(payload);
            self.next_seq = Some(seq.wrapping_add(payload.len() as u32));
            self.drain_out_of_order();
            true
        } else if seq_after(seq, expected) {
            // hole in front of this segment: withhold until it fills
            self.out_of_order.entry(seq).or_insert_with(|| payload.to_vec());
            false
        } else {
            // retransmit or partial overlap
            let end = seq.wrapping_add(payload.len() as u32);
            if !seq_after(end, expected) {
                return false; // full duplicate
            }
            let overlap = expected.wrapping_sub(seq) as usize;
            self.pending.extend_from_slice(&payload[overlap..]);
            self.next_seq = Some(end);
            self.drain_out_of_order();
            true
        }
    }

    /// Pull withheld segments that are now contiguous into the buffer.
    fn drain_out_of_order(&mut self) {
        while let Some(expected) = self.next_seq {
            let Some((seq, payload)) = self.out_of_order.pop_first() else {
                break;
            };
            if seq == expected {
                self.pending.extend_from_slice(&payload);
                self.next_seq = Some(seq.wrapping_add(payload.len() as u32));
            } else if seq_after(seq, expected) {
                // still future: put it back and wait for the hole to fill
                self.out_of_order.insert(seq, payload);
                break;
            } else {
                // the hole was filled past this segment's start
                let end = seq.wrapping_add(payload.len() as u32);
                if seq_after(end, expected) {
                    let overlap = expected.wrapping_sub(seq) as usize;
                    self.pending.extend_from_slice(&payload[overlap..]);
                    self.next_seq = Some(end);
                }
            }
        }
    }
}

/// `a` is strictly later than `b` in sequence space (RFC 1982 style
/// wrap-around comparison).
fn seq_after(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < u32::MAX / 2
}

/// Owns every live TCP stream and drives the decode loop on append.
pub struct StreamRegistry {
    codec: Arc<dyn Codec>,
    streams: HashMap<StreamKey, Stream>,
}

impl StreamRegistry {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            streams: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Feed one TCP packet. New contiguous bytes drive the decode loop;
    /// each completed frame is handed to `publish`. FIN/RST close the
    /// stream after a final decode pass.
    ///
    /// `publish` returns false to stop (channel gone); the return value
    /// propagates that.
    pub fn feed(
        &mut self,
        packet: &CapturedPacket,
        publish: &mut dyn FnMut(Record) -> bool,
    ) -> bool {
        let Some(TcpMeta { seq, fin, rst }) = packet.tcp else {
            return true;
        };
        let key = StreamKey {
            net: packet.net.clone(),
            transport: packet.transport.clone(),
        };

        let stream = self.streams.entry(key.clone()).or_insert_with(|| {
            tracing::info!(net = %packet.net, transport = %packet.transport, "new stream");
            Stream::new(packet.net.clone(), packet.transport.clone())
        });
        stream.last_seen = Instant::now();

        let mut keep_going = true;
        if !stream.dead && stream.reassemble(seq, &packet.payload) {
            keep_going = Self::drive_decode(&self.codec, stream, publish);
        }

        if fin || rst {
            tracing::info!(net = %packet.net, transport = %packet.transport, "stream closed");
            self.streams.remove(&key);
        }
        keep_going
    }

    /// Drop streams idle longer than `stale_after`.
    pub fn flush_idle(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.streams.retain(|key, stream| {
            let keep = now.duration_since(stream.last_seen) < stale_after;
            if !keep {
                tracing::info!(net = %key.net, transport = %key.transport, "flushing idle stream");
            }
            keep
        });
    }

    /// Run the decoder over a stream's pending bytes until it reports an
    /// incomplete frame. A non-recoverable error kills the stream.
    fn drive_decode(
        codec: &Arc<dyn Codec>,
        stream: &mut Stream,
        publish: &mut dyn FnMut(Record) -> bool,
    ) -> bool {
        loop {
            let decoded = match codec.decode(&stream.net, &stream.transport, &stream.pending) {
                Ok(d) => d,
                Err(DecodeError::InsufficientBytes) => return true,
                Err(err) => {
                    tracing::warn!(
                        net = %stream.net,
                        transport = %stream.transport,
                        %err,
                        "decode failed, dropping stream"
                    );
                    stream.pending.clear();
                    stream.out_of_order.clear();
                    stream.dead = true;
                    return true;
                }
            };

            let consumed = decoded.consumed.min(stream.pending.len());
            if consumed == 0 {
                // a zero-byte success would loop forever
                if !decoded.bodies.is_empty() {
                    tracing::warn!(
                        transport = %stream.transport,
                        "decoder returned bodies without consuming bytes, ignoring"
                    );
                }
                return true;
            }

            let raw: Vec<u8> = stream.pending.drain(..consumed).collect();
            if decoded.bodies.is_empty() {
                continue; // skip frame
            }

            let record = Record {
                transport_kind: TransportKind::Tcp,
                net: stream.net.clone(),
                transport: stream.transport.clone(),
                seen: Utc::now(),
                bodies: decoded.bodies,
                raw,
            };
            if !publish(record) {
                return false;
            }
        }
    }
}

/// Run the decoder once over a whole UDP datagram. Decode errors drop the
/// packet; they are surfaced in the log, never swallowed.
pub fn decode_datagram(
    codec: &Arc<dyn Codec>,
    packet: &CapturedPacket,
    publish: &mut dyn FnMut(Record) -> bool,
) -> bool {
    let decoded = match codec.decode(&packet.net, &packet.transport, &packet.payload) {
        Ok(d) => d,
        Err(err) => {
            tracing::debug!(transport = %packet.transport, %err, "udp decode failed, dropping");
            return true;
        }
    };
    if decoded.bodies.is_empty() {
        return true;
    }

    let consumed = decoded.consumed.min(packet.payload.len());
    let record = Record {
        transport_kind: TransportKind::Udp,
        net: packet.net.clone(),
        transport: packet.transport.clone(),
        seen: Utc::now(),
        bodies: decoded.bodies,
        raw: packet.payload[..consumed].to_vec(),
    };
    publish(record)
}
