//! Capture-thread loop: routes packets from the source into the TCP
//! registry or the one-shot UDP decode, publishes records to the UI with
//! backpressure, and flushes stale flows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::Sender;

use crate::capture::stream::{decode_datagram, StreamRegistry, STALE_AFTER};
use crate::capture::{PacketSource, SourceEvent};
use crate::record::{Codec, Record, TransportKind};

/// Bounded channel capacity between the capture thread and the UI.
pub const CHANNEL_CAPACITY: usize = 1_000;

/// How often idle streams are checked for staleness.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Run the capture loop until the source closes or the UI side drops the
/// channel. Blocking by design; runs on a dedicated thread.
pub fn run(mut source: PacketSource, codec: Arc<dyn Codec>, tx: Sender<Arc<Record>>) {
    let mut registry = StreamRegistry::new(codec.clone());
    let mut last_flush = Instant::now();

    // blocking_send gives the backpressure the pipeline wants: when the UI
    // falls behind, the capture thread stalls and the kernel sheds load.
    let mut publish = |record: Record| tx.blocking_send(Arc::new(record)).is_ok();

    loop {
        match source.next_event() {
            SourceEvent::Packet(packet) => {
                let keep_going = match packet.kind {
                    TransportKind::Tcp => registry.feed(&packet, &mut publish),
                    TransportKind::Udp => decode_datagram(&codec, &packet, &mut publish),
                };
                if !keep_going {
                    tracing::info!("record channel closed, stopping capture");
                    return;
                }
            }
            SourceEvent::Idle => {}
            SourceEvent::Closed => {
                tracing::info!("packet source closed");
                return;
            }
        }

        if last_flush.elapsed() >= FLUSH_INTERVAL {
            registry.flush_idle(STALE_AFTER);
            last_flush = Instant::now();
        }
    }
}
