//! Demo application: captures a length-prefixed text protocol.
//!
//! Each frame is a 4-byte big-endian length (prefix included) followed by
//! UTF-8 text. The post-send hook reads the peer's framed reply after every
//! replayed record.
//!
//! Try it against a pcap file:
//!
//! ```sh
//! cargo run --example lpdump -- -r capture.pcap -f "tcp port 9000"
//! ```

use std::io::Read;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use flowdump::{
    BriefColumn, CaptureArgs, Codec, DecodeError, Decoded, Flow, Record, ReplayConn, ReplayHooks,
};

const HEADER_LEN: usize = 4;

/// One decoded text frame.
struct Frame {
    text: String,
}

struct LpCodec;

impl Codec for LpCodec {
    fn decode(&self, _net: &Flow, _transport: &Flow, buf: &[u8]) -> Result<Decoded, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::InsufficientBytes);
        }
        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if frame_len < HEADER_LEN {
            return Err(DecodeError::Malformed(format!(
                "frame length {} shorter than its header",
                frame_len
            )));
        }
        if buf.len() < frame_len {
            return Err(DecodeError::InsufficientBytes);
        }

        let text = String::from_utf8_lossy(&buf[HEADER_LEN..frame_len]).into_owned();
        Ok(Decoded {
            bodies: vec![Box::new(Frame { text })],
            consumed: frame_len,
        })
    }

    fn brief(&self, record: &Record) -> Vec<String> {
        let Some(frame) = record.bodies.first().and_then(|b| b.downcast_ref::<Frame>()) else {
            return vec![];
        };
        vec![
            frame.text.chars().take(16).collect(),
            format!("{}:{}", record.net.src(), record.transport.src()),
            format!("{}:{}", record.net.dst(), record.transport.dst()),
            record.seen.format("%H:%M:%S%.3f").to_string(),
        ]
    }

    fn detail(&self, record: &Record) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Src: {}:{}\n",
            record.net.src(),
            record.transport.src()
        ));
        out.push_str(&format!(
            "Dst: {}:{}\n",
            record.net.dst(),
            record.transport.dst()
        ));
        out.push_str(&format!("Seen: {}\n\n", record.seen));
        for body in &record.bodies {
            if let Some(frame) = body.downcast_ref::<Frame>() {
                out.push_str(&frame.text);
                out.push('\n');
            }
        }
        out
    }
}

/// Reads the framed reply after each send so the connection drains before
/// the next record goes out.
struct ReadReply;

impl ReplayHooks for ReadReply {
    fn post_send(&self, conn: &mut ReplayConn, _record: &Record) -> Result<()> {
        conn.set_read_timeout(Some(std::time::Duration::from_secs(1)))?;

        let mut header = [0u8; HEADER_LEN];
        conn.read_exact(&mut header)?;
        let frame_len = u32::from_be_bytes(header) as usize;
        if frame_len < HEADER_LEN {
            anyhow::bail!("reply frame length {} shorter than its header", frame_len);
        }

        let mut body = vec![0u8; frame_len - HEADER_LEN];
        conn.read_exact(&mut body)?;
        tracing::debug!(len = frame_len, "reply drained");
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "length-prefixed text protocol dumper")]
struct Cli {
    #[command(flatten)]
    capture: CaptureArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    flowdump::run(
        cli.capture,
        Arc::new(LpCodec),
        Arc::new(ReadReply),
        vec![
            BriefColumn::new("Text", 16),
            BriefColumn::new("Src", 21),
            BriefColumn::new("Dst", 21),
            BriefColumn::new("Time", 12),
        ],
    )
    .await
}
