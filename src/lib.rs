//! flowdump — a framework for building interactive packet
//! capture-and-replay applications for custom application-layer protocols
//! over TCP or UDP.
//!
//! An application supplies a [`Codec`] (decode bytes into bodies, render a
//! brief table row, render a detail page) and optional [`ReplayHooks`],
//! then hands control to [`run`]. The framework captures live packets (or
//! reads a pcap file), reassembles TCP streams, drives the decoder,
//! presents records in a terminal UI, and can retransmit selected records
//! to an endpoint of the user's choosing.
//!
//! ```no_run
//! use std::sync::Arc;
//! use clap::Parser;
//! use flowdump::{
//!     BriefColumn, CaptureArgs, Codec, DecodeError, Decoded, Flow, NoHooks, Record,
//! };
//!
//! struct LineCodec;
//!
//! impl Codec for LineCodec {
//!     fn decode(&self, _net: &Flow, _transport: &Flow, buf: &[u8])
//!         -> Result<Decoded, DecodeError>
//!     {
//!         let Some(end) = buf.iter().position(|&b| b == b'\n') else {
//!             return Err(DecodeError::InsufficientBytes);
//!         };
//!         let line = String::from_utf8_lossy(&buf[..end]).into_owned();
//!         Ok(Decoded { bodies: vec![Box::new(line)], consumed: end + 1 })
//!     }
//!
//!     fn brief(&self, record: &Record) -> Vec<String> {
//!         let line = record.bodies[0].downcast_ref::<String>().unwrap();
//!         vec![line.chars().take(16).collect()]
//!     }
//!
//!     fn detail(&self, record: &Record) -> String {
//!         record.bodies[0].downcast_ref::<String>().unwrap().clone()
//!     }
//! }
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     capture: CaptureArgs,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse();
//!     flowdump::run(
//!         cli.capture,
//!         Arc::new(LineCodec),
//!         Arc::new(NoHooks),
//!         vec![BriefColumn::new("Line", 16)],
//!     )
//!     .await
//! }
//! ```
//!
//! Logs go to `<program>.log` next to the binary; control the level with
//! `RUST_LOG` (for example `RUST_LOG=flowdump=debug`).

pub mod app;
pub mod capture;
pub mod cli;
pub mod persist;
pub mod record;
pub mod replay;
pub mod store;
pub mod tui;
pub mod ui;

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

pub use app::{App, BriefColumn, DETAIL, FROZEN, MULTI, STOP};
pub use cli::CaptureArgs;
pub use record::{
    Body, Codec, DecodeError, Decoded, Endpoint, EndpointKind, Flow, Record, TransportKind,
};
pub use replay::{NoHooks, ReplayConn, ReplayHooks};

use crate::capture::{dispatch, PacketSource};

/// Set up the file log backend. The TUI owns stdout, so everything goes to
/// `<program>.log`.
fn init_logging() -> Result<()> {
    let program = std::env::args().next().unwrap_or_else(|| "flowdump".into());
    let path = format!("{}.log", program);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Open the capture, start the pipeline, and run the UI until the user
/// quits. Blocks for the life of the application.
///
/// Fatal errors (capture open, filter, log file) are returned; everything
/// after startup surfaces in the prompt line instead.
pub async fn run(
    args: CaptureArgs,
    codec: Arc<dyn Codec>,
    hooks: Arc<dyn ReplayHooks>,
    columns: Vec<BriefColumn>,
) -> Result<()> {
    if columns.is_empty() {
        bail!("at least one brief column is required");
    }

    init_logging()?;

    let source = PacketSource::open(&args).context("capture setup failed")?;

    let (record_tx, record_rx) = tokio::sync::mpsc::channel(dispatch::CHANNEL_CAPACITY);
    let (notice_tx, notice_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut app = App::new(args.capacity(), codec.clone(), hooks, columns, notice_tx);

    // loading a saved capture starts with live intake stopped
    if let Some(path) = &args.load {
        app.toggle(STOP);
        app.do_load(path);
    }

    let capture_codec = codec.clone();
    tokio::task::spawn_blocking(move || dispatch::run(source, capture_codec, record_tx));

    tui::run(&mut app, record_rx, notice_rx).await
}
