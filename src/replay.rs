//! Replay engine: retransmits captured raw bytes to a chosen endpoint.
//!
//! Runs on its own thread so the UI stays responsive. Sockets are plain
//! synchronous std types so the user hooks are ordinary `&mut` calls.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::record::{Record, TransportKind};

/// Dial timeout and per-send write deadline.
pub const IO_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("no usable address for {0}")]
    BadAddress(String),

    #[error("dial {addr} failed: {source}")]
    DialFailed { addr: String, source: io::Error },

    #[error("pre-replay hook failed: {0}")]
    PreReplayFailed(anyhow::Error),

    #[error("post-replay hook failed: {0}")]
    PostReplayFailed(anyhow::Error),
}

/// Hooks invoked around a replay batch and around each send.
///
/// `post_send` is the place to read the peer's response off `conn`; without
/// it the connection is closed as soon as the batch is written.
pub trait ReplayHooks: Send + Sync + 'static {
    fn pre_replay(&self, _conn: &mut ReplayConn, _records: &[Arc<Record>]) -> anyhow::Result<()> {
        Ok(())
    }

    fn pre_send(&self, _conn: &mut ReplayConn, _record: &Record) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_send(&self, _conn: &mut ReplayConn, _record: &Record) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_replay(&self, _conn: &mut ReplayConn) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hook set that does nothing around any send.
pub struct NoHooks;

impl ReplayHooks for NoHooks {}

/// Client connection handed to hooks. UDP sockets are connected, so reads
/// and writes go to the replay target either way.
pub enum ReplayConn {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl ReplayConn {
    fn dial(kind: TransportKind, addr: &str) -> Result<Self, ReplayError> {
        let resolved: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|_| ReplayError::BadAddress(addr.to_string()))?
            .collect();
        let target = resolved
            .first()
            .copied()
            .ok_or_else(|| ReplayError::BadAddress(addr.to_string()))?;

        match kind {
            TransportKind::Tcp => {
                let stream = TcpStream::connect_timeout(&target, IO_DEADLINE).map_err(|e| {
                    ReplayError::DialFailed {
                        addr: addr.to_string(),
                        source: e,
                    }
                })?;
                Ok(ReplayConn::Tcp(stream))
            }
            TransportKind::Udp => {
                let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(bind)
                    .and_then(|s| s.connect(target).map(|_| s))
                    .map_err(|e| ReplayError::DialFailed {
                        addr: addr.to_string(),
                        source: e,
                    })?;
                Ok(ReplayConn::Udp(socket))
            }
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            ReplayConn::Tcp(s) => s.set_read_timeout(timeout),
            ReplayConn::Udp(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            ReplayConn::Tcp(s) => s.set_write_timeout(timeout),
            ReplayConn::Udp(s) => s.set_write_timeout(timeout),
        }
    }
}

impl Read for ReplayConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReplayConn::Tcp(s) => s.read(buf),
            ReplayConn::Udp(s) => s.recv(buf),
        }
    }
}

impl Write for ReplayConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ReplayConn::Tcp(s) => s.write(buf),
            ReplayConn::Udp(s) => s.send(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ReplayConn::Tcp(s) => s.flush(),
            ReplayConn::Udp(_) => Ok(()),
        }
    }
}

/// Spawn a replay of `records` to `addr` on a dedicated thread. Outcome
/// messages are reported through `notify` for the prompt line.
pub fn spawn(
    kind: TransportKind,
    addr: String,
    records: Vec<Arc<Record>>,
    hooks: Arc<dyn ReplayHooks>,
    notify: UnboundedSender<String>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        match run(kind, &addr, &records, hooks.as_ref()) {
            Ok(()) => {
                let _ = notify.send(format!("Replay finished, addr: {}", addr));
            }
            Err(err) => {
                tracing::error!(%addr, %err, "replay failed");
                let _ = notify.send(format!("{}", err));
            }
        }
    })
}

/// Replay `records` in order over one connection.
///
/// Per-record failures (pre-send, write, post-send) skip to the next record;
/// dial and batch-hook failures abort the whole replay.
pub fn run(
    kind: TransportKind,
    addr: &str,
    records: &[Arc<Record>],
    hooks: &dyn ReplayHooks,
) -> Result<(), ReplayError> {
    let mut conn = ReplayConn::dial(kind, addr)?;
    tracing::info!(%addr, count = records.len(), "replay started");

    hooks
        .pre_replay(&mut conn, records)
        .map_err(ReplayError::PreReplayFailed)?;

    for (i, record) in records.iter().enumerate() {
        if let Err(err) = hooks.pre_send(&mut conn, record) {
            tracing::warn!(index = i, %err, "pre-send hook failed, skipping record");
            continue;
        }

        // Write deadline bounds the whole send; a write error is fatal for
        // this record only.
        if let Err(err) = conn
            .set_write_timeout(Some(IO_DEADLINE))
            .and_then(|_| conn.write_all(&record.raw))
        {
            tracing::warn!(index = i, %err, "send failed, skipping record");
            continue;
        }

        if let Err(err) = hooks.post_send(&mut conn, record) {
            tracing::warn!(index = i, %err, "post-send hook failed");
            continue;
        }
    }

    hooks
        .post_replay(&mut conn)
        .map_err(ReplayError::PostReplayFailed)?;

    Ok(())
}
