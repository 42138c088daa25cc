//! Save/load of captured records.
//!
//! Records are projected down to their flow endpoints, timestamp, and raw
//! bytes, then written as one bincode blob. Bodies are not persisted; the
//! decoder regenerates them from the raw bytes on load.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Codec, DecodeError, Endpoint, EndpointKind, Flow, Record, TransportKind};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("encode failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk projection of one record. Endpoints are stored as `(kind, raw)`
/// pairs and the timestamp as integer nanoseconds, so the blob round-trips
/// without depending on body types.
#[derive(Debug, Serialize, Deserialize)]
struct PersistRecord {
    transport_kind: TransportKind,
    net_src_kind: EndpointKind,
    net_src_raw: Vec<u8>,
    net_dst_kind: EndpointKind,
    net_dst_raw: Vec<u8>,
    transport_src_kind: EndpointKind,
    transport_src_raw: Vec<u8>,
    transport_dst_kind: EndpointKind,
    transport_dst_raw: Vec<u8>,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    seen: DateTime<Utc>,
    raw: Vec<u8>,
}

impl PersistRecord {
    fn project(record: &Record) -> Self {
        Self {
            transport_kind: record.transport_kind,
            net_src_kind: record.net.src().kind(),
            net_src_raw: record.net.src().raw().to_vec(),
            net_dst_kind: record.net.dst().kind(),
            net_dst_raw: record.net.dst().raw().to_vec(),
            transport_src_kind: record.transport.src().kind(),
            transport_src_raw: record.transport.src().raw().to_vec(),
            transport_dst_kind: record.transport.dst().kind(),
            transport_dst_raw: record.transport.dst().raw().to_vec(),
            seen: record.seen,
            raw: record.raw.clone(),
        }
    }

    fn net_flow(&self) -> Option<Flow> {
        let src = Endpoint::from_parts(self.net_src_kind, self.net_src_raw.clone()).ok()?;
        let dst = Endpoint::from_parts(self.net_dst_kind, self.net_dst_raw.clone()).ok()?;
        Some(Flow::new(src, dst))
    }

    fn transport_flow(&self) -> Option<Flow> {
        let src =
            Endpoint::from_parts(self.transport_src_kind, self.transport_src_raw.clone()).ok()?;
        let dst =
            Endpoint::from_parts(self.transport_dst_kind, self.transport_dst_raw.clone()).ok()?;
        Some(Flow::new(src, dst))
    }
}

/// Serialize `records` to `path`, truncating any existing file.
pub fn save(records: &[Arc<Record>], path: impl AsRef<Path>) -> Result<(), PersistError> {
    let projected: Vec<PersistRecord> =
        records.iter().map(|r| PersistRecord::project(r)).collect();
    let blob = bincode::serialize(&projected)?;
    fs::write(path, blob)?;
    Ok(())
}

/// Read `path` and reconstruct records, re-running `codec` over each entry's
/// raw bytes. Entries with invalid endpoints, failing decodes, or empty
/// bodies are skipped.
pub fn load(path: impl AsRef<Path>, codec: &dyn Codec) -> Result<Vec<Arc<Record>>, PersistError> {
    let blob = fs::read(path)?;
    let projected: Vec<PersistRecord> = bincode::deserialize(&blob)?;

    let mut records = Vec::with_capacity(projected.len());
    for entry in projected {
        let Some(net) = entry.net_flow() else {
            tracing::warn!("skipping persisted record with invalid net endpoints");
            continue;
        };
        let Some(transport) = entry.transport_flow() else {
            tracing::warn!("skipping persisted record with invalid transport endpoints");
            continue;
        };

        let decoded = match codec.decode(&net, &transport, &entry.raw) {
            Ok(d) => d,
            Err(DecodeError::InsufficientBytes) => {
                tracing::warn!(flow = %transport, "skipping persisted record: incomplete frame");
                continue;
            }
            Err(err) => {
                tracing::warn!(flow = %transport, %err, "skipping persisted record");
                continue;
            }
        };
        if decoded.bodies.is_empty() {
            continue;
        }

        records.push(Arc::new(Record {
            transport_kind: entry.transport_kind,
            net,
            transport,
            seen: entry.seen,
            bodies: decoded.bodies,
            raw: entry.raw,
        }));
    }

    Ok(records)
}
