//! Framework command-line flags.
//!
//! `CaptureArgs` derives [`clap::Args`] rather than `Parser` so embedding
//! applications can `#[command(flatten)]` it into their own argument struct
//! and add flags of their own next to it.

use std::path::PathBuf;

use clap::Args;

use crate::store::MAX_CAPACITY;

/// Default BPF filter applied to live and offline captures.
pub const DEFAULT_FILTER: &str = "tcp and host localhost";

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    /// Interface to get packets from
    #[arg(short = 'i', long = "iface", default_value = "any")]
    pub iface: String,

    /// Read packets from a pcap file instead of a live interface
    #[arg(short = 'r', long = "read")]
    pub file: Option<PathBuf>,

    /// BPF filter for the capture
    #[arg(short = 'f', long = "filter", default_value = DEFAULT_FILTER)]
    pub filter: String,

    /// Max in-memory records; the oldest half is dropped when full
    #[arg(short = 'm', long = "max-records", default_value_t = MAX_CAPACITY as u32)]
    pub max_records: u32,

    /// Load records from this file on startup (capture starts stopped)
    #[arg(short = 'l', long = "load")]
    pub load: Option<PathBuf>,
}

impl Default for CaptureArgs {
    fn default() -> Self {
        Self {
            iface: "any".to_string(),
            file: None,
            filter: DEFAULT_FILTER.to_string(),
            max_records: MAX_CAPACITY as u32,
            load: None,
        }
    }
}

impl CaptureArgs {
    /// Store capacity clamped to `[1, 65535]`.
    pub fn capacity(&self) -> usize {
        (self.max_records as usize).clamp(1, MAX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        capture: CaptureArgs,
    }

    #[test]
    fn defaults_match_contract() {
        let cli = TestCli::parse_from(["app"]);
        assert_eq!(cli.capture.iface, "any");
        assert!(cli.capture.file.is_none());
        assert_eq!(cli.capture.filter, DEFAULT_FILTER);
        assert_eq!(cli.capture.capacity(), MAX_CAPACITY);
        assert!(cli.capture.load.is_none());
    }

    #[test]
    fn short_flags_parse() {
        let cli = TestCli::parse_from([
            "app", "-i", "eth0", "-r", "dump.pcap", "-f", "udp port 53", "-m", "100", "-l",
            "saved.bin",
        ]);
        assert_eq!(cli.capture.iface, "eth0");
        assert_eq!(cli.capture.filter, "udp port 53");
        assert_eq!(cli.capture.capacity(), 100);
        assert_eq!(cli.capture.file.unwrap().to_str().unwrap(), "dump.pcap");
        assert!(cli.capture.load.is_some());
    }

    #[test]
    fn capacity_clamps_low_and_high() {
        let cli = TestCli::parse_from(["app", "-m", "0"]);
        assert_eq!(cli.capture.capacity(), 1);
        let cli = TestCli::parse_from(["app", "-m", "4000000"]);
        assert_eq!(cli.capture.capacity(), MAX_CAPACITY);
    }
}
