//! Reliable file-transfer protocol over unreliable UDP datagrams.
//!
//! This crate is the reliability engine only: wire codec, segmenter /
//! reassembler, and the sender/receiver state machines. Every engine here is
//! pure logic — no sockets, no threads, no clock of its own beyond the
//! `quanta::Instant` values callers pass in. Binaries in `udpftp-server` and
//! `udpftp-client` own the actual I/O.

pub mod error;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod stats;
pub mod wire;

pub use error::Error;
pub use receiver::{Receiver, ReceiverConfig, ReceiverState};
pub use sender::{Sender, SenderConfig, SenderOutcome};
pub use stats::{ReceiverStats, SenderStats};
pub use wire::{Header, PacketType, MAX_PAYLOAD};

/// Parses a `GET /<name>` request payload, rejecting `..` segments and a
/// leading `/` after the delimiter. Shared by the server dispatcher and
/// exercised directly in tests here since it's pure string logic.
pub fn parse_get_request(payload: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(payload).ok()?;
    let name = text.strip_prefix("GET /")?;
    let name = name.trim_end_matches(['\n', '\r']);
    if name.is_empty() || name.starts_with('/') || name.split('/').any(|part| part == "..") {
        return None;
    }
    Some(name)
}

/// Parses a `RESEND <seq>(,<seq>)*` request payload into a list of segment
/// indices. Malformed entries are skipped rather than failing the whole
/// request, matching the protocol's tolerant-filtering stance on RESEND.
pub fn parse_resend_request(payload: &[u8]) -> Option<Vec<u32>> {
    let text = std::str::from_utf8(payload).ok()?;
    let rest = text.strip_prefix("RESEND ")?;
    let seqs: Vec<u32> = rest.split(',').filter_map(|s| s.trim().parse().ok()).collect();
    Some(seqs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_get_request() {
        assert_eq!(parse_get_request(b"GET /report.txt"), Some("report.txt"));
    }

    #[test]
    fn rejects_parent_traversal() {
        assert_eq!(parse_get_request(b"GET /../secret"), None);
        assert_eq!(parse_get_request(b"GET /a/../b"), None);
    }

    #[test]
    fn rejects_double_leading_slash() {
        assert_eq!(parse_get_request(b"GET //etc/passwd"), None);
    }

    #[test]
    fn parses_resend_list() {
        assert_eq!(parse_resend_request(b"RESEND 1,2,3"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn resend_skips_malformed_entries() {
        assert_eq!(parse_resend_request(b"RESEND 1,x,3"), Some(vec![1, 3]));
    }
}
