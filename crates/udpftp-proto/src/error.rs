use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong decoding a packet or running a transfer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad magic or unknown packet type")]
    BadMagic,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("truncated packet")]
    Truncated,

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("forbidden path: {0}")]
    ForbiddenPath(String),

    #[error("peer unreachable after {0} retries")]
    PeerUnreachable(u32),

    #[error("incomplete delivery: {0} segment(s) never acked")]
    IncompleteDelivery(usize),

    #[error("transfer stalled: no data for {0:?}")]
    TransferStalled(Duration),

    #[error("inconsistent payload for segment {0}")]
    InconsistentPayload(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
