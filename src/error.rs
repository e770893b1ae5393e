//! Error types for cdgate.
//!
//! Two families, mirroring the data plane's error taxonomy: `Error` covers
//! conditions that propagate (fatal protocol violations, setup failures),
//! while `DropReason` covers recoverable per-packet drops that the caller
//! handles locally by freeing buffers and continuing.

use std::io;

use thiserror::Error;

/// Result type alias for cdgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cdgate.
#[derive(Error, Debug)]
pub enum Error {
    /// Fatal wire-level protocol violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Transport / device errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("TUN device error: {0}")]
    Tun(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Fatal wire-level protocol violations.
///
/// These indicate the bus link or a peer is desynchronized in a way the
/// gateway cannot paper over. Fragment desync is recovered flow-locally
/// (the pending train is discarded), but still surfaces as this type so
/// callers can log it loudly.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("fragment sequence mismatch from mac {mac:#04x}: expected {expected}, got {got}")]
    FragSeqMismatch { mac: u8, expected: u8, got: u8 },

    #[error("fragment from mac {mac:#04x} with no pending reassembly")]
    OrphanFragment { mac: u8 },

    #[error("FIRST fragment from mac {mac:#04x} while reassembly already pending")]
    FragCollision { mac: u8 },

    #[error("packet pool exhausted while splitting an oversized payload")]
    PoolExhaustedMidSplit,

    #[error("payload too large for level: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("port {port:#06x} not encodable at this level")]
    PortOutOfRange { port: u16 },

    #[error("fragmenting a flow not marked seq-capable")]
    FragWithoutSeq,
}

/// Recoverable per-packet drop conditions.
///
/// Returning one of these means: free any borrowed buffer, discard the
/// unit, continue the loop. Never fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("unspecified source address")]
    UnspecifiedSource,

    #[error("unsupported multicast destination")]
    UnsupportedMulticast,

    #[error("destination outside all configured scopes")]
    NoScopeMatch,

    #[error("no route and no default router configured")]
    NoRoute,

    #[error("transport protocol {0} is not UDP")]
    NotUdp(u8),

    #[error("frame pool exhausted")]
    PoolExhausted,

    #[error("reply from mac {0:#04x} with no outstanding request")]
    UnexpectedReply(u8),
}
