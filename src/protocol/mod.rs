//! CDNET wire protocol.
//!
//! Defines the packet model and the codec between gateway packets and bus
//! frames. Three addressing levels share one frame layout:
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────────┬─────────┐
//! │ src_mac │ dst_mac │ len     │       CDNET payload      │ (CRC)   │
//! │   (1)   │   (1)   │ (2, BE) │        (≤ 259)           │  (2)    │
//! └─────────┴─────────┴─────────┴──────────────────────────┴─────────┘
//! ```
//!
//! The first payload byte selects the level:
//!
//! ```text
//! L0 request : 0 0 p p p p p p   dst_port in low 6 bits, data follows
//! L0 reply   : 0 1 0 0 0 0 0 0   data follows, ports from saved state
//! L1         : 1 0 M C 0 0 0 0   M: nets follow, C: multicast;
//!                                 then ports (u16 BE each), data
//! L2         : 1 1 F F S 0 0 0   FF: frag role, S: flow is seq-capable;
//!                                 then nets, ports, seq byte, data
//! ```
//!
//! The CRC trailer is owned by the transport layer and never touched here.

mod codec;
mod packet;

pub use codec::{decode, encode};
pub use packet::{CdnetPacket, FragKind, Level};

/// Total frame buffer size: 4-byte local header, payload, CRC trailer.
pub const FRAME_SIZE: usize = 265;

/// Local frame header size (src_mac, dst_mac, 2-byte len). The length
/// field is two bytes so it can represent a full 259-byte payload.
pub const FRAME_HDR_SIZE: usize = 4;

/// Space reserved for the transport CRC trailer.
pub const FRAME_TRAILER_SIZE: usize = 2;

/// Maximum CDNET payload bytes per frame.
pub const FRAME_PAYLOAD_MAX: usize = FRAME_SIZE - FRAME_HDR_SIZE - FRAME_TRAILER_SIZE;

/// Fixed L2 header size: level byte, nets, ports, seq byte.
pub const L2_HEADER_SIZE: usize = 8;

/// Maximum application data per L2 fragment.
pub const L2_FRAG_DATA_MAX: usize = FRAME_PAYLOAD_MAX - L2_HEADER_SIZE;

/// Maximum data bytes in an L0 request or reply (single header byte).
pub const L0_DATA_MAX: usize = FRAME_PAYLOAD_MAX - 1;

/// Protocol MTU: maximum data bytes in one gateway packet, independent of
/// the IP MTU. Oversized L2 payloads are fragmented down to
/// [`L2_FRAG_DATA_MAX`] chunks.
pub const PACKET_DATA_MAX: usize = 2000;

/// Highest port addressable by an L0 request header.
pub const L0_MAX_PORT: u16 = 0x3f;

/// Fixed source port stamped on outgoing L0 requests so replies can be
/// identified; the original port is restored from scheduler saved state.
pub const L0_REPLY_PORT: u16 = 0xcdcd;

/// Reserved port marking an L2 payload as an opaque IPv4 datagram.
pub const IPV4_TUNNEL_PORT: u16 = 0xcdf4;
