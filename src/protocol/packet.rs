//! Gateway-internal CDNET packet model.

use crate::types::{Mac, NetId, SeqNum};

use super::{L0_DATA_MAX, L2_FRAG_DATA_MAX};

/// CDNET addressing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Single-hop request/reply to one node, minimal header, no routing.
    L0,
    /// Local-link addressing, optional multicast.
    L1,
    /// Routed, multi-net, supports fragmentation and larger payload.
    L2,
}

/// Fragmentation role of a packet within a fragment train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FragKind {
    #[default]
    None,
    First,
    More,
    Last,
}

impl FragKind {
    /// Two-bit wire encoding used in the L2 header byte.
    pub fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::First => 1,
            Self::More => 2,
            Self::Last => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => Self::First,
            2 => Self::More,
            3 => Self::Last,
            _ => Self::None,
        }
    }

    pub fn is_fragment(self) -> bool {
        self != Self::None
    }
}

/// A gateway-internal packet.
///
/// Exclusively owned by exactly one of: the free pool, an RX/TX path, or
/// the reassembly pending list, at any instant. `seq_num` is transient
/// reassembly state, meaningful only while `seq` is set.
#[derive(Debug, Clone)]
pub struct CdnetPacket {
    pub level: Level,
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub src_net: NetId,
    pub dst_net: NetId,
    pub multicast: bool,
    pub src_port: u16,
    pub dst_port: u16,
    pub frag: FragKind,
    /// Whether this flow carries a fragmentation sequence counter (L2 only).
    pub seq: bool,
    pub seq_num: SeqNum,
    pub data: Vec<u8>,
}

impl Default for CdnetPacket {
    fn default() -> Self {
        Self {
            level: Level::L1,
            src_mac: Mac(0),
            dst_mac: Mac(0),
            src_net: NetId(0),
            dst_net: NetId(0),
            multicast: false,
            src_port: 0,
            dst_port: 0,
            frag: FragKind::None,
            seq: false,
            seq_num: SeqNum::default(),
            data: Vec::new(),
        }
    }
}

impl CdnetPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum data bytes this packet may carry at its level.
    pub fn data_capacity(&self) -> usize {
        match self.level {
            Level::L0 => L0_DATA_MAX,
            // Level byte + ports; nets only when multi-net
            Level::L1 => {
                let nets = if self.is_multi_net() { 2 } else { 0 };
                super::FRAME_PAYLOAD_MAX - 1 - 4 - nets
            }
            Level::L2 => L2_FRAG_DATA_MAX,
        }
    }

    /// L1 packets crossing network segments carry both net bytes.
    pub fn is_multi_net(&self) -> bool {
        self.src_net != self.dst_net || self.src_net.as_u8() != 0
    }

    /// Reset all header state and truncate data, keeping the allocation.
    /// Used when a packet returns to the pool.
    pub fn reset(&mut self) {
        let data = std::mem::take(&mut self.data);
        *self = Self::default();
        self.data = data;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frag_bits_round_trip() {
        for kind in [FragKind::None, FragKind::First, FragKind::More, FragKind::Last] {
            assert_eq!(FragKind::from_bits(kind.bits()), kind);
        }
    }

    #[test]
    fn l2_capacity_is_251() {
        let pkt = CdnetPacket {
            level: Level::L2,
            ..CdnetPacket::default()
        };
        assert_eq!(pkt.data_capacity(), 251);
    }

    #[test]
    fn reset_keeps_allocation() {
        let mut pkt = CdnetPacket::new();
        pkt.data.extend_from_slice(&[0u8; 128]);
        pkt.src_port = 99;
        let cap = pkt.data.capacity();
        pkt.reset();
        assert!(pkt.data.is_empty());
        assert_eq!(pkt.src_port, 0);
        assert_eq!(pkt.data.capacity(), cap);
    }
}
