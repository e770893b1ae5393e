//! Core types used throughout cdgate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Single-byte node address on the bus (not an Ethernet address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mac(pub u8);

impl Mac {
    /// Broadcast / multicast sentinel. Never a valid unicast node mac.
    pub const BROADCAST: Self = Self(0xff);

    pub fn new(addr: u8) -> Self {
        Self(addr)
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<u8> for Mac {
    fn from(addr: u8) -> Self {
        Self(addr)
    }
}

/// Network segment identifier for multi-net (L1/L2) addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NetId(pub u8);

impl NetId {
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<u8> for NetId {
    fn from(net: u8) -> Self {
        Self(net)
    }
}

/// 7-bit rolling fragment sequence counter (mod 128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeqNum(u8);

impl SeqNum {
    /// Counter modulus. The high bit of the wire byte is reserved.
    pub const MODULO: u8 = 128;

    pub fn new(n: u8) -> Self {
        Self(n % Self::MODULO)
    }

    pub fn next(self) -> Self {
        Self((self.0 + 1) % Self::MODULO)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
