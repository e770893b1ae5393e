//! Bidirectional mapping between IP packets and CDNET packets.
//!
//! The translator is stateless given the configured self addresses. The
//! IPv6 leg maps three address scopes onto the CDNET levels:
//!
//! - link-local (scope tag 0x80): L1, single segment, optional multicast
//! - unique-local (tag 0xa0): L1 multi-net, routed via the default router
//! - global prefix: L2, routed, fragmentation-capable
//!
//! The self address encodes the mapping: bytes 0..13 are the site /104
//! prefix, byte 13 the scope tag, byte 14 the net id, byte 15 the mac.
//! IPv4 is a deliberately coarse whole-datagram passthrough over L2.

mod checksum;

pub use checksum::{tcp_udp_v6_checksum, verify_v6_checksum};

use tracing::{debug, warn};

use crate::config::AddrConfig;
use crate::error::{DropReason, Error, Result};
use crate::protocol::{CdnetPacket, Level, IPV4_TUNNEL_PORT, PACKET_DATA_MAX};
use crate::types::{Mac, NetId};

/// Scope tag for link-local addresses (byte 13).
pub const TAG_LINK_LOCAL: u8 = 0x80;
/// Scope tag for unique-local addresses.
pub const TAG_UNIQUE_LOCAL: u8 = 0xa0;
/// Scope tag for L1 multicast group addresses.
pub const TAG_MULTICAST: u8 = 0xf0;

const IPPROTO_UDP: u8 = 17;
const IPV6_HDR_LEN: usize = 40;
const UDP_HDR_LEN: usize = 8;

/// Stateless IP ↔ CDNET address translator.
pub struct AddressTranslator {
    self6: [u8; 16],
    router6: Option<[u8; 16]>,
    global6: Option<[u8; 16]>,
    router6_global: Option<[u8; 16]>,
    self4: Option<[u8; 4]>,
    mask4: u32,
    router4: Option<[u8; 4]>,
}

impl AddressTranslator {
    pub fn new(addr: &AddrConfig) -> Result<Self> {
        let self6 = addr
            .self6
            .ok_or_else(|| Error::InvalidConfig("addr.self6 is not set".into()))?;

        let mask4 = if addr.prefix4 == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(addr.prefix4.min(32)))
        };

        Ok(Self {
            self6: self6.octets(),
            router6: addr.router6.map(|a| a.octets()),
            global6: addr.global6.map(|a| a.octets()),
            router6_global: addr.router6_global.map(|a| a.octets()),
            self4: addr.self4.map(|a| a.octets()),
            mask4,
            router4: addr.router4.map(|a| a.octets()),
        })
    }

    /// Local node mac, taken from the self address.
    pub fn self_mac(&self) -> Mac {
        Mac(self.self6[15])
    }

    /// Local net id.
    pub fn self_net(&self) -> NetId {
        NetId(self.self6[14])
    }

    fn prefix_matches(&self, addr: &[u8]) -> bool {
        addr[..13] == self.self6[..13]
    }

    fn is_supported_multicast(addr: &[u8]) -> bool {
        // ff02::1 and ff05::1 style all-nodes groups
        addr[0] == 0xff
            && (addr[1] == 0x02 || addr[1] == 0x05)
            && addr[2..15].iter().all(|b| *b == 0)
            && addr[15] == 1
    }

    /// Translate one raw IP packet into a CDNET packet, in place.
    pub fn ip_to_cdnet(&self, ip: &[u8], pkt: &mut CdnetPacket) -> std::result::Result<(), DropReason> {
        if ip.is_empty() {
            return Err(DropReason::Malformed("empty packet"));
        }
        match ip[0] >> 4 {
            6 => self.ipv6_to_cdnet(ip, pkt),
            4 => self.ipv4_to_cdnet(ip, pkt),
            _ => Err(DropReason::Malformed("unknown IP version")),
        }
    }

    fn ipv6_to_cdnet(&self, ip: &[u8], pkt: &mut CdnetPacket) -> std::result::Result<(), DropReason> {
        if ip.len() < IPV6_HDR_LEN {
            return Err(DropReason::Malformed("IPv6 header truncated"));
        }
        let src = &ip[8..24];
        let dst = &ip[24..40];

        if src.iter().all(|b| *b == 0) {
            return Err(DropReason::UnspecifiedSource);
        }
        let dst_is_multicast = dst[0] == 0xff;
        if dst_is_multicast && !Self::is_supported_multicast(dst) {
            return Err(DropReason::UnsupportedMulticast);
        }

        pkt.reset();

        // Classify by source scope, then resolve the destination.
        if self.prefix_matches(src) && src[13] == TAG_LINK_LOCAL && src[15] == self.self6[15] {
            pkt.level = Level::L1;
            pkt.src_mac = self.self_mac();
            if dst_is_multicast {
                pkt.dst_mac = Mac::BROADCAST;
                pkt.multicast = true;
            } else if self.prefix_matches(dst) && dst[13] == TAG_LINK_LOCAL {
                pkt.dst_mac = Mac(dst[15]);
            } else if self.prefix_matches(dst) && dst[13] == TAG_MULTICAST {
                pkt.dst_mac = Mac(dst[15]);
                pkt.multicast = true;
            } else {
                debug!("link-local source with out-of-scope destination, drop");
                return Err(DropReason::NoScopeMatch);
            }
        } else if self.prefix_matches(src)
            && src[13] == TAG_UNIQUE_LOCAL
            && src[14] == self.self6[14]
            && src[15] == self.self6[15]
        {
            if dst_is_multicast {
                // Multicast is unsupported in the unique-local scope
                return Err(DropReason::UnsupportedMulticast);
            }
            if !self.prefix_matches(dst) || dst[13] != TAG_UNIQUE_LOCAL {
                debug!("unique-local source with out-of-scope destination, drop");
                return Err(DropReason::NoScopeMatch);
            }
            pkt.level = Level::L1;
            pkt.src_mac = self.self_mac();
            pkt.src_net = self.self_net();
            pkt.dst_net = NetId(dst[14]);
            if dst[14] == self.self6[14] {
                pkt.dst_mac = Mac(dst[15]);
            } else if let Some(router) = self.router6 {
                pkt.dst_mac = Mac(router[15]);
            } else {
                debug!("cross-net destination with no router, drop");
                return Err(DropReason::NoRoute);
            }
        } else {
            // Global scope rides on L2
            let Some(global) = self.global6 else {
                debug!("global-scope traffic with no global self address, drop");
                return Err(DropReason::NoScopeMatch);
            };
            pkt.level = Level::L2;
            pkt.seq = true;
            pkt.src_mac = Mac(global[15]);
            pkt.src_net = NetId(global[14]);
            if dst[..14] == global[..14] {
                pkt.dst_net = NetId(dst[14]);
                pkt.dst_mac = Mac(dst[15]);
            } else if let Some(router) = self.router6_global {
                pkt.dst_net = NetId(router[14]);
                pkt.dst_mac = Mac(router[15]);
            } else {
                debug!("global destination with no router, drop");
                return Err(DropReason::NoRoute);
            }
        }

        if !pkt.multicast && pkt.dst_mac.is_broadcast() {
            return Err(DropReason::Malformed("broadcast mac as unicast destination"));
        }

        // Only UDP is carried above the network header on L1/L2
        let next_header = ip[6];
        if next_header != IPPROTO_UDP {
            warn!(protocol = next_header, "non-UDP transport, drop");
            return Err(DropReason::NotUdp(next_header));
        }
        if ip.len() < IPV6_HDR_LEN + UDP_HDR_LEN {
            return Err(DropReason::Malformed("UDP header truncated"));
        }

        let udp = &ip[IPV6_HDR_LEN..];
        pkt.src_port = u16::from_be_bytes([udp[0], udp[1]]);
        pkt.dst_port = u16::from_be_bytes([udp[2], udp[3]]);
        let udp_len = usize::from(u16::from_be_bytes([udp[4], udp[5]]));
        if udp_len < UDP_HDR_LEN || IPV6_HDR_LEN + udp_len > ip.len() {
            return Err(DropReason::Malformed("bad UDP length"));
        }
        let data = &ip[IPV6_HDR_LEN + UDP_HDR_LEN..IPV6_HDR_LEN + udp_len];

        if data.len() > PACKET_DATA_MAX
            || (pkt.level == Level::L1 && data.len() > pkt.data_capacity())
        {
            return Err(DropReason::Malformed("payload exceeds level capacity"));
        }
        pkt.data.extend_from_slice(data);
        debug!(
            level = ?pkt.level,
            src_port = pkt.src_port,
            dst_port = pkt.dst_port,
            len = pkt.data.len(),
            "ip -> cdnet"
        );
        Ok(())
    }

    /// IPv4 support is deliberately coarse: the whole datagram is passed
    /// opaquely over L2 under a reserved tunnel port.
    fn ipv4_to_cdnet(&self, ip: &[u8], pkt: &mut CdnetPacket) -> std::result::Result<(), DropReason> {
        let Some(self4) = self.self4 else {
            return Err(DropReason::NoScopeMatch);
        };
        if ip.len() < 20 {
            return Err(DropReason::Malformed("IPv4 header truncated"));
        }
        let total_len = usize::from(u16::from_be_bytes([ip[2], ip[3]]));
        if total_len < 20 || total_len > ip.len() || total_len > PACKET_DATA_MAX {
            return Err(DropReason::Malformed("bad IPv4 total length"));
        }
        let dst = [ip[16], ip[17], ip[18], ip[19]];

        let same_subnet =
            (u32::from_be_bytes(dst) & self.mask4) == (u32::from_be_bytes(self4) & self.mask4);

        pkt.reset();
        pkt.level = Level::L2;
        pkt.seq = true;
        pkt.src_mac = Mac(self4[3]);
        pkt.src_port = IPV4_TUNNEL_PORT;
        pkt.dst_port = IPV4_TUNNEL_PORT;
        if same_subnet {
            pkt.dst_mac = Mac(dst[3]);
        } else if let Some(router) = self.router4 {
            pkt.dst_mac = Mac(router[3]);
        } else {
            return Err(DropReason::NoRoute);
        }
        if pkt.dst_mac.is_broadcast() {
            return Err(DropReason::Malformed("broadcast mac as unicast destination"));
        }
        pkt.data.extend_from_slice(&ip[..total_len]);
        debug!(dst_mac = %pkt.dst_mac, len = total_len, "ip -> cdnet (v4 passthrough)");
        Ok(())
    }

    /// Reconstruct an IP packet from a CDNET packet. Returns the number
    /// of bytes written into `out`.
    pub fn cdnet_to_ip(&self, pkt: &CdnetPacket, out: &mut [u8]) -> std::result::Result<usize, DropReason> {
        if pkt.level == Level::L2 && pkt.dst_port == IPV4_TUNNEL_PORT {
            // Opaque IPv4 datagram
            if pkt.data.len() < 20 || pkt.data[0] >> 4 != 4 {
                return Err(DropReason::Malformed("passthrough payload is not IPv4"));
            }
            if out.len() < pkt.data.len() {
                return Err(DropReason::Malformed("output buffer too small"));
            }
            out[..pkt.data.len()].copy_from_slice(&pkt.data);
            return Ok(pkt.data.len());
        }

        let total = IPV6_HDR_LEN + UDP_HDR_LEN + pkt.data.len();
        if out.len() < total {
            return Err(DropReason::Malformed("output buffer too small"));
        }

        let (src_addr, dst_addr) = self.synth_v6_addrs(pkt)?;

        let udp_len = (UDP_HDR_LEN + pkt.data.len()) as u16;
        out[0] = 0x60; // version 6, traffic class / flow label zero
        out[1..4].fill(0);
        out[4..6].copy_from_slice(&udp_len.to_be_bytes());
        out[6] = IPPROTO_UDP;
        out[7] = 255; // hop limit
        out[8..24].copy_from_slice(&src_addr);
        out[24..40].copy_from_slice(&dst_addr);

        let udp = &mut out[IPV6_HDR_LEN..total];
        udp[0..2].copy_from_slice(&pkt.src_port.to_be_bytes());
        udp[2..4].copy_from_slice(&pkt.dst_port.to_be_bytes());
        udp[4..6].copy_from_slice(&udp_len.to_be_bytes());
        udp[6..8].fill(0);
        udp[UDP_HDR_LEN..].copy_from_slice(&pkt.data);

        let check = tcp_udp_v6_checksum(&src_addr, &dst_addr, IPPROTO_UDP, udp);
        out[IPV6_HDR_LEN + 6..IPV6_HDR_LEN + 8].copy_from_slice(&check.to_be_bytes());

        debug!(
            src_port = pkt.src_port,
            dst_port = pkt.dst_port,
            len = pkt.data.len(),
            checksum = format_args!("{check:#06x}"),
            "cdnet -> ip"
        );
        Ok(total)
    }

    /// Source address from the packet's origin, destination is the
    /// matching self address.
    fn synth_v6_addrs(&self, pkt: &CdnetPacket) -> std::result::Result<([u8; 16], [u8; 16]), DropReason> {
        match pkt.level {
            Level::L0 | Level::L1 => {
                let mut src = self.self6;
                let mut dst = self.self6;
                if pkt.is_multi_net() {
                    src[13] = TAG_UNIQUE_LOCAL;
                    src[14] = pkt.src_net.as_u8();
                    dst[13] = TAG_UNIQUE_LOCAL;
                } else {
                    src[13] = TAG_LINK_LOCAL;
                    src[14] = 0;
                    dst[13] = TAG_LINK_LOCAL;
                    dst[14] = 0;
                }
                src[15] = pkt.src_mac.as_u8();
                Ok((src, dst))
            }
            Level::L2 => {
                let Some(global) = self.global6 else {
                    return Err(DropReason::NoScopeMatch);
                };
                let mut src = global;
                src[14] = pkt.src_net.as_u8();
                src[15] = pkt.src_mac.as_u8();
                Ok((src, global))
            }
        }
    }
}
