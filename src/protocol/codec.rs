//! Codec between gateway packets and bus frames.
//!
//! Encoding failures are `ProtocolError`: an unencodable packet means the
//! upstream classifier produced something invalid, which must not reach
//! the wire. Decoding failures are `DropReason`: malformed inbound frames
//! are dropped and the loop continues.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{DropReason, ProtocolError};
use crate::pool::Frame;
use crate::types::{NetId, SeqNum};

use super::packet::{CdnetPacket, FragKind, Level};
use super::{L0_MAX_PORT, L0_REPLY_PORT};

const L0_REPLY_HDR: u8 = 0x40;
const L1_BASE: u8 = 0x80;
const L1_MULTI_NET: u8 = 0x20;
const L1_MULTICAST: u8 = 0x10;
const L2_BASE: u8 = 0xc0;
const L2_SEQ: u8 = 0x08;

/// Encode a packet into a frame, stamping the local header.
pub fn encode(pkt: &CdnetPacket, frame: &mut Frame) -> Result<(), ProtocolError> {
    if pkt.data.len() > pkt.data_capacity() {
        return Err(ProtocolError::PayloadTooLarge {
            size: pkt.data.len(),
            max: pkt.data_capacity(),
        });
    }

    let len;
    {
        let buf = frame.payload_area_mut();
        match pkt.level {
            Level::L0 => {
                if pkt.src_port == L0_REPLY_PORT {
                    // Request: dst_port fits the 6-bit header field.
                    if pkt.dst_port > L0_MAX_PORT {
                        return Err(ProtocolError::PortOutOfRange { port: pkt.dst_port });
                    }
                    buf[0] = pkt.dst_port as u8;
                } else if pkt.dst_port == L0_REPLY_PORT {
                    buf[0] = L0_REPLY_HDR;
                } else {
                    return Err(ProtocolError::PortOutOfRange { port: pkt.dst_port });
                }
                buf[1..1 + pkt.data.len()].copy_from_slice(&pkt.data);
                len = 1 + pkt.data.len();
            }
            Level::L1 => {
                let mut hdr = L1_BASE;
                let mut pos = 1;
                if pkt.is_multi_net() {
                    hdr |= L1_MULTI_NET;
                    buf[pos] = pkt.src_net.as_u8();
                    buf[pos + 1] = pkt.dst_net.as_u8();
                    pos += 2;
                }
                if pkt.multicast {
                    hdr |= L1_MULTICAST;
                }
                buf[0] = hdr;
                BigEndian::write_u16(&mut buf[pos..pos + 2], pkt.src_port);
                BigEndian::write_u16(&mut buf[pos + 2..pos + 4], pkt.dst_port);
                pos += 4;
                buf[pos..pos + pkt.data.len()].copy_from_slice(&pkt.data);
                len = pos + pkt.data.len();
            }
            Level::L2 => {
                if pkt.frag.is_fragment() && !pkt.seq {
                    return Err(ProtocolError::FragWithoutSeq);
                }
                let mut hdr = L2_BASE | (pkt.frag.bits() << 4);
                if pkt.seq {
                    hdr |= L2_SEQ;
                }
                buf[0] = hdr;
                buf[1] = pkt.src_net.as_u8();
                buf[2] = pkt.dst_net.as_u8();
                BigEndian::write_u16(&mut buf[3..5], pkt.src_port);
                BigEndian::write_u16(&mut buf[5..7], pkt.dst_port);
                buf[7] = pkt.seq_num.as_u8();
                buf[8..8 + pkt.data.len()].copy_from_slice(&pkt.data);
                len = 8 + pkt.data.len();
            }
        }
    }

    frame.set_header(pkt.src_mac, pkt.dst_mac, len);
    Ok(())
}

/// Decode a frame into a packet in place.
///
/// L0 replies carry no ports on the wire; `l0_lp` supplies the saved
/// request port for the source node. A reply with no saved state is a
/// stray and is dropped.
pub fn decode(frame: &Frame, l0_lp: Option<u8>, pkt: &mut CdnetPacket) -> Result<(), DropReason> {
    let payload = frame.payload();
    if payload.is_empty() {
        return Err(DropReason::Malformed("empty payload"));
    }

    pkt.reset();
    pkt.src_mac = frame.src_mac();
    pkt.dst_mac = frame.dst_mac();

    let hdr = payload[0];
    match hdr >> 6 {
        0b00 => {
            pkt.level = Level::L0;
            pkt.dst_port = u16::from(hdr & 0x3f);
            pkt.src_port = L0_REPLY_PORT;
            pkt.data.extend_from_slice(&payload[1..]);
        }
        0b01 => {
            pkt.level = Level::L0;
            let lp = l0_lp.ok_or(DropReason::UnexpectedReply(frame.src_mac().as_u8()))?;
            pkt.src_port = u16::from(lp);
            pkt.dst_port = L0_REPLY_PORT;
            pkt.data.extend_from_slice(&payload[1..]);
        }
        0b10 => {
            pkt.level = Level::L1;
            pkt.multicast = hdr & L1_MULTICAST != 0;
            let mut pos = 1;
            if hdr & L1_MULTI_NET != 0 {
                if payload.len() < pos + 2 {
                    return Err(DropReason::Malformed("L1 header truncated"));
                }
                pkt.src_net = NetId(payload[pos]);
                pkt.dst_net = NetId(payload[pos + 1]);
                pos += 2;
            }
            if payload.len() < pos + 4 {
                return Err(DropReason::Malformed("L1 header truncated"));
            }
            pkt.src_port = BigEndian::read_u16(&payload[pos..pos + 2]);
            pkt.dst_port = BigEndian::read_u16(&payload[pos + 2..pos + 4]);
            pkt.data.extend_from_slice(&payload[pos + 4..]);
        }
        _ => {
            pkt.level = Level::L2;
            if payload.len() < 8 {
                return Err(DropReason::Malformed("L2 header truncated"));
            }
            pkt.frag = FragKind::from_bits((hdr >> 4) & 0b11);
            pkt.seq = hdr & L2_SEQ != 0;
            if pkt.frag.is_fragment() && !pkt.seq {
                return Err(DropReason::Malformed("fragment without seq flag"));
            }
            pkt.src_net = NetId(payload[1]);
            pkt.dst_net = NetId(payload[2]);
            pkt.src_port = BigEndian::read_u16(&payload[3..5]);
            pkt.dst_port = BigEndian::read_u16(&payload[5..7]);
            if payload[7] & 0x80 != 0 {
                return Err(DropReason::Malformed("seq high bit set"));
            }
            pkt.seq_num = SeqNum::new(payload[7]);
            pkt.data.extend_from_slice(&payload[8..]);
        }
    }

    Ok(())
}
