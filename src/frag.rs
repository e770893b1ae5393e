//! L2 fragmentation and reassembly.
//!
//! Seq-capable L2 payloads larger than one frame are split into a train
//! of FIRST/MORE/LAST fragments with a rolling mod-128 sequence counter.
//! Reassembly keys on the source mac: the bus is single-hop, so at most
//! one train per origin node can be in flight at a time.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::pool::PacketPool;
use crate::protocol::{CdnetPacket, FragKind, Level, L2_FRAG_DATA_MAX, PACKET_DATA_MAX};
use crate::types::SeqNum;

/// Egress splitter. Keeps one tx sequence counter per destination mac so
/// consecutive trains to the same node stay ordered.
pub struct Fragmenter {
    next_seq: [SeqNum; 256],
}

impl Fragmenter {
    pub fn new() -> Self {
        Self {
            next_seq: [SeqNum::default(); 256],
        }
    }

    /// Split one egress packet into wire-sized packets.
    ///
    /// Packets that fit in one frame pass through unchanged apart from
    /// the seq stamp. Larger payloads must be seq-capable L2; each
    /// fragment takes the next counter value for the destination.
    ///
    /// Pool exhaustion mid-split is fatal: a partial train would poison
    /// the receiver's reassembly state.
    pub fn split(
        &mut self,
        mut pkt: CdnetPacket,
        pool: &PacketPool,
    ) -> Result<Vec<CdnetPacket>, ProtocolError> {
        if pkt.data.len() > PACKET_DATA_MAX {
            return Err(ProtocolError::PayloadTooLarge {
                size: pkt.data.len(),
                max: PACKET_DATA_MAX,
            });
        }

        if pkt.data.len() <= pkt.data_capacity() {
            pkt.frag = FragKind::None;
            if pkt.seq {
                pkt.seq_num = self.advance(pkt.dst_mac.as_u8());
            }
            return Ok(vec![pkt]);
        }

        if pkt.level != Level::L2 || !pkt.seq {
            return Err(ProtocolError::FragWithoutSeq);
        }

        let data = std::mem::take(&mut pkt.data);
        let total = data.len();
        let count = total.div_ceil(L2_FRAG_DATA_MAX);
        let mut out = Vec::with_capacity(count);

        for (i, chunk) in data.chunks(L2_FRAG_DATA_MAX).enumerate() {
            let Some(mut frag) = pool.acquire() else {
                for p in out {
                    pool.release(p);
                }
                pool.release(pkt);
                return Err(ProtocolError::PoolExhaustedMidSplit);
            };
            frag.level = pkt.level;
            frag.src_mac = pkt.src_mac;
            frag.dst_mac = pkt.dst_mac;
            frag.src_net = pkt.src_net;
            frag.dst_net = pkt.dst_net;
            frag.src_port = pkt.src_port;
            frag.dst_port = pkt.dst_port;
            frag.seq = true;
            frag.seq_num = self.advance(pkt.dst_mac.as_u8());
            frag.frag = if i == 0 {
                FragKind::First
            } else if i == count - 1 {
                FragKind::Last
            } else {
                FragKind::More
            };
            frag.data.extend_from_slice(chunk);
            out.push(frag);
        }
        debug!(
            dst_mac = %pkt.dst_mac,
            total,
            fragments = out.len(),
            "split egress packet"
        );
        pool.release(pkt);
        Ok(out)
    }

    fn advance(&mut self, mac: u8) -> SeqNum {
        let seq = self.next_seq[usize::from(mac)];
        self.next_seq[usize::from(mac)] = seq.next();
        seq
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new()
    }
}

struct Pending {
    pkt: CdnetPacket,
    expect: SeqNum,
    last_activity: Instant,
}

/// Ingress reassembler, one pending train per source mac.
///
/// Desynchronized trains are dropped flow-locally: the pending entry and
/// the offending fragment go back to the pool and the error is surfaced
/// for logging, but other flows are unaffected.
pub struct Reassembler {
    pending: [Option<Pending>; 256],
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            pending: std::array::from_fn(|_| None),
        }
    }

    /// Feed one decoded packet. Returns the completed packet when a train
    /// finishes (or immediately for unfragmented packets).
    pub fn push(
        &mut self,
        pkt: CdnetPacket,
        now: Instant,
        pool: &PacketPool,
    ) -> Result<Option<CdnetPacket>, ProtocolError> {
        let mac = pkt.src_mac;
        let slot = &mut self.pending[usize::from(mac.as_u8())];

        match pkt.frag {
            FragKind::None => Ok(Some(pkt)),
            FragKind::First => {
                if let Some(old) = slot.take() {
                    pool.release(old.pkt);
                    pool.release(pkt);
                    return Err(ProtocolError::FragCollision { mac: mac.as_u8() });
                }
                let expect = pkt.seq_num.next();
                *slot = Some(Pending {
                    pkt,
                    expect,
                    last_activity: now,
                });
                Ok(None)
            }
            FragKind::More | FragKind::Last => {
                let Some(mut entry) = slot.take() else {
                    pool.release(pkt);
                    return Err(ProtocolError::OrphanFragment { mac: mac.as_u8() });
                };
                if pkt.seq_num != entry.expect {
                    let err = ProtocolError::FragSeqMismatch {
                        mac: mac.as_u8(),
                        expected: entry.expect.as_u8(),
                        got: pkt.seq_num.as_u8(),
                    };
                    pool.release(entry.pkt);
                    pool.release(pkt);
                    return Err(err);
                }
                if entry.pkt.data.len() + pkt.data.len() > PACKET_DATA_MAX {
                    let size = entry.pkt.data.len() + pkt.data.len();
                    pool.release(entry.pkt);
                    pool.release(pkt);
                    return Err(ProtocolError::PayloadTooLarge {
                        size,
                        max: PACKET_DATA_MAX,
                    });
                }
                entry.pkt.data.extend_from_slice(&pkt.data);
                let last = pkt.frag == FragKind::Last;
                pool.release(pkt);
                if last {
                    let mut done = entry.pkt;
                    done.frag = FragKind::None;
                    Ok(Some(done))
                } else {
                    entry.expect = entry.expect.next();
                    entry.last_activity = now;
                    *slot = Some(entry);
                    Ok(None)
                }
            }
        }
    }

    /// Evict trains that have seen no fragment for `timeout`.
    pub fn sweep(&mut self, now: Instant, timeout: Duration, pool: &PacketPool) {
        for slot in &mut self.pending {
            let stale = slot
                .as_ref()
                .is_some_and(|e| now.duration_since(e.last_activity) >= timeout);
            if stale {
                if let Some(entry) = slot.take() {
                    warn!(
                        src_mac = %entry.pkt.src_mac,
                        collected = entry.pkt.data.len(),
                        "reassembly timed out, dropping partial train"
                    );
                    pool.release(entry.pkt);
                }
            }
        }
    }

    /// Number of trains currently being collected.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
