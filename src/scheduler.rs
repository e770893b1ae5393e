//! L0 transaction scheduler.
//!
//! Legacy L0 nodes answer exactly one request at a time and their replies
//! carry no port information, so the gateway serializes traffic per node:
//! at most one request is outstanding per mac, later requests wait in a
//! FIFO queue, and the saved ports are restored when the reply arrives.
//! Nodes that never answer are force-advanced by a timeout sweep so one
//! dead node cannot wedge its queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pool::Frame;
use crate::protocol::{CdnetPacket, Level, L0_MAX_PORT};
use crate::types::Mac;

/// Whether an egress packet must be demoted to an L0 request.
///
/// Legacy nodes listen on the low port range and speak a command format
/// whose first byte keeps the top two bits clear. Broadcast and cross-net
/// traffic stays at its own level; multicast to a group mac is eligible
/// and gets gated per group.
pub fn needs_reply(pkt: &CdnetPacket) -> bool {
    pkt.level == Level::L1
        && !pkt.dst_mac.is_broadcast()
        && !pkt.is_multi_net()
        && pkt.dst_port <= L0_MAX_PORT
        && pkt.data.first().is_some_and(|b| b & 0xc0 == 0)
}

/// An encoded L0 request waiting its turn, with the state needed to
/// reconstruct the reply's ports.
pub struct PendingRequest {
    pub frame: Frame,
    /// Original source port, restored as the reply's destination.
    pub src_port: u16,
    /// Requested node port, restored as the reply's source.
    pub lp: u8,
}

struct Outstanding {
    src_port: u16,
    lp: u8,
    sent_at: Instant,
}

#[derive(Default)]
struct NodeEntry {
    queue: VecDeque<PendingRequest>,
    outstanding: Option<Outstanding>,
}

impl NodeEntry {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.outstanding.is_none()
    }
}

struct McastGroup {
    mac: Mac,
    members: Vec<Mac>,
    queue: VecDeque<PendingRequest>,
}

/// Per-node request serializer with multicast gating.
pub struct L0Scheduler {
    nodes: Vec<NodeEntry>,
    /// Macs with queued or outstanding work, so sweeps touch only live
    /// entries instead of all 256.
    active: Vec<u8>,
    groups: Vec<McastGroup>,
    timeout: Duration,
}

impl L0Scheduler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            nodes: (0..256).map(|_| NodeEntry::default()).collect(),
            active: Vec::new(),
            groups: Vec::new(),
            timeout,
        }
    }

    /// Register a multicast group: frames to `mac` are held until every
    /// member node is fully idle.
    pub fn set_multicast_group(&mut self, mac: Mac, members: Vec<Mac>) {
        self.groups.retain(|g| g.mac != mac);
        self.groups.push(McastGroup {
            mac,
            members,
            queue: VecDeque::new(),
        });
    }

    /// Queue a unicast request for its destination node.
    pub fn submit(&mut self, req: PendingRequest) {
        let mac = req.frame.dst_mac();
        debug_assert!(!mac.is_broadcast());
        self.mark_active(mac);
        self.nodes[usize::from(mac.as_u8())].queue.push_back(req);
    }

    /// Queue a multicast request for its group, keyed by the frame's
    /// destination mac. Requests to an unconfigured group mac pass
    /// through ungated on the next poll.
    pub fn submit_mcast(&mut self, req: PendingRequest) {
        let mac = req.frame.dst_mac();
        if let Some(group) = self.groups.iter_mut().find(|g| g.mac == mac) {
            group.queue.push_back(req);
        } else {
            self.groups.push(McastGroup {
                mac,
                members: Vec::new(),
                queue: VecDeque::from([req]),
            });
        }
    }

    /// Take the next frame cleared for transmission, if any: a queued
    /// request for an idle node, or a multicast request whose whole group
    /// is idle. A multicast send marks every member outstanding at once,
    /// so each member's reply finds its saved ports.
    pub fn next_ready(&mut self, now: Instant) -> Option<Frame> {
        for &mac in &self.active {
            let node = &mut self.nodes[usize::from(mac)];
            if node.outstanding.is_none() {
                if let Some(req) = node.queue.pop_front() {
                    node.outstanding = Some(Outstanding {
                        src_port: req.src_port,
                        lp: req.lp,
                        sent_at: now,
                    });
                    debug!(dst_mac = %Mac(mac), lp = req.lp, "transmit L0 request");
                    return Some(req.frame);
                }
            }
        }

        for i in 0..self.groups.len() {
            if self.groups[i].queue.is_empty() {
                continue;
            }
            let all_idle = self.groups[i]
                .members
                .iter()
                .all(|m| self.nodes[usize::from(m.as_u8())].is_idle());
            if !all_idle {
                continue;
            }
            let group = &mut self.groups[i];
            let req = group.queue.pop_front()?;
            debug!(
                group_mac = %group.mac,
                members = group.members.len(),
                "transmit gated multicast request"
            );
            let members = group.members.clone();
            for member in members {
                self.nodes[usize::from(member.as_u8())].outstanding = Some(Outstanding {
                    src_port: req.src_port,
                    lp: req.lp,
                    sent_at: now,
                });
                self.mark_active(member);
            }
            return Some(req.frame);
        }
        None
    }

    /// Saved request port for a node with an outstanding request. Used to
    /// decode an inbound reply before consuming the state.
    pub fn lp_for(&self, mac: Mac) -> Option<u8> {
        self.nodes[usize::from(mac.as_u8())]
            .outstanding
            .as_ref()
            .map(|o| o.lp)
    }

    /// Consume the outstanding state for a reply from `mac`, returning
    /// the original requester port. `None` marks a stray reply.
    pub fn on_reply(&mut self, mac: Mac) -> Option<u16> {
        let node = &mut self.nodes[usize::from(mac.as_u8())];
        let out = node.outstanding.take()?;
        if node.is_idle() {
            self.active.retain(|m| *m != mac.as_u8());
        }
        Some(out.src_port)
    }

    /// Force-advance nodes whose outstanding request timed out.
    pub fn sweep(&mut self, now: Instant) {
        let timeout = self.timeout;
        let mut idle = Vec::new();
        for &mac in &self.active {
            let node = &mut self.nodes[usize::from(mac)];
            let timed_out = node
                .outstanding
                .as_ref()
                .is_some_and(|o| now.duration_since(o.sent_at) >= timeout);
            if timed_out {
                warn!(dst_mac = %Mac(mac), "L0 node timed out, advancing queue");
                node.outstanding = None;
            }
            if node.is_idle() {
                idle.push(mac);
            }
        }
        self.active.retain(|m| !idle.contains(m));
    }

    /// Number of requests waiting or outstanding across all nodes.
    pub fn backlog(&self) -> usize {
        self.active
            .iter()
            .map(|m| {
                let node = &self.nodes[usize::from(*m)];
                node.queue.len() + usize::from(node.outstanding.is_some())
            })
            .sum()
    }

    fn mark_active(&mut self, mac: Mac) {
        if !self.active.contains(&mac.as_u8()) {
            self.active.push(mac.as_u8());
        }
    }
}
