//! The data plane.
//!
//! Single-threaded, poll-driven. One loop iteration services the bus
//! device, drains every received frame, feeds pending IP packets from the
//! TUN side, then runs the timeout sweeps. Frames and packets move by
//! ownership between the pools, the queues and this module; nothing here
//! blocks and nothing allocates per packet in the steady state.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use crate::config::Config;
use crate::error::Result;
use crate::frag::{Fragmenter, Reassembler};
use crate::pool::{Frame, PacketPool};
use crate::protocol::{decode, encode, CdnetPacket, Level, L0_REPLY_PORT};
use crate::scheduler::{needs_reply, L0Scheduler, PendingRequest};
use crate::translate::AddressTranslator;
use crate::transport::BusTransport;
use crate::tun::TunDevice;
use crate::types::Mac;

/// Poll tick; upper bound on sweep latency.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Reassembled IPv6 + UDP around the 2000-byte protocol MTU fits well
/// under this.
const IP_BUF_SIZE: usize = 4096;

pub struct Gateway {
    translator: AddressTranslator,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    scheduler: L0Scheduler,
    packets: PacketPool,
    reassembly_timeout: Duration,
    ip_buf: Vec<u8>,
}

impl Gateway {
    pub fn new(config: &Config) -> Result<Self> {
        let translator = AddressTranslator::new(&config.addr)?;
        let mut scheduler = L0Scheduler::new(config.timing.l0_timeout);
        for group in &config.addr.multicast_groups {
            scheduler.set_multicast_group(
                Mac(group.mac),
                group.members.iter().copied().map(Mac).collect(),
            );
        }

        Ok(Self {
            translator,
            fragmenter: Fragmenter::new(),
            reassembler: Reassembler::new(),
            scheduler,
            packets: PacketPool::new(config.bus.packet_count),
            reassembly_timeout: config.timing.reassembly_timeout,
            ip_buf: vec![0u8; IP_BUF_SIZE],
        })
    }

    /// Local node mac on the bus.
    pub fn self_mac(&self) -> Mac {
        self.translator.self_mac()
    }

    /// Drain every received frame, delivering completed IP packets.
    pub fn drain_bus<F: FnMut(&[u8])>(
        &mut self,
        bus: &mut dyn BusTransport,
        now: Instant,
        mut deliver: F,
    ) -> Result<()> {
        while let Some(frame) = bus.dequeue_rx_frame() {
            let Some(mut pkt) = self.packets.acquire() else {
                debug!("packet pool exhausted, dropping inbound frame");
                bus.release_frame(frame);
                continue;
            };

            let lp = self.scheduler.lp_for(frame.src_mac());
            if let Err(reason) = decode(&frame, lp, &mut pkt) {
                debug!(src_mac = %frame.src_mac(), %reason, "drop inbound frame");
                bus.release_frame(frame);
                self.packets.release(pkt);
                continue;
            }
            bus.release_frame(frame);

            // A reply consumes the node's saved state and gets its
            // requester port back.
            if pkt.level == Level::L0 && pkt.dst_port == L0_REPLY_PORT {
                match self.scheduler.on_reply(pkt.src_mac) {
                    Some(src_port) => pkt.dst_port = src_port,
                    None => {
                        debug!(src_mac = %pkt.src_mac, "stray L0 reply");
                        self.packets.release(pkt);
                        continue;
                    }
                }
            }

            let pkt = match self.reassembler.push(pkt, now, &self.packets) {
                Ok(Some(pkt)) => pkt,
                Ok(None) => continue,
                Err(e) => {
                    // Flow-local: the train is gone, the loop keeps going
                    error!(%e, "reassembly desynchronized");
                    continue;
                }
            };

            match self.translator.cdnet_to_ip(&pkt, &mut self.ip_buf) {
                Ok(len) => {
                    trace!(src_mac = %pkt.src_mac, len, "deliver to tun");
                    deliver(&self.ip_buf[..len]);
                }
                Err(reason) => debug!(src_mac = %pkt.src_mac, %reason, "drop inbound packet"),
            }
            self.packets.release(pkt);
        }
        Ok(())
    }

    /// Feed one IP packet from the TUN side toward the bus.
    pub fn send_ip(&mut self, ip: &[u8], bus: &mut dyn BusTransport, now: Instant) -> Result<()> {
        let Some(mut pkt) = self.packets.acquire() else {
            debug!("packet pool exhausted, dropping egress packet");
            return Ok(());
        };

        if let Err(reason) = self.translator.ip_to_cdnet(ip, &mut pkt) {
            debug!(%reason, "drop egress packet");
            self.packets.release(pkt);
            return Ok(());
        }

        for mut pkt in self.fragmenter.split(pkt, &self.packets)? {
            let Some(mut frame) = bus.acquire_free_frame() else {
                debug!(dst_mac = %pkt.dst_mac, "frame pool exhausted, dropping egress packet");
                self.packets.release(pkt);
                continue;
            };

            let saved = if needs_reply(&pkt) {
                let src_port = pkt.src_port;
                let lp = pkt.dst_port as u8;
                pkt.level = Level::L0;
                pkt.src_port = L0_REPLY_PORT;
                Some((src_port, lp))
            } else {
                None
            };

            let frame = match self.encode_into(&pkt, frame, bus) {
                Ok(frame) => frame,
                Err(e) => {
                    self.packets.release(pkt);
                    return Err(e);
                }
            };

            match saved {
                Some((src_port, lp)) => {
                    let req = PendingRequest {
                        frame,
                        src_port,
                        lp,
                    };
                    if pkt.multicast {
                        self.scheduler.submit_mcast(req);
                    } else {
                        self.scheduler.submit(req);
                    }
                }
                None => bus.enqueue_tx_frame(frame),
            }
            self.packets.release(pkt);
        }
        self.pump(bus, now);
        Ok(())
    }

    /// Run the timeout sweeps and release scheduler-cleared frames.
    pub fn sweep(&mut self, bus: &mut dyn BusTransport, now: Instant) {
        self.scheduler.sweep(now);
        self.reassembler
            .sweep(now, self.reassembly_timeout, &self.packets);
        self.pump(bus, now);
    }

    /// Encode a packet into an acquired frame. The frame goes back to the
    /// bus pool on failure so an encode error cannot leak a buffer.
    fn encode_into(
        &self,
        pkt: &CdnetPacket,
        mut frame: Frame,
        bus: &mut dyn BusTransport,
    ) -> Result<Frame> {
        match encode(pkt, &mut frame) {
            Ok(()) => Ok(frame),
            Err(e) => {
                bus.release_frame(frame);
                Err(e.into())
            }
        }
    }

    fn pump(&mut self, bus: &mut dyn BusTransport, now: Instant) {
        while let Some(frame) = self.scheduler.next_ready(now) {
            bus.enqueue_tx_frame(frame);
        }
    }

    /// Event loop: poll the TUN and bus descriptors, then run one
    /// iteration of the data plane.
    pub fn run(&mut self, tun: &mut TunDevice, bus: &mut dyn BusTransport) -> Result<()> {
        use std::os::fd::AsRawFd;

        info!(
            self_mac = %self.self_mac(),
            tun = tun.name(),
            "gateway running"
        );
        let mut tun_buf = vec![0u8; IP_BUF_SIZE];

        loop {
            let mut fds = [
                libc::pollfd {
                    fd: tun.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: bus.poll_fd().unwrap_or(-1),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let ret = unsafe {
                libc::poll(
                    fds.as_mut_ptr(),
                    fds.len() as libc::nfds_t,
                    POLL_INTERVAL.as_millis() as libc::c_int,
                )
            };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            bus.service()?;
            let now = Instant::now();

            let mut tun_io = Ok(());
            self.drain_bus(bus, now, |ip| {
                if let Err(e) = tun.write_packet(ip) {
                    tun_io = Err(e);
                } else {
                    trace!(len = ip.len(), "tun write");
                }
            })?;
            tun_io?;

            while let Some(n) = tun.read_packet(&mut tun_buf)? {
                if n == 0 {
                    break;
                }
                self.send_ip(&tun_buf[..n], bus, now)?;
            }

            self.sweep(bus, now);
            bus.service()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddrConfig, McastGroup};
    use crate::transport::LoopbackTransport;

    fn config() -> Config {
        Config {
            addr: AddrConfig {
                self6: Some("fdcd::80:1".parse().unwrap()),
                multicast_groups: vec![McastGroup {
                    mac: 0xf5,
                    members: vec![0x05, 0x06],
                }],
                ..AddrConfig::default()
            },
            ..Config::default()
        }
    }

    fn v6_udp(src: &str, dst: &str, sport: u16, dport: u16, data: &[u8]) -> Vec<u8> {
        let src: std::net::Ipv6Addr = src.parse().unwrap();
        let dst: std::net::Ipv6Addr = dst.parse().unwrap();
        let udp_len = (8 + data.len()) as u16;
        let mut ip = vec![0u8; 40];
        ip[0] = 0x60;
        ip[4..6].copy_from_slice(&udp_len.to_be_bytes());
        ip[6] = 17;
        ip[7] = 255;
        ip[8..24].copy_from_slice(&src.octets());
        ip[24..40].copy_from_slice(&dst.octets());
        ip.extend_from_slice(&sport.to_be_bytes());
        ip.extend_from_slice(&dport.to_be_bytes());
        ip.extend_from_slice(&udp_len.to_be_bytes());
        ip.extend_from_slice(&[0, 0]);
        ip.extend_from_slice(data);
        ip
    }

    #[test]
    fn plain_l1_egress_goes_straight_to_tx() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);
        let ip = v6_udp("fdcd::80:1", "fdcd::80:5", 4000, 0x1234, b"hi");

        gw.send_ip(&ip, &mut bus, Instant::now()).unwrap();
        let tx = bus.drain_tx();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].dst_mac(), Mac(0x05));
        // L1 header byte
        assert_eq!(tx[0].payload()[0] & 0xc0, 0x80);
    }

    #[test]
    fn eligible_egress_is_demoted_and_serialized() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);
        let now = Instant::now();

        // Low port, command byte with top bits clear: L0 territory
        let ip = v6_udp("fdcd::80:1", "fdcd::80:5", 4000, 0x21, &[0x00, 0x07]);
        gw.send_ip(&ip, &mut bus, now).unwrap();
        gw.send_ip(&ip, &mut bus, now).unwrap();

        let tx = bus.drain_tx();
        assert_eq!(tx.len(), 1, "second request waits for the reply");
        assert_eq!(tx[0].payload()[0], 0x21);
    }

    #[test]
    fn reply_restores_ports_and_releases_queue() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);
        let now = Instant::now();

        let ip = v6_udp("fdcd::80:1", "fdcd::80:5", 4000, 0x21, &[0x00, 0x07]);
        gw.send_ip(&ip, &mut bus, now).unwrap();
        assert_eq!(bus.drain_tx().len(), 1);

        // Node 0x05 answers
        let mut frame = bus.acquire_free_frame().unwrap();
        frame.payload_area_mut()[..3].copy_from_slice(&[0x40, 0x80, 0x01]);
        frame.set_header(Mac(0x05), Mac(0x01), 3);
        bus.inject_rx(frame);

        let mut delivered = Vec::new();
        gw.drain_bus(&mut bus, now, |ip| delivered.push(ip.to_vec()))
            .unwrap();
        assert_eq!(delivered.len(), 1);
        let ip = &delivered[0];
        let udp = &ip[40..];
        assert_eq!(u16::from_be_bytes([udp[0], udp[1]]), 0x21);
        assert_eq!(u16::from_be_bytes([udp[2], udp[3]]), 4000);
        assert_eq!(&udp[8..], &[0x80, 0x01]);
    }

    #[test]
    fn failed_encode_returns_frame_to_pool() {
        let gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(2);

        // A packet no single frame can hold forces the encode error path
        let mut pkt = CdnetPacket::new();
        pkt.level = Level::L0;
        pkt.dst_mac = Mac(0x05);
        pkt.data = vec![0u8; 300];

        let frame = bus.acquire_free_frame().unwrap();
        assert_eq!(bus.pool_stats().available, 1);
        assert!(gw.encode_into(&pkt, frame, &mut bus).is_err());
        assert_eq!(bus.pool_stats().available, 2);
    }

    #[test]
    fn stray_reply_is_dropped() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);

        let mut frame = bus.acquire_free_frame().unwrap();
        frame.payload_area_mut()[..2].copy_from_slice(&[0x40, 0x99]);
        frame.set_header(Mac(0x09), Mac(0x01), 2);
        bus.inject_rx(frame);

        let mut delivered = 0;
        gw.drain_bus(&mut bus, Instant::now(), |_| delivered += 1)
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn timeout_sweep_releases_next_request() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);
        let start = Instant::now();

        let ip = v6_udp("fdcd::80:1", "fdcd::80:5", 4000, 0x21, &[0x00]);
        gw.send_ip(&ip, &mut bus, start).unwrap();
        gw.send_ip(&ip, &mut bus, start).unwrap();
        assert_eq!(bus.drain_tx().len(), 1);

        gw.sweep(&mut bus, start + Duration::from_millis(500));
        assert_eq!(bus.drain_tx().len(), 1);
    }

    #[test]
    fn multicast_request_gated_behind_busy_member() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);
        let now = Instant::now();

        // Occupy member 0x05
        let req = v6_udp("fdcd::80:1", "fdcd::80:5", 4000, 0x21, &[0x00]);
        gw.send_ip(&req, &mut bus, now).unwrap();
        assert_eq!(bus.drain_tx().len(), 1);

        // A request to group 0xf5 must wait
        let mcast = v6_udp("fdcd::80:1", "fdcd::f0:f5", 5000, 0x30, &[0x00, 0x01]);
        gw.send_ip(&mcast, &mut bus, now).unwrap();
        assert!(bus.drain_tx().is_empty());

        // Reply frees the member, sweep releases the group request
        let mut frame = bus.acquire_free_frame().unwrap();
        frame.payload_area_mut()[..1].copy_from_slice(&[0x40]);
        frame.set_header(Mac(0x05), Mac(0x01), 1);
        bus.inject_rx(frame);
        gw.drain_bus(&mut bus, now, |_| {}).unwrap();
        gw.sweep(&mut bus, now);

        let tx = bus.drain_tx();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].dst_mac(), Mac(0xf5));
        assert_eq!(tx[0].payload()[0], 0x30);

        // Both members answer; each reply routes back with the saved ports
        for mac in [0x05u8, 0x06] {
            let mut frame = bus.acquire_free_frame().unwrap();
            frame.payload_area_mut()[..2].copy_from_slice(&[0x40, mac]);
            frame.set_header(Mac(mac), Mac(0x01), 2);
            bus.inject_rx(frame);
        }
        let mut delivered = Vec::new();
        gw.drain_bus(&mut bus, now, |ip| delivered.push(ip.to_vec()))
            .unwrap();
        assert_eq!(delivered.len(), 2);
        for ip in &delivered {
            let udp = &ip[40..];
            assert_eq!(u16::from_be_bytes([udp[0], udp[1]]), 0x30);
            assert_eq!(u16::from_be_bytes([udp[2], udp[3]]), 5000);
        }
    }

    #[test]
    fn plain_multicast_is_not_gated() {
        let mut gw = Gateway::new(&config()).unwrap();
        let mut bus = LoopbackTransport::new(8);
        let now = Instant::now();

        // Occupy member 0x05 so the group is not idle
        let req = v6_udp("fdcd::80:1", "fdcd::80:5", 4000, 0x21, &[0x00]);
        gw.send_ip(&req, &mut bus, now).unwrap();
        assert_eq!(bus.drain_tx().len(), 1);

        // High ports: no reply expected, no reason to serialize
        let mcast = v6_udp("fdcd::80:1", "fdcd::f0:f5", 5000, 6000, b"grp");
        gw.send_ip(&mcast, &mut bus, now).unwrap();
        let tx = bus.drain_tx();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].dst_mac(), Mac(0xf5));
    }
}
