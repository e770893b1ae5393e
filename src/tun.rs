//! Linux TUN device.
//!
//! Raw IP packets, no packet-information prefix, non-blocking reads so
//! the single-threaded loop can interleave the device with the bus.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use tracing::info;

use crate::error::{Error, Result};

pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    /// Open `/dev/net/tun` and attach an `IFF_TUN | IFF_NO_PI` interface
    /// with the given MTU. `name` is a hint; the kernel reports the name
    /// actually assigned.
    pub fn create(name: &str, mtu: u16) -> Result<Self> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(Error::Tun(format!("interface name too long: {name}")));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")
            .map_err(|e| Error::Tun(format!("failed to open /dev/net/tun: {e}")))?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF, &ifr) };
        if ret < 0 {
            return Err(Error::Tun(format!(
                "TUNSETIFF failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let assigned: String = ifr
            .ifr_name
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8 as char)
            .collect();

        set_mtu(&mut ifr, mtu)?;

        info!(name = %assigned, mtu, "TUN device created");
        Ok(Self {
            file,
            name: assigned,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one IP packet. `Ok(None)` when no packet is pending.
    pub fn read_packet(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.file.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(Error::Tun(format!("read failed: {e}"))),
        }
    }

    /// Write one IP packet. A full device queue drops the packet, which
    /// is the normal backpressure behavior for a tunnel interface.
    pub fn write_packet(&mut self, packet: &[u8]) -> Result<bool> {
        match self.file.write(packet) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(Error::Tun(format!("write failed: {e}"))),
        }
    }
}

/// Apply the interface MTU through a throwaway control socket; the TUN
/// fd itself does not accept `SIOCSIFMTU`.
fn set_mtu(ifr: &mut libc::ifreq, mtu: u16) -> Result<()> {
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(Error::Tun(format!(
            "control socket failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    ifr.ifr_ifru.ifru_mtu = libc::c_int::from(mtu);
    let ret = unsafe { libc::ioctl(sock, libc::SIOCSIFMTU, ifr) };
    let err = std::io::Error::last_os_error();
    unsafe { libc::close(sock) };
    if ret < 0 {
        return Err(Error::Tun(format!("SIOCSIFMTU failed: {err}")));
    }
    Ok(())
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
