//! Character-device bus transport.
//!
//! The kernel bus driver exposes a chardev where every `read` returns
//! exactly one frame and every `write` submits exactly one frame; framing,
//! CRC and byte-stuffing happen below the device boundary.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::pool::{Frame, FramePool, PoolStats};
use crate::protocol::FRAME_SIZE;

use super::BusTransport;

pub struct ChardevTransport {
    file: File,
    pool: FramePool,
    rx: VecDeque<Frame>,
    tx: VecDeque<Frame>,
}

impl ChardevTransport {
    pub fn open(path: &str, frame_count: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| Error::Transport(format!("failed to open {path}: {e}")))?;

        info!(device = path, frames = frame_count, "bus device opened");
        Ok(Self {
            file,
            pool: FramePool::new(frame_count),
            rx: VecDeque::new(),
            tx: VecDeque::new(),
        })
    }

    fn drain_device_rx(&mut self) -> Result<()> {
        let mut buf = [0u8; FRAME_SIZE];
        loop {
            let n = match self.file.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Transport(format!("bus read failed: {e}"))),
            };
            let Some(mut frame) = self.pool.acquire() else {
                warn!("frame pool exhausted, dropping inbound frame");
                continue;
            };
            if !frame.load_wire(&buf[..n]) {
                debug!(len = n, "inbound frame with inconsistent length byte");
                self.pool.release(frame);
                continue;
            }
            trace!(src_mac = %frame.src_mac(), len = frame.payload_len(), "bus rx");
            self.rx.push_back(frame);
        }
    }

    fn flush_device_tx(&mut self) -> Result<()> {
        while let Some(frame) = self.tx.pop_front() {
            match self.file.write(frame.as_wire()) {
                Ok(_) => {
                    trace!(dst_mac = %frame.dst_mac(), len = frame.payload_len(), "bus tx");
                    self.pool.release(frame);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.tx.push_front(frame);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    self.tx.push_front(frame);
                }
                Err(e) => {
                    self.pool.release(frame);
                    return Err(Error::Transport(format!("bus write failed: {e}")));
                }
            }
        }
        Ok(())
    }
}

impl BusTransport for ChardevTransport {
    fn acquire_free_frame(&mut self) -> Option<Frame> {
        self.pool.acquire()
    }

    fn release_frame(&mut self, frame: Frame) {
        self.pool.release(frame);
    }

    fn dequeue_rx_frame(&mut self) -> Option<Frame> {
        self.rx.pop_front()
    }

    fn enqueue_tx_frame(&mut self, frame: Frame) {
        self.tx.push_back(frame);
    }

    fn service(&mut self) -> Result<()> {
        self.drain_device_rx()?;
        self.flush_device_tx()
    }

    fn poll_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
