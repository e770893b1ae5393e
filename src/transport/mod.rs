//! Bus transports.
//!
//! A transport owns the frame pool and the RX/TX queues; the gateway
//! moves frames through the queue interface and never touches the device
//! directly. `service` is the only point where bytes cross the device
//! boundary, called once per loop iteration.

mod chardev;
mod loopback;

pub use chardev::ChardevTransport;
pub use loopback::LoopbackTransport;

use std::os::fd::RawFd;

use crate::config::{BusConfig, BusKind};
use crate::error::Result;
use crate::pool::{Frame, PoolStats};

/// Frame-level contract between the gateway loop and a bus driver.
///
/// Ownership transfers with every call: a frame handed to `enqueue_tx_frame`
/// belongs to the transport until it reappears from the pool, and a frame
/// from `dequeue_rx_frame` must come back through `release_frame`.
pub trait BusTransport {
    /// Take a cleared frame from the pool, `None` on exhaustion.
    fn acquire_free_frame(&mut self) -> Option<Frame>;

    /// Return a frame to the pool.
    fn release_frame(&mut self, frame: Frame);

    /// Next received frame, if any.
    fn dequeue_rx_frame(&mut self) -> Option<Frame>;

    /// Queue a frame for transmission.
    fn enqueue_tx_frame(&mut self, frame: Frame);

    /// Exchange queued frames with the device. Non-blocking; partial
    /// progress is fine.
    fn service(&mut self) -> Result<()>;

    /// Pollable descriptor for RX readiness, when the transport has one.
    fn poll_fd(&self) -> Option<RawFd> {
        None
    }

    /// Frame pool occupancy.
    fn pool_stats(&self) -> PoolStats;
}

/// Build the transport selected by configuration.
pub fn open(config: &BusConfig) -> Result<Box<dyn BusTransport>> {
    match config.kind {
        BusKind::Chardev => Ok(Box::new(ChardevTransport::open(
            &config.device,
            config.frame_count,
        )?)),
        BusKind::Loopback => Ok(Box::new(LoopbackTransport::new(config.frame_count))),
    }
}
