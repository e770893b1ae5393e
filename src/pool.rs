//! Fixed-capacity frame and packet pools.
//!
//! Every component borrows buffers from here and must return them.
//! `acquire` returning `None` is normal backpressure, not an error: the
//! caller drops the inbound unit and continues. Ownership moves with the
//! value, so a buffer is provably in exactly one place at a time.

use byteorder::{BigEndian, ByteOrder};
use crossbeam_queue::ArrayQueue;

use crate::protocol::{CdnetPacket, FRAME_HDR_SIZE, FRAME_PAYLOAD_MAX, FRAME_SIZE};
use crate::types::Mac;

/// Default frame pool capacity.
pub const DEFAULT_FRAME_COUNT: usize = 200;

/// Default packet pool capacity.
pub const DEFAULT_PACKET_COUNT: usize = 64;

/// Fixed-size wire buffer: local header, CDNET payload, CRC trailer.
#[derive(Clone)]
pub struct Frame {
    dat: [u8; FRAME_SIZE],
    payload_len: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            dat: [0u8; FRAME_SIZE],
            payload_len: 0,
        }
    }

    pub fn src_mac(&self) -> Mac {
        Mac(self.dat[0])
    }

    pub fn dst_mac(&self) -> Mac {
        Mac(self.dat[1])
    }

    /// CDNET payload length recorded in the header.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.dat[FRAME_HDR_SIZE..FRAME_HDR_SIZE + self.payload_len]
    }

    /// Full payload area for the codec to write into.
    pub fn payload_area_mut(&mut self) -> &mut [u8] {
        &mut self.dat[FRAME_HDR_SIZE..FRAME_HDR_SIZE + FRAME_PAYLOAD_MAX]
    }

    /// Stamp the local header after the payload has been written.
    pub fn set_header(&mut self, src_mac: Mac, dst_mac: Mac, payload_len: usize) {
        assert!(payload_len <= FRAME_PAYLOAD_MAX);
        self.dat[0] = src_mac.as_u8();
        self.dat[1] = dst_mac.as_u8();
        BigEndian::write_u16(&mut self.dat[2..4], payload_len as u16);
        self.payload_len = payload_len;
    }

    /// Bytes handed to the transport: header plus payload, no trailer.
    pub fn as_wire(&self) -> &[u8] {
        &self.dat[..FRAME_HDR_SIZE + self.payload_len]
    }

    /// Rebuild a frame from transport bytes, validating the length field.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let mut frame = Self::new();
        frame.load_wire(bytes).then_some(frame)
    }

    /// Fill an existing (pooled) frame from transport bytes. Returns
    /// false and leaves the frame cleared when the length field disagrees
    /// with the byte count.
    pub fn load_wire(&mut self, bytes: &[u8]) -> bool {
        self.clear();
        if bytes.len() < FRAME_HDR_SIZE || bytes.len() > FRAME_HDR_SIZE + FRAME_PAYLOAD_MAX {
            return false;
        }
        let payload_len = BigEndian::read_u16(&bytes[2..4]) as usize;
        if bytes.len() != FRAME_HDR_SIZE + payload_len {
            return false;
        }
        self.dat[..bytes.len()].copy_from_slice(bytes);
        self.payload_len = payload_len;
        true
    }

    pub fn clear(&mut self) {
        self.payload_len = 0;
        self.dat[..FRAME_HDR_SIZE].fill(0);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("src_mac", &self.src_mac())
            .field("dst_mac", &self.dst_mac())
            .field("payload_len", &self.payload_len)
            .finish()
    }
}

/// Fixed-capacity free list of wire frames.
pub struct FramePool {
    free: ArrayQueue<Frame>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(Frame::new());
        }
        Self { free, capacity }
    }

    /// Take a cleared frame, or `None` when exhausted (backpressure).
    pub fn acquire(&self) -> Option<Frame> {
        self.free.pop()
    }

    /// Return a frame. The pool never grows past its capacity, so a
    /// double-release of a foreign frame is silently discarded.
    pub fn release(&self, mut frame: Frame) {
        frame.clear();
        let _ = self.free.push(frame);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.free.len(),
            capacity: self.capacity,
        }
    }
}

/// Fixed-capacity free list of gateway packets.
pub struct PacketPool {
    free: ArrayQueue<CdnetPacket>,
    capacity: usize,
}

impl PacketPool {
    pub fn new(capacity: usize) -> Self {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(CdnetPacket::new());
        }
        Self { free, capacity }
    }

    pub fn acquire(&self) -> Option<CdnetPacket> {
        self.free.pop()
    }

    pub fn release(&self, mut pkt: CdnetPacket) {
        pkt.reset();
        let _ = self.free.push(pkt);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.free.len(),
            capacity: self.capacity,
        }
    }
}

/// Pool occupancy report.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub available: usize,
    pub capacity: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.available, self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_until_exhausted() {
        let pool = FramePool::new(2);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());

        pool.release(a);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn released_frame_is_cleared() {
        let pool = FramePool::new(1);
        let mut frame = pool.acquire().unwrap();
        frame.payload_area_mut()[0] = 0xaa;
        frame.set_header(Mac(1), Mac(2), 1);
        pool.release(frame);

        let frame = pool.acquire().unwrap();
        assert_eq!(frame.payload_len(), 0);
        assert_eq!(frame.src_mac(), Mac(0));
    }

    #[test]
    fn wire_round_trip() {
        let mut frame = Frame::new();
        frame.payload_area_mut()[..3].copy_from_slice(&[0x10, 0x20, 0x30]);
        frame.set_header(Mac(0x01), Mac(0x05), 3);

        let rebuilt = Frame::from_wire(frame.as_wire()).unwrap();
        assert_eq!(rebuilt.src_mac(), Mac(0x01));
        assert_eq!(rebuilt.dst_mac(), Mac(0x05));
        assert_eq!(rebuilt.payload(), &[0x10, 0x20, 0x30]);
    }

    #[test]
    fn wire_round_trip_at_max_payload() {
        let mut frame = Frame::new();
        for (i, b) in frame.payload_area_mut().iter_mut().enumerate() {
            *b = i as u8;
        }
        frame.set_header(Mac(0x01), Mac(0x05), FRAME_PAYLOAD_MAX);

        let wire = frame.as_wire();
        assert_eq!(wire.len(), FRAME_HDR_SIZE + FRAME_PAYLOAD_MAX);

        let rebuilt = Frame::from_wire(wire).unwrap();
        assert_eq!(rebuilt.payload_len(), FRAME_PAYLOAD_MAX);
        assert_eq!(rebuilt.payload(), frame.payload());
    }

    #[test]
    fn from_wire_rejects_bad_length_field() {
        assert!(Frame::from_wire(&[0x01, 0x02, 0x00, 0x05, 0xaa]).is_none());
        assert!(Frame::from_wire(&[0x01]).is_none());
    }
}
