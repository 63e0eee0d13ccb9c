//! Lock-free ring buffer decoupling producer threads from the capture
//! writer.
//!
//! The arena is a fixed-size byte buffer. Producers reserve a span with a
//! CAS on the write cursor, fill in the packet while its type byte is
//! still [`FREE`](crate::capture::packet::FREE), then publish it with a
//! single release store of the real type tag. The consumer walks committed packets from
//! its private read position, stopping at the first `FREE` byte, and
//! zeroes each drained range once it has been flushed.
//!
//! Reservations never straddle the wrap: a packet that would cross
//! `reserve_limit` is placed at offset 0 instead, and the previous packet
//! may extend past the limit into the slack. Producers never consult the
//! read position; if they lap the consumer, the overwritten packets are
//! lost (accepted, documented overrun behaviour).

use std::ops::Range;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::capture::packet::{PacketKind, FREE};

/// Default arena size.
pub const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

/// Reserved tail of the arena. No reservation starts after
/// `capacity - SLACK`, but the final packet before the wrap may extend
/// into it, so `SLACK` bounds the maximum packet size.
pub const SLACK: usize = 1024;

pub struct RingBuffer {
    /// Arena bytes. Atomic so the commit byte can be published with
    /// release ordering and the documented overrun race stays
    /// well-defined; everything except the commit/observe pair is
    /// relaxed.
    data: Box<[AtomicU8]>,
    /// Offset after which no new reservation starts.
    reserve_limit: usize,
    /// Offset of the next reservation. Always `< reserve_limit`.
    write_pos: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 2 * SLACK,
            "ring capacity {capacity} too small for slack {SLACK}"
        );
        let data: Box<[AtomicU8]> = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        Self {
            data,
            reserve_limit: capacity - SLACK,
            write_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn reserve_limit(&self) -> usize {
        self.reserve_limit
    }

    /// Reserve `size` bytes for one packet and return its builder.
    ///
    /// `size` must be the packet's exact on-wire size and at most
    /// [`SLACK`]. The reservation's type byte stays `FREE` until
    /// [`Reservation::commit`]; dropping the builder without committing
    /// permanently stalls the consumer at this offset.
    pub fn reserve(&self, size: usize) -> Reservation<'_> {
        debug_assert!(size >= 1 && size <= SLACK);
        let mut pos = self.write_pos.load(Ordering::Relaxed);
        loop {
            let next = if pos + size >= self.reserve_limit {
                0
            } else {
                pos + size
            };
            match self
                .write_pos
                .compare_exchange_weak(pos, next, Ordering::Release, Ordering::Relaxed)
            {
                Ok(start) => {
                    return Reservation {
                        ring: self,
                        start,
                        len: size,
                        cursor: 1,
                    }
                }
                Err(current) => pos = current,
            }
        }
    }

    /// Walk committed packets starting at `read_pos`.
    ///
    /// Returns the contiguous committed range and the read position for
    /// the next call: 0 if the walk crossed `reserve_limit` (the wrap),
    /// otherwise the end of the range. The range end may itself exceed
    /// `reserve_limit` when the final packet extends into the slack.
    pub fn ready_range(&self, read_pos: usize) -> (Range<usize>, usize) {
        let start = read_pos;
        let mut pos = read_pos;
        while pos < self.reserve_limit {
            let tag = self.data[pos].load(Ordering::Acquire);
            if tag == FREE {
                break;
            }
            let size = self.committed_size_at(pos, tag);
            if size == 0 || size > SLACK {
                // Unknown tag or torn length from an overrun lap; nothing
                // past this point is trustworthy yet.
                break;
            }
            pos += size;
        }
        let next = if pos >= self.reserve_limit { 0 } else { pos };
        (start..pos, next)
    }

    /// Size of the committed packet at `pos`. The caller has already
    /// acquire-loaded the (non-`FREE`) tag, which makes the length field
    /// written before the commit visible.
    fn committed_size_at(&self, pos: usize, tag: u8) -> usize {
        let Some(kind) = PacketKind::from_tag(tag) else {
            return 0;
        };
        match kind.payload_len_offset() {
            Some(off) => {
                let lo = self.data[pos + off].load(Ordering::Relaxed);
                let hi = self.data[pos + off + 1].load(Ordering::Relaxed);
                kind.fixed_size() + u16::from_le_bytes([lo, hi]) as usize
            }
            None => kind.fixed_size(),
        }
    }

    /// Copy a drained range out of the arena into `out`.
    pub fn copy_range(&self, range: Range<usize>, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(range.len());
        for offset in range {
            out.push(self.data[offset].load(Ordering::Relaxed));
        }
    }

    /// Zero a flushed range, returning its bytes to the free pool.
    pub fn release(&self, range: Range<usize>) {
        for offset in range {
            self.data[offset].store(0, Ordering::Relaxed);
        }
    }

    fn store(&self, offset: usize, byte: u8) {
        self.data[offset].store(byte, Ordering::Relaxed);
    }
}

/// A reserved, not-yet-published packet. Field writes advance an internal
/// cursor that starts just past the type byte; `commit` publishes the
/// packet by storing the type tag with release ordering.
pub struct Reservation<'a> {
    ring: &'a RingBuffer,
    start: usize,
    len: usize,
    cursor: usize,
}

impl Reservation<'_> {
    pub fn start(&self) -> usize {
        self.start
    }

    fn put(&mut self, bytes: &[u8]) {
        debug_assert!(self.cursor + bytes.len() <= self.len);
        for (i, &byte) in bytes.iter().enumerate() {
            self.ring.store(self.start + self.cursor + i, byte);
        }
        self.cursor += bytes.len();
    }

    pub fn put_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    /// Publish the packet. This is the single publication point: after
    /// the release store of the tag no byte of the packet is written
    /// again.
    pub fn commit(self, kind: PacketKind) {
        debug_assert_eq!(
            self.cursor, self.len,
            "reservation committed before it was fully written"
        );
        self.ring.data[self.start]
            .store(kind as u8, Ordering::Release);
    }
}
