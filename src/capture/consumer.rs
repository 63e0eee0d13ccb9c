//! The capture writer: a single background worker that drains committed
//! packet ranges from the ring and flushes them to the sink.
//!
//! Every drained range is walked packet by packet; a packet that
//! references a static string or location gets any missing definitions
//! written immediately ahead of it, bypassing the ring. The assembled
//! bytes go to the sink in one write, the sink is flushed, and the range
//! is zeroed so producers can reuse it. Interleaving definitions this way
//! keeps the capture linear for readers (a defining packet always
//! precedes the first packet that references it) and leaves `INIT` as
//! the first packet of the file even when it shares a range with
//! reference-carrying packets.
//!
//! Sink errors are fatal: a torn capture is useless, so the worker
//! reports the error and aborts the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::intern::InternTables;
use crate::capture::packet::{self, PacketKind};
use crate::capture::ring::RingBuffer;
use crate::capture::sink::CaptureSink;

/// Extra drain attempts after shutdown is observed, giving straggling
/// producers a chance to commit.
const SHUTDOWN_DRAIN_PASSES: usize = 10;

pub(crate) struct Consumer {
    ring: Arc<RingBuffer>,
    sink: Box<dyn CaptureSink>,
    shutdown: Arc<AtomicBool>,
    read_pos: usize,
    tables: InternTables,
    scratch: Vec<u8>,
    out: Vec<u8>,
}

impl Consumer {
    pub(crate) fn new(
        ring: Arc<RingBuffer>,
        sink: Box<dyn CaptureSink>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ring,
            sink,
            shutdown,
            read_pos: 0,
            tables: InternTables::new(),
            scratch: Vec::new(),
            out: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            if self.drain_once() {
                continue;
            }
            if self.shutdown.load(Ordering::Acquire) {
                for _ in 0..SHUTDOWN_DRAIN_PASSES {
                    self.drain_once();
                    std::thread::yield_now();
                }
                self.flush_or_die();
                return;
            }
            std::thread::yield_now();
        }
    }

    /// Drain one ready range. Returns false when nothing was committed.
    pub(crate) fn drain_once(&mut self) -> bool {
        let (range, next) = self.ring.ready_range(self.read_pos);
        self.read_pos = next;
        if range.is_empty() {
            return false;
        }

        self.ring.copy_range(range.clone(), &mut self.scratch);
        self.assemble_output();
        let out = std::mem::take(&mut self.out);
        self.write_or_die(&out);
        self.out = out;
        self.flush_or_die();
        self.ring.release(range);
        true
    }

    /// Walk the drained bytes into the output buffer, splicing the
    /// defining packets for any first-seen static id immediately ahead of
    /// the packet that references it.
    fn assemble_output(&mut self) {
        self.out.clear();
        let mut pos = 0;
        while pos < self.scratch.len() {
            let bytes = &self.scratch[pos..];
            let size = packet::packet_size_at(bytes);
            if size == 0 {
                break;
            }
            match PacketKind::from_tag(bytes[0]) {
                Some(PacketKind::ZoneStart) => {
                    self.tables
                        .ensure_location(packet::get_u64(bytes, 25), &mut self.out);
                }
                Some(
                    PacketKind::ZoneParamBool
                    | PacketKind::ZoneParamInt
                    | PacketKind::ZoneParamUint
                    | PacketKind::ZoneParamDouble
                    | PacketKind::ZoneParamString
                    | PacketKind::ZoneCategory,
                ) => {
                    self.tables
                        .ensure_string(packet::get_u64(bytes, 9), &mut self.out);
                }
                _ => {}
            }
            self.out.extend_from_slice(&self.scratch[pos..pos + size]);
            pos += size;
        }
    }

    fn write_or_die(&mut self, bytes: &[u8]) {
        if let Err(e) = self.sink.write_bytes(bytes) {
            eprintln!("zonetrace: failed to write capture sink: {e}");
            std::process::abort();
        }
    }

    fn flush_or_die(&mut self) {
        if let Err(e) = self.sink.flush() {
            eprintln!("zonetrace: failed to flush capture sink: {e}");
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::reader::{CaptureReader, Packet};
    use crate::capture::sink::SharedVecSink;
    use crate::location;
    use std::io::Cursor;

    fn emit_zone_start(ring: &RingBuffer, correlator: u64, location_id: u64) {
        let mut r = ring.reserve(PacketKind::ZoneStart.fixed_size());
        r.put_u64(correlator);
        r.put_u64(correlator);
        r.put_u64(1000);
        r.put_u64(location_id);
        r.commit(PacketKind::ZoneStart);
    }

    fn emit_zone_end(ring: &RingBuffer, correlator: u64) {
        let mut r = ring.reserve(PacketKind::ZoneEnd.fixed_size());
        r.put_u64(correlator);
        r.put_u64(2000);
        r.commit(PacketKind::ZoneEnd);
    }

    #[test]
    fn test_definitions_precede_the_range_in_the_sink() {
        let ring = Arc::new(RingBuffer::new(4096));
        let (sink, bytes) = SharedVecSink::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut consumer = Consumer::new(ring.clone(), Box::new(sink), shutdown);

        let location = location!("drained");
        emit_zone_start(&ring, 7, location.id());
        emit_zone_end(&ring, 7);
        assert!(consumer.drain_once());

        let captured = bytes.lock().unwrap().clone();
        let packets = CaptureReader::new(Cursor::new(&captured[..]))
            .read_all()
            .unwrap();
        // Three string defs, the location def, then the drained range.
        assert_eq!(packets.len(), 6);
        assert!(matches!(packets[0], Packet::StaticString { .. }));
        assert!(matches!(packets[3], Packet::Location { .. }));
        assert!(matches!(packets[4], Packet::ZoneStart { .. }));
        assert!(matches!(packets[5], Packet::ZoneEnd { .. }));
    }

    #[test]
    fn test_definitions_emitted_once_across_ranges() {
        let ring = Arc::new(RingBuffer::new(4096));
        let (sink, bytes) = SharedVecSink::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut consumer = Consumer::new(ring.clone(), Box::new(sink), shutdown);

        let location = location!("repeated");
        emit_zone_start(&ring, 1, location.id());
        assert!(consumer.drain_once());
        emit_zone_start(&ring, 2, location.id());
        assert!(consumer.drain_once());

        let captured = bytes.lock().unwrap().clone();
        let packets = CaptureReader::new(Cursor::new(&captured[..]))
            .read_all()
            .unwrap();
        let locations = packets
            .iter()
            .filter(|p| matches!(p, Packet::Location { .. }))
            .count();
        let starts = packets
            .iter()
            .filter(|p| matches!(p, Packet::ZoneStart { .. }))
            .count();
        assert_eq!(locations, 1);
        assert_eq!(starts, 2);
    }

    #[test]
    fn test_drain_once_empty_ring() {
        let ring = Arc::new(RingBuffer::new(4096));
        let (sink, bytes) = SharedVecSink::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut consumer = Consumer::new(ring, Box::new(sink), shutdown);

        assert!(!consumer.drain_once());
        assert!(bytes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_range_is_released_after_drain() {
        let ring = Arc::new(RingBuffer::new(4096));
        let (sink, _bytes) = SharedVecSink::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut consumer = Consumer::new(ring.clone(), Box::new(sink), shutdown);

        emit_zone_end(&ring, 3);
        assert!(consumer.drain_once());

        let (range, _) = ring.ready_range(0);
        assert!(range.is_empty(), "drained bytes must read as free again");
    }
}
