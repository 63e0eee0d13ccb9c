//! The profiler: ring buffer, capture writer, lifecycle, and the
//! producer-facing emit API.
//!
//! A process-wide instance is created lazily on the first emit through
//! the free functions; it writes `capture.bin-trace` in the current
//! working directory and installs the crash-drain hook. Embedders and
//! tests construct their own [`Profiler`] with any [`CaptureSink`].
//!
//! Every emit call reserves space in the ring, fills the packet, and
//! publishes it with one release store: non-blocking, no allocation, and
//! no failure path at the call site. If producers outrun the capture
//! writer the oldest unread packets are overwritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::capture::clock;
use crate::capture::consumer::Consumer;
use crate::capture::crash;
use crate::capture::intern::{SourceLocation, StaticStr};
use crate::capture::packet::{self, PacketKind};
use crate::capture::ring::{self, RingBuffer};
use crate::capture::sink::{CaptureSink, FileSink};

/// Capture file written by the process-wide profiler.
pub const DEFAULT_CAPTURE_PATH: &str = "capture.bin-trace";

pub struct Profiler {
    ring: Arc<RingBuffer>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Profiler {
    /// Create a profiler draining into `sink`, with the default 4 MiB
    /// ring.
    pub fn new(sink: Box<dyn CaptureSink>) -> Self {
        Self::with_capacity(sink, ring::DEFAULT_CAPACITY)
    }

    /// Create a profiler with an explicit ring capacity. The first packet
    /// of the capture is `INIT`.
    pub fn with_capacity(sink: Box<dyn CaptureSink>, capacity: usize) -> Self {
        let ring = Arc::new(RingBuffer::new(capacity));

        // First reservation of a fresh ring: INIT lands at offset 0,
        // before the writer exists and before any producer can reach us.
        let mut r = ring.reserve(PacketKind::Init.fixed_size());
        r.put_bytes(packet::MAGIC);
        r.put_u32(packet::VERSION);
        r.commit(PacketKind::Init);

        let shutdown = Arc::new(AtomicBool::new(false));
        let consumer = Consumer::new(ring.clone(), sink, shutdown.clone());
        let worker = std::thread::Builder::new()
            .name("capture-writer".into())
            .spawn(move || consumer.run())
            .expect("failed to spawn capture-writer thread");

        Self {
            ring,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Signal shutdown and join the capture writer, which makes up to 10
    /// final drain passes over the ring. Idempotent.
    pub fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            self.shutdown.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }

    /// Set the shutdown flag without joining; used by the crash hook,
    /// where joining from signal context is off the table.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    // ── metadata ─────────────────────────────────────────────────────────

    /// Attach a human-readable label to a thread id.
    pub fn set_thread_name(&self, tid: u64, name: &str) {
        let name = packet::truncated(name, packet::MAX_PAYLOAD);
        let mut r = self
            .ring
            .reserve(PacketKind::ThreadName.fixed_size() + name.len());
        r.put_u64(tid);
        r.put_u16(name.len() as u16);
        r.put_bytes(name.as_bytes());
        r.commit(PacketKind::ThreadName);
    }

    /// Declare `[begin, end)` as a named stack address range.
    pub fn define_stack(&self, begin: u64, end: u64, name: &str) {
        let name = packet::truncated(name, packet::MAX_PAYLOAD);
        let mut r = self
            .ring
            .reserve(PacketKind::Stack.fixed_size() + name.len());
        r.put_u64(begin);
        r.put_u64(end);
        r.put_u16(name.len() as u16);
        r.put_bytes(name.as_bytes());
        r.commit(PacketKind::Stack);
    }

    /// Declare a named counter stream for `tid`.
    pub fn define_counter_track(&self, tid: u64, name: &str) {
        let name = packet::truncated(name, packet::MAX_PAYLOAD);
        let mut r = self
            .ring
            .reserve(PacketKind::CounterTrack.fixed_size() + name.len());
        r.put_u64(tid);
        r.put_u16(name.len() as u16);
        r.put_bytes(name.as_bytes());
        r.commit(PacketKind::CounterTrack);
    }

    // ── zones ────────────────────────────────────────────────────────────

    pub fn emit_zone_start(
        &self,
        correlator: u64,
        tid: u64,
        timestamp: u64,
        location: &'static SourceLocation,
    ) {
        let mut r = self.ring.reserve(PacketKind::ZoneStart.fixed_size());
        r.put_u64(correlator);
        r.put_u64(tid);
        r.put_u64(timestamp);
        r.put_u64(location.id());
        r.commit(PacketKind::ZoneStart);
    }

    pub fn emit_zone_end(&self, correlator: u64, timestamp: u64) {
        let mut r = self.ring.reserve(PacketKind::ZoneEnd.fixed_size());
        r.put_u64(correlator);
        r.put_u64(timestamp);
        r.commit(PacketKind::ZoneEnd);
    }

    /// Override the enclosing zone's display name.
    pub fn emit_zone_dynamic_name(&self, correlator: u64, name: &str) {
        let name = packet::truncated(name, packet::MAX_PAYLOAD);
        let mut r = self
            .ring
            .reserve(PacketKind::ZoneDynamicName.fixed_size() + name.len());
        r.put_u64(correlator);
        r.put_u16(name.len() as u16);
        r.put_bytes(name.as_bytes());
        r.commit(PacketKind::ZoneDynamicName);
    }

    pub fn emit_zone_param_bool(&self, correlator: u64, name: StaticStr, value: bool) {
        let mut r = self.ring.reserve(PacketKind::ZoneParamBool.fixed_size());
        r.put_u64(correlator);
        r.put_u64(name.id());
        r.put_u8(value as u8);
        r.commit(PacketKind::ZoneParamBool);
    }

    pub fn emit_zone_param_int(&self, correlator: u64, name: StaticStr, value: i64) {
        let mut r = self.ring.reserve(PacketKind::ZoneParamInt.fixed_size());
        r.put_u64(correlator);
        r.put_u64(name.id());
        r.put_i64(value);
        r.commit(PacketKind::ZoneParamInt);
    }

    pub fn emit_zone_param_uint(&self, correlator: u64, name: StaticStr, value: u64) {
        let mut r = self.ring.reserve(PacketKind::ZoneParamUint.fixed_size());
        r.put_u64(correlator);
        r.put_u64(name.id());
        r.put_u64(value);
        r.commit(PacketKind::ZoneParamUint);
    }

    pub fn emit_zone_param_double(&self, correlator: u64, name: StaticStr, value: f64) {
        let mut r = self.ring.reserve(PacketKind::ZoneParamDouble.fixed_size());
        r.put_u64(correlator);
        r.put_u64(name.id());
        r.put_f64(value);
        r.commit(PacketKind::ZoneParamDouble);
    }

    pub fn emit_zone_param_str(&self, correlator: u64, name: StaticStr, value: &str) {
        let value = packet::truncated(value, packet::MAX_PAYLOAD);
        let mut r = self
            .ring
            .reserve(PacketKind::ZoneParamString.fixed_size() + value.len());
        r.put_u64(correlator);
        r.put_u64(name.id());
        r.put_u16(value.len() as u16);
        r.put_bytes(value.as_bytes());
        r.commit(PacketKind::ZoneParamString);
    }

    /// Link the enclosing zone into a cross-thread flow.
    pub fn emit_zone_flow(&self, correlator: u64, flow_id: u64) {
        let mut r = self.ring.reserve(PacketKind::ZoneFlow.fixed_size());
        r.put_u64(correlator);
        r.put_u64(flow_id);
        r.commit(PacketKind::ZoneFlow);
    }

    /// Mark the enclosing zone as the final step of a flow.
    pub fn emit_zone_flow_terminate(&self, correlator: u64, flow_id: u64) {
        let mut r = self
            .ring
            .reserve(PacketKind::ZoneFlowTerminate.fixed_size());
        r.put_u64(correlator);
        r.put_u64(flow_id);
        r.commit(PacketKind::ZoneFlowTerminate);
    }

    pub fn emit_zone_category(&self, correlator: u64, name: StaticStr) {
        let mut r = self.ring.reserve(PacketKind::ZoneCategory.fixed_size());
        r.put_u64(correlator);
        r.put_u64(name.id());
        r.commit(PacketKind::ZoneCategory);
    }

    // ── counters ─────────────────────────────────────────────────────────

    pub fn emit_counter_value_int(&self, tid: u64, timestamp: u64, value: i64) {
        let mut r = self.ring.reserve(PacketKind::CounterValueInt.fixed_size());
        r.put_u64(tid);
        r.put_u64(timestamp);
        r.put_i64(value);
        r.commit(PacketKind::CounterValueInt);
    }

    pub fn emit_counter_value_double(&self, tid: u64, timestamp: u64, value: f64) {
        let mut r = self
            .ring
            .reserve(PacketKind::CounterValueDouble.fixed_size());
        r.put_u64(tid);
        r.put_u64(timestamp);
        r.put_f64(value);
        r.commit(PacketKind::CounterValueDouble);
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.stop();
    }
}

static GLOBAL: OnceLock<Profiler> = OnceLock::new();

/// The process-wide profiler, created on first touch.
///
/// Opens [`DEFAULT_CAPTURE_PATH`] (failure is fatal: the process aborts)
/// and installs the crash-drain hook. The instance lives until process
/// exit; call [`stop`] to flush the capture before exiting.
pub fn global() -> &'static Profiler {
    GLOBAL.get_or_init(|| {
        let sink = match FileSink::create(DEFAULT_CAPTURE_PATH) {
            Ok(sink) => sink,
            Err(e) => {
                eprintln!("zonetrace: failed to open {DEFAULT_CAPTURE_PATH}: {e}");
                std::process::abort();
            }
        };
        let profiler = Profiler::new(Box::new(sink));
        crash::install();
        profiler
    })
}

/// Flush and stop the process-wide profiler. No-op if it was never used.
pub fn stop() {
    if let Some(profiler) = GLOBAL.get() {
        profiler.stop();
    }
}

// ── free-function producer surface over the global profiler ──────────────

pub fn set_thread_name(tid: u64, name: &str) {
    global().set_thread_name(tid, name);
}

pub fn define_stack(begin: u64, end: u64, name: &str) {
    global().define_stack(begin, end, name);
}

pub fn define_counter_track(tid: u64, name: &str) {
    global().define_counter_track(tid, name);
}

pub fn emit_zone_start(
    correlator: u64,
    tid: u64,
    timestamp: u64,
    location: &'static SourceLocation,
) {
    global().emit_zone_start(correlator, tid, timestamp, location);
}

pub fn emit_zone_end(correlator: u64, timestamp: u64) {
    global().emit_zone_end(correlator, timestamp);
}

pub fn emit_zone_dynamic_name(correlator: u64, name: &str) {
    global().emit_zone_dynamic_name(correlator, name);
}

pub fn emit_zone_param_bool(correlator: u64, name: StaticStr, value: bool) {
    global().emit_zone_param_bool(correlator, name, value);
}

pub fn emit_zone_param_int(correlator: u64, name: StaticStr, value: i64) {
    global().emit_zone_param_int(correlator, name, value);
}

pub fn emit_zone_param_uint(correlator: u64, name: StaticStr, value: u64) {
    global().emit_zone_param_uint(correlator, name, value);
}

pub fn emit_zone_param_double(correlator: u64, name: StaticStr, value: f64) {
    global().emit_zone_param_double(correlator, name, value);
}

pub fn emit_zone_param_str(correlator: u64, name: StaticStr, value: &str) {
    global().emit_zone_param_str(correlator, name, value);
}

pub fn emit_zone_flow(correlator: u64, flow_id: u64) {
    global().emit_zone_flow(correlator, flow_id);
}

pub fn emit_zone_flow_terminate(correlator: u64, flow_id: u64) {
    global().emit_zone_flow_terminate(correlator, flow_id);
}

pub fn emit_zone_category(correlator: u64, name: StaticStr) {
    global().emit_zone_category(correlator, name);
}

pub fn emit_counter_value_int(tid: u64, timestamp: u64, value: i64) {
    global().emit_counter_value_int(tid, timestamp, value);
}

pub fn emit_counter_value_double(tid: u64, timestamp: u64, value: f64) {
    global().emit_counter_value_double(tid, timestamp, value);
}

/// RAII guard for a zone on the current thread.
///
/// The capture-wide correlator convention is the emitting thread's OS id:
/// the guard records it at entry and every attribute call reuses it, so a
/// zone's start, attributes and end pair up within the thread.
///
/// ```rust,no_run
/// let zone = zonetrace::Zone::enter(zonetrace::location!("load_chunk"));
/// zone.set_param_uint(zonetrace::static_str!("chunk"), 17);
/// // ZONE_END is emitted when `zone` drops.
/// ```
pub struct Zone {
    correlator: u64,
}

impl Zone {
    pub fn enter(location: &'static SourceLocation) -> Zone {
        let tid = clock::current_thread_id();
        global().emit_zone_start(tid, tid, clock::now(), location);
        Zone { correlator: tid }
    }

    pub fn set_dyn_name(&self, name: &str) {
        global().emit_zone_dynamic_name(self.correlator, name);
    }

    pub fn set_param_bool(&self, name: StaticStr, value: bool) {
        global().emit_zone_param_bool(self.correlator, name, value);
    }

    pub fn set_param_int(&self, name: StaticStr, value: i64) {
        global().emit_zone_param_int(self.correlator, name, value);
    }

    pub fn set_param_uint(&self, name: StaticStr, value: u64) {
        global().emit_zone_param_uint(self.correlator, name, value);
    }

    pub fn set_param_double(&self, name: StaticStr, value: f64) {
        global().emit_zone_param_double(self.correlator, name, value);
    }

    pub fn set_param_str(&self, name: StaticStr, value: &str) {
        global().emit_zone_param_str(self.correlator, name, value);
    }

    pub fn add_flow(&self, flow_id: u64) {
        global().emit_zone_flow(self.correlator, flow_id);
    }

    pub fn terminate_flow(&self, flow_id: u64) {
        global().emit_zone_flow_terminate(self.correlator, flow_id);
    }

    pub fn set_category(&self, name: StaticStr) {
        global().emit_zone_category(self.correlator, name);
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        global().emit_zone_end(self.correlator, clock::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::reader::{CaptureReader, Packet};
    use crate::capture::sink::SharedVecSink;
    use crate::location;
    use std::io::Cursor;

    fn capture<F: FnOnce(&Profiler)>(emit: F) -> Vec<Packet> {
        let (sink, bytes) = SharedVecSink::new();
        let profiler = Profiler::new(Box::new(sink));
        emit(&profiler);
        profiler.stop();
        let captured = bytes.lock().unwrap().clone();
        CaptureReader::new(Cursor::new(captured)).read_all().unwrap()
    }

    #[test]
    fn test_capture_starts_with_init() {
        let packets = capture(|_| {});
        assert_eq!(packets[0], Packet::Init { version: 1 });
    }

    #[test]
    fn test_zone_with_location_defs_before_use() {
        let location = location!("request");
        let packets = capture(|p| {
            p.emit_zone_start(1, 7, 1000, location);
            p.emit_zone_end(1, 2000);
        });

        let start_idx = packets
            .iter()
            .position(|p| matches!(p, Packet::ZoneStart { .. }))
            .unwrap();
        let loc_idx = packets
            .iter()
            .position(|p| matches!(p, Packet::Location { .. }))
            .unwrap();
        assert!(loc_idx < start_idx, "location def must precede its use");
        assert_eq!(
            packets[start_idx],
            Packet::ZoneStart {
                correlator: 1,
                tid: 7,
                timestamp: 1000,
                location_id: location.id(),
            }
        );
        assert!(packets
            .iter()
            .any(|p| *p == Packet::ZoneEnd { correlator: 1, timestamp: 2000 }));
    }

    #[test]
    fn test_param_kinds_round_trip() {
        let location = location!("params");
        let flag = crate::static_str!("flag");
        let count = crate::static_str!("count");
        let ratio = crate::static_str!("ratio");
        let label = crate::static_str!("label");

        let packets = capture(|p| {
            p.emit_zone_start(9, 9, 10, location);
            p.emit_zone_param_bool(9, flag, true);
            p.emit_zone_param_int(9, count, -3);
            p.emit_zone_param_uint(9, count, 12);
            p.emit_zone_param_double(9, ratio, 0.5);
            p.emit_zone_param_str(9, label, "hot path");
            p.emit_zone_category(9, label);
            p.emit_zone_end(9, 20);
        });

        assert!(packets.contains(&Packet::ZoneParamBool {
            correlator: 9,
            name_id: flag.id(),
            value: true
        }));
        assert!(packets.contains(&Packet::ZoneParamInt {
            correlator: 9,
            name_id: count.id(),
            value: -3
        }));
        assert!(packets.contains(&Packet::ZoneParamUint {
            correlator: 9,
            name_id: count.id(),
            value: 12
        }));
        assert!(packets.contains(&Packet::ZoneParamDouble {
            correlator: 9,
            name_id: ratio.id(),
            value: 0.5
        }));
        assert!(packets.contains(&Packet::ZoneParamString {
            correlator: 9,
            name_id: label.id(),
            value: "hot path".to_string()
        }));
        assert!(packets.contains(&Packet::ZoneCategory {
            correlator: 9,
            name_id: label.id()
        }));

        // Each distinct name id is defined exactly once even when reused.
        let count_defs = packets
            .iter()
            .filter(
                |p| matches!(p, Packet::StaticString { id, .. } if *id == count.id()),
            )
            .count();
        assert_eq!(count_defs, 1);
    }

    #[test]
    fn test_thread_and_counter_metadata() {
        let packets = capture(|p| {
            p.set_thread_name(5, "worker");
            p.define_stack(0x1000, 0x2000, "io-stack");
            p.define_counter_track(5, "queue-depth");
            p.emit_counter_value_int(5, 100, 42);
            p.emit_counter_value_double(5, 200, 1.25);
        });

        assert!(packets.contains(&Packet::ThreadName {
            tid: 5,
            name: "worker".to_string()
        }));
        assert!(packets.contains(&Packet::Stack {
            begin: 0x1000,
            end: 0x2000,
            name: "io-stack".to_string()
        }));
        assert!(packets.contains(&Packet::CounterTrack {
            tid: 5,
            name: "queue-depth".to_string()
        }));
        assert!(packets.contains(&Packet::CounterValueInt {
            tid: 5,
            timestamp: 100,
            value: 42
        }));
        assert!(packets.contains(&Packet::CounterValueDouble {
            tid: 5,
            timestamp: 200,
            value: 1.25
        }));
    }

    #[test]
    fn test_flow_and_dynamic_name() {
        let location = location!("flow");
        let packets = capture(|p| {
            p.emit_zone_start(4, 4, 1, location);
            p.emit_zone_dynamic_name(4, "request 381");
            p.emit_zone_flow(4, 77);
            p.emit_zone_flow_terminate(4, 77);
            p.emit_zone_end(4, 2);
        });

        assert!(packets.contains(&Packet::ZoneDynamicName {
            correlator: 4,
            name: "request 381".to_string()
        }));
        assert!(packets.contains(&Packet::ZoneFlow {
            correlator: 4,
            flow_id: 77
        }));
        assert!(packets.contains(&Packet::ZoneFlowTerminate {
            correlator: 4,
            flow_id: 77
        }));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (sink, _bytes) = SharedVecSink::new();
        let profiler = Profiler::new(Box::new(sink));
        profiler.stop();
        profiler.stop();
    }
}
