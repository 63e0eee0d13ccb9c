use std::io::Cursor;
use std::sync::{Arc, Mutex};

use zonetrace::{CaptureReader, Packet, Profiler, SharedVecSink};

/// Build a profiler draining into a shared in-memory capture.
#[allow(dead_code)]
pub fn new_profiler() -> (Profiler, Arc<Mutex<Vec<u8>>>) {
    let (sink, bytes) = SharedVecSink::new();
    (Profiler::new(Box::new(sink)), bytes)
}

/// Same, with an explicit ring capacity (small rings force wraps).
#[allow(dead_code)]
pub fn new_profiler_with_capacity(capacity: usize) -> (Profiler, Arc<Mutex<Vec<u8>>>) {
    let (sink, bytes) = SharedVecSink::new();
    (Profiler::with_capacity(Box::new(sink), capacity), bytes)
}

/// Decode a finished capture; panics on a structurally invalid stream.
#[allow(dead_code)]
pub fn decode(bytes: &Arc<Mutex<Vec<u8>>>) -> Vec<Packet> {
    let captured = bytes.lock().unwrap().clone();
    CaptureReader::new(Cursor::new(captured)).read_all().unwrap()
}

/// Index of the first packet matching `predicate`.
#[allow(dead_code)]
pub fn position_of(packets: &[Packet], predicate: impl Fn(&Packet) -> bool) -> Option<usize> {
    packets.iter().position(predicate)
}
