//! Byte sinks for the capture stream.
//!
//! The consumer writes drained ranges (and interned definitions) as raw
//! bytes; the sink only needs to append and flush. The file is the real
//! target, the null sink measures emit overhead, and the shared-vec sink
//! lets tests decode a capture without touching disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub trait CaptureSink: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) -> std::io::Result<()>;
}

pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl CaptureSink for FileSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A sink that discards everything. Useful for benchmarking emit overhead
/// without I/O costs.
pub struct NullSink;

impl CaptureSink for NullSink {
    fn write_bytes(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A sink that accumulates the capture into a shared `Vec<u8>`.
///
/// Construct with [`SharedVecSink::new`] and keep the returned handle to
/// inspect the bytes after the profiler has been stopped.
pub struct SharedVecSink(Arc<Mutex<Vec<u8>>>);

impl SharedVecSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        (Self(bytes.clone()), bytes)
    }
}

impl CaptureSink for SharedVecSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.0.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
