pub mod clock;
pub mod intern;
pub mod packet;
pub mod profiler;
pub mod reader;
pub mod ring;
pub mod sink;

mod consumer;
mod crash;

pub use intern::{SourceLocation, StaticStr};
pub use packet::{PacketKind, MAGIC, VERSION};
pub use profiler::{global, stop, Profiler, Zone, DEFAULT_CAPTURE_PATH};
pub use reader::{CaptureReader, Packet};
pub use ring::RingBuffer;
pub use sink::{CaptureSink, FileSink, NullSink, SharedVecSink};
