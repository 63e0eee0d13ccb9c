//! Offline decoder for capture files.
//!
//! A capture is a flat packet stream (see [`crate::capture::packet`]), so
//! decoding is a single linear pass: read the tag, dispatch on it, read
//! the fixed header and any length-prefixed payload. Unknown tags and
//! truncated tails are `InvalidData` errors; a clean EOF before a tag
//! yields `None`.

use std::fs::File;
use std::io::{BufReader, Error, ErrorKind, Read, Result};
use std::path::Path;

use crate::capture::packet::{PacketKind, MAGIC};

/// One decoded capture packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Init { version: u32 },
    StaticString { id: u64, text: String },
    Location {
        id: u64,
        name_id: u64,
        function_id: u64,
        file_id: u64,
        line: u32,
    },
    Stack { begin: u64, end: u64, name: String },
    ThreadName { tid: u64, name: String },
    ZoneStart {
        correlator: u64,
        tid: u64,
        timestamp: u64,
        location_id: u64,
    },
    ZoneEnd { correlator: u64, timestamp: u64 },
    ZoneDynamicName { correlator: u64, name: String },
    ZoneParamBool { correlator: u64, name_id: u64, value: bool },
    ZoneParamInt { correlator: u64, name_id: u64, value: i64 },
    ZoneParamUint { correlator: u64, name_id: u64, value: u64 },
    ZoneParamDouble { correlator: u64, name_id: u64, value: f64 },
    ZoneParamString {
        correlator: u64,
        name_id: u64,
        value: String,
    },
    ZoneFlow { correlator: u64, flow_id: u64 },
    ZoneFlowTerminate { correlator: u64, flow_id: u64 },
    ZoneCategory { correlator: u64, name_id: u64 },
    CounterTrack { tid: u64, name: String },
    CounterValueInt { tid: u64, timestamp: u64, value: i64 },
    CounterValueDouble { tid: u64, timestamp: u64, value: f64 },
}

pub struct CaptureReader<R> {
    reader: R,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read one packet. Returns `Ok(None)` at EOF.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut tag = [0u8; 1];
        if self.reader.read_exact(&mut tag).is_err() {
            return Ok(None);
        }
        let kind = PacketKind::from_tag(tag[0]).ok_or_else(|| {
            Error::new(ErrorKind::InvalidData, format!("unknown packet tag {}", tag[0]))
        })?;

        let packet = match kind {
            PacketKind::Init => {
                let mut magic = [0u8; 4];
                self.reader.read_exact(&mut magic)?;
                if &magic != MAGIC {
                    return Err(Error::new(ErrorKind::InvalidData, "bad capture magic"));
                }
                Packet::Init {
                    version: self.read_u32()?,
                }
            }
            PacketKind::StaticString => {
                let id = self.read_u64()?;
                let text = self.read_payload()?;
                Packet::StaticString { id, text }
            }
            PacketKind::Location => Packet::Location {
                id: self.read_u64()?,
                name_id: self.read_u64()?,
                function_id: self.read_u64()?,
                file_id: self.read_u64()?,
                line: self.read_u32()?,
            },
            PacketKind::Stack => {
                let begin = self.read_u64()?;
                let end = self.read_u64()?;
                let name = self.read_payload()?;
                Packet::Stack { begin, end, name }
            }
            PacketKind::ThreadName => {
                let tid = self.read_u64()?;
                let name = self.read_payload()?;
                Packet::ThreadName { tid, name }
            }
            PacketKind::ZoneStart => Packet::ZoneStart {
                correlator: self.read_u64()?,
                tid: self.read_u64()?,
                timestamp: self.read_u64()?,
                location_id: self.read_u64()?,
            },
            PacketKind::ZoneEnd => Packet::ZoneEnd {
                correlator: self.read_u64()?,
                timestamp: self.read_u64()?,
            },
            PacketKind::ZoneDynamicName => {
                let correlator = self.read_u64()?;
                let name = self.read_payload()?;
                Packet::ZoneDynamicName { correlator, name }
            }
            PacketKind::ZoneParamBool => Packet::ZoneParamBool {
                correlator: self.read_u64()?,
                name_id: self.read_u64()?,
                value: self.read_u8()? != 0,
            },
            PacketKind::ZoneParamInt => Packet::ZoneParamInt {
                correlator: self.read_u64()?,
                name_id: self.read_u64()?,
                value: self.read_u64()? as i64,
            },
            PacketKind::ZoneParamUint => Packet::ZoneParamUint {
                correlator: self.read_u64()?,
                name_id: self.read_u64()?,
                value: self.read_u64()?,
            },
            PacketKind::ZoneParamDouble => Packet::ZoneParamDouble {
                correlator: self.read_u64()?,
                name_id: self.read_u64()?,
                value: f64::from_bits(self.read_u64()?),
            },
            PacketKind::ZoneParamString => {
                let correlator = self.read_u64()?;
                let name_id = self.read_u64()?;
                let value = self.read_payload()?;
                Packet::ZoneParamString {
                    correlator,
                    name_id,
                    value,
                }
            }
            PacketKind::ZoneFlow => Packet::ZoneFlow {
                correlator: self.read_u64()?,
                flow_id: self.read_u64()?,
            },
            PacketKind::ZoneFlowTerminate => Packet::ZoneFlowTerminate {
                correlator: self.read_u64()?,
                flow_id: self.read_u64()?,
            },
            PacketKind::ZoneCategory => Packet::ZoneCategory {
                correlator: self.read_u64()?,
                name_id: self.read_u64()?,
            },
            PacketKind::CounterTrack => {
                let tid = self.read_u64()?;
                let name = self.read_payload()?;
                Packet::CounterTrack { tid, name }
            }
            PacketKind::CounterValueInt => Packet::CounterValueInt {
                tid: self.read_u64()?,
                timestamp: self.read_u64()?,
                value: self.read_u64()? as i64,
            },
            PacketKind::CounterValueDouble => Packet::CounterValueDouble {
                tid: self.read_u64()?,
                timestamp: self.read_u64()?,
                value: f64::from_bits(self.read_u64()?),
            },
        };
        Ok(Some(packet))
    }

    pub fn read_all(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.read_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut raw = [0u8; 1];
        self.reader.read_exact(&mut raw)?;
        Ok(raw[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.reader.read_exact(&mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        self.reader.read_exact(&mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// A `u16`-length-prefixed UTF-8 payload.
    fn read_payload(&mut self) -> Result<String> {
        let mut raw = [0u8; 2];
        self.reader.read_exact(&mut raw)?;
        let len = u16::from_le_bytes(raw) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        String::from_utf8(payload)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "payload is not valid UTF-8"))
    }
}
