//! Static-string and source-location identity, plus the consumer-owned
//! interning tables that guarantee each distinct static item is defined
//! at most once per capture, before its first use.
//!
//! Identity is the address of the source-level static: a [`StaticStr`]
//! wraps a `&'static &'static str` and its id is the address of the inner
//! reference, so the consumer can recover both pointer and length with a
//! single dereference. A [`SourceLocation`]'s id is the address of the
//! struct itself. Ids are opaque u64 keys on the wire.

use std::collections::HashSet;

use crate::capture::packet::{self, PacketKind};

/// A string with capture-lifetime-stable identity.
///
/// Construct with [`static_str!`](crate::static_str) or from a `static`
/// item holding the `&'static str`.
#[derive(Clone, Copy)]
pub struct StaticStr(pub &'static &'static str);

impl StaticStr {
    /// Capture-wide id: the address of the inner reference.
    pub fn id(self) -> u64 {
        self.0 as *const &'static str as u64
    }

    pub fn get(self) -> &'static str {
        *self.0
    }
}

/// A static source location: zone name, enclosing function, file, line.
///
/// Construct with [`location!`](crate::location). The struct must live in
/// static storage; its address is its capture-wide id.
pub struct SourceLocation {
    pub name: StaticStr,
    pub function: StaticStr,
    pub file: StaticStr,
    pub line: u32,
}

impl SourceLocation {
    pub fn id(&'static self) -> u64 {
        self as *const SourceLocation as u64
    }
}

/// Create a [`StaticStr`] from a string literal.
#[macro_export]
macro_rules! static_str {
    ($text:expr) => {{
        static TEXT: &str = $text;
        $crate::capture::intern::StaticStr(&TEXT)
    }};
}

/// Create a `&'static SourceLocation` naming the current source position.
#[macro_export]
macro_rules! location {
    ($name:expr) => {{
        static NAME: &str = $name;
        static FUNCTION: &str = module_path!();
        static FILE: &str = file!();
        static LOCATION: $crate::capture::intern::SourceLocation =
            $crate::capture::intern::SourceLocation {
                name: $crate::capture::intern::StaticStr(&NAME),
                function: $crate::capture::intern::StaticStr(&FUNCTION),
                file: $crate::capture::intern::StaticStr(&FILE),
                line: line!(),
            };
        &LOCATION
    }};
}

/// Recover the text behind a string id.
///
/// SAFETY: `id` must have been produced by [`StaticStr::id`] in this
/// process. The pointee is a `&'static str` in static storage, so the
/// dereference is valid for the life of the process.
unsafe fn resolve_str(id: u64) -> &'static str {
    *(id as *const &'static str)
}

/// Recover the location behind a location id.
///
/// SAFETY: `id` must have been produced by [`SourceLocation::id`] in this
/// process; the pointee lives in static storage.
unsafe fn resolve_location(id: u64) -> &'static SourceLocation {
    &*(id as *const SourceLocation)
}

/// Consumer-private dedup sets. On the first reference to an id the
/// defining packet bytes are appended to `defs`; later references are
/// no-ops.
pub(crate) struct InternTables {
    seen_strings: HashSet<u64>,
    seen_locations: HashSet<u64>,
}

impl InternTables {
    pub(crate) fn new() -> Self {
        Self {
            seen_strings: HashSet::new(),
            seen_locations: HashSet::new(),
        }
    }

    pub(crate) fn ensure_string(&mut self, id: u64, defs: &mut Vec<u8>) {
        if self.seen_strings.insert(id) {
            // SAFETY: string ids drained from the ring originate from
            // `StaticStr::id` on this process's statics (see module docs;
            // corruption of ids under overrun is the documented caveat).
            let text = unsafe { resolve_str(id) };
            encode_static_string(defs, id, text);
        }
    }

    /// A location forces its three component strings first, in the order
    /// name, function, file.
    pub(crate) fn ensure_location(&mut self, id: u64, defs: &mut Vec<u8>) {
        if self.seen_locations.insert(id) {
            // SAFETY: location ids drained from the ring originate from
            // `SourceLocation::id` on this process's statics.
            let location = unsafe { resolve_location(id) };
            self.ensure_string(location.name.id(), defs);
            self.ensure_string(location.function.id(), defs);
            self.ensure_string(location.file.id(), defs);
            encode_location(defs, id, location);
        }
    }
}

fn encode_static_string(out: &mut Vec<u8>, id: u64, text: &str) {
    let text = packet::truncated(text, packet::MAX_PAYLOAD);
    out.push(PacketKind::StaticString as u8);
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(text.len() as u16).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

fn encode_location(out: &mut Vec<u8>, id: u64, location: &SourceLocation) {
    out.push(PacketKind::Location as u8);
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&location.name.id().to_le_bytes());
    out.extend_from_slice(&location.function.id().to_le_bytes());
    out.extend_from_slice(&location.file.id().to_le_bytes());
    out.extend_from_slice(&location.line.to_le_bytes());
}
