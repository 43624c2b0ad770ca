//! Frame decoder: raw status text in, [`Snapshot`] out.
//!
//! Decoding is best-effort and never fails. A frame without the start marker
//! yields [`Snapshot::baseline`]; malformed or out-of-range segments are
//! dropped one at a time and reported to a [`DiagnosticSink`] so the loss
//! stays observable.
use log::debug;
use std::fmt;

use super::{
    MasterStatus, SlaveState, SlaveStatus, Snapshot, ZoneSet, BELL_BIT, MAX_SLAVE_ADDRESS,
    ZONE_MASK,
};
use crate::logutil::escape_frame;

/// Marker tokens and noise characters of the text wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMarkers {
    /// Token opening every slave segment.
    pub start: String,
    /// Token closing the frame.
    pub end: String,
    /// Characters stripped from the raw text before parsing.
    pub noise: Vec<char>,
}

impl Default for FrameMarkers {
    fn default() -> Self {
        Self {
            start: "<STX>".to_string(),
            end: "<ETX>".to_string(),
            noise: vec!['$', '\u{85}', '\r', '\n'],
        }
    }
}

/// Something the decoder dropped or could not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No start marker: whole frame replaced by the baseline.
    MissingStartMarker,
    /// Master status byte was not two hex digits; master left unknown.
    BadStatusByte { text: String },
    /// Segment was neither 2 nor 6 characters long.
    SegmentLength { segment: String, len: usize },
    /// Segment of the right length contained non-hex characters.
    NonHexSegment { segment: String },
    /// Address outside 1..=63.
    AddressOutOfRange { address: u8 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MissingStartMarker => write!(f, "frame has no start marker"),
            Diagnostic::BadStatusByte { text } => {
                write!(f, "unreadable master status byte '{}'", escape_frame(text))
            }
            Diagnostic::SegmentLength { segment, len } => write!(
                f,
                "segment '{}' has length {} (expected 2 or 6)",
                escape_frame(segment),
                len
            ),
            Diagnostic::NonHexSegment { segment } => {
                write!(f, "segment '{}' is not hex", escape_frame(segment))
            }
            Diagnostic::AddressOutOfRange { address } => write!(
                f,
                "slave address {} outside 1..={}",
                address, MAX_SLAVE_ADDRESS
            ),
        }
    }
}

/// Receiver for decode diagnostics.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl<F: FnMut(Diagnostic)> DiagnosticSink for F {
    fn report(&mut self, diagnostic: Diagnostic) {
        self(diagnostic)
    }
}

/// Drops every diagnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreDiagnostics;

impl DiagnosticSink for IgnoreDiagnostics {
    fn report(&mut self, _diagnostic: Diagnostic) {}
}

/// Writes diagnostics to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        debug!("frame decode: {}", diagnostic);
    }
}

/// Stateless decoder configured with the wire markers.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    markers: FrameMarkers,
}

impl FrameDecoder {
    pub fn new(markers: FrameMarkers) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &FrameMarkers {
        &self.markers
    }

    /// Decode a frame, logging diagnostics at debug level.
    pub fn decode(&self, raw: Option<&str>) -> Snapshot {
        self.decode_with(raw, &mut LogDiagnostics)
    }

    /// Decode a frame, reporting every dropped piece to `sink`.
    pub fn decode_with(&self, raw: Option<&str>, sink: &mut dyn DiagnosticSink) -> Snapshot {
        let mut snapshot = Snapshot::baseline();

        let raw = match raw {
            Some(r) if !self.markers.start.is_empty() && r.contains(self.markers.start.as_str()) => r,
            _ => {
                sink.report(Diagnostic::MissingStartMarker);
                return snapshot;
            }
        };

        let clean: String = raw
            .chars()
            .filter(|c| !self.markers.noise.contains(c))
            .collect();

        // Characters 0-1 are the header, 2-3 the status byte.
        let split_at = clean
            .char_indices()
            .nth(4)
            .map(|(i, _)| i)
            .unwrap_or(clean.len());
        let (head, rest) = clean.split_at(split_at);
        let status_text: String = head.chars().skip(2).collect();
        snapshot.master = match hex_byte(&status_text) {
            Some(byte) => Some(MasterStatus::from_byte(byte)),
            None => {
                sink.report(Diagnostic::BadStatusByte { text: status_text });
                None
            }
        };

        for segment in rest.split(self.markers.start.as_str()) {
            let segment = if self.markers.end.is_empty() {
                segment.trim().to_string()
            } else {
                segment.replace(self.markers.end.as_str(), "").trim().to_string()
            };
            if segment.is_empty() {
                continue;
            }
            if let Some(slave) = self.decode_segment(&segment, sink) {
                snapshot.slaves.insert(slave.address, slave);
            }
        }

        snapshot
    }

    fn decode_segment(&self, segment: &str, sink: &mut dyn DiagnosticSink) -> Option<SlaveStatus> {
        let len = segment.chars().count();
        if len != 2 && len != 6 {
            sink.report(Diagnostic::SegmentLength {
                segment: segment.to_string(),
                len,
            });
            return None;
        }
        let bytes = match hex_bytes(segment) {
            Some(b) => b,
            None => {
                sink.report(Diagnostic::NonHexSegment {
                    segment: segment.to_string(),
                });
                return None;
            }
        };
        let address = bytes[0];
        if !(1..=MAX_SLAVE_ADDRESS).contains(&address) {
            sink.report(Diagnostic::AddressOutOfRange { address });
            return None;
        }
        match bytes.as_slice() {
            [_, trouble, alarm] => Some(decode_slave(address, *trouble, *alarm)),
            _ => Some(SlaveStatus::offline(address)),
        }
    }
}

/// Decode with the default markers.
pub fn decode_frame(raw: Option<&str>) -> Snapshot {
    FrameDecoder::default().decode(raw)
}

/// Decode one online slave from its trouble byte and alarm+bell byte.
///
/// Bits 0-4 of each byte map to zones 1-5; bit 5 of the alarm byte is the
/// bell. Bits 6-7 are ignored. Alarm wins over trouble.
pub fn decode_slave(address: u8, trouble: u8, alarm: u8) -> SlaveStatus {
    let status = if alarm & ZONE_MASK != 0 {
        SlaveState::Alarm
    } else if trouble != 0 {
        SlaveState::Trouble
    } else {
        SlaveState::Normal
    };
    SlaveStatus {
        address,
        online: true,
        status,
        alarm_zones: ZoneSet::from_bits(alarm),
        trouble_zones: ZoneSet::from_bits(trouble),
        bell_active: alarm & BELL_BIT != 0,
    }
}

fn hex_byte(text: &str) -> Option<u8> {
    if text.len() != 2 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}

fn hex_bytes(text: &str) -> Option<Vec<u8>> {
    if !text.is_ascii() || text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| hex_byte(&text[i..i + 2]))
        .collect()
}
