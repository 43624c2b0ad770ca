//! # Panel Protocol Module
//!
//! Types and codecs for the status frames emitted by the master fire-alarm
//! controller and for the single status byte sent back to it.
//!
//! ## Wire Format
//!
//! A frame is hexadecimal text with literal marker tokens between segments:
//!
//! ```text
//! HH SS <STX>SEG <STX>SEG ... <ETX>
//! ```
//!
//! - `HH` - master header (not validated)
//! - `SS` - master status byte, active-low (see [`StatusBits`])
//! - `SEG` - 2 hex chars (offline slave address) or 6 hex chars
//!   (address, trouble byte, alarm+bell byte)
//!
//! ## Usage
//!
//! ```rust
//! use firewatch::protocol::{decode_frame, encode_command, Operation, SlaveState};
//!
//! let snapshot = decode_frame(Some("405F<STX>010000<STX>020022<STX>03<ETX>"));
//! assert_eq!(snapshot.slaves[&2].status, SlaveState::Alarm);
//!
//! let master = snapshot.master.unwrap_or_default();
//! let cmd = encode_command(Operation::Acknowledge, &master);
//! assert_eq!(cmd.status_byte.len(), 2);
//! ```
//!
//! ## Module Organization
//!
//! - [`frame`] - frame decoder and decode diagnostics
//! - [`command`] - command encoder and command records
//! - [`assembler`] - reassembly of frames from a raw byte stream
//! - [`errors`] - protocol error type

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod assembler;
pub mod command;
pub mod errors;
pub mod frame;

pub use assembler::FrameAssembler;
pub use command::{
    apply_operation, encode_command, encode_command_str, encode_status_byte, parse_status_byte,
    splice_status_byte, CommandRecord, CommandState, EncodedCommand, Operation,
};
pub use errors::ProtocolError;
pub use frame::{
    decode_frame, decode_slave, Diagnostic, DiagnosticSink, FrameDecoder, FrameMarkers,
    IgnoreDiagnostics, LogDiagnostics,
};

/// Highest addressable slave module.
pub const MAX_SLAVE_ADDRESS: u8 = 63;
/// Detection circuits per slave module (bits 0-4 of the zone bytes).
pub const ZONES_PER_SLAVE: u8 = 5;
/// Fixed bits OR'd into every re-encoded status byte.
pub const HEADER_BITS: u8 = 0x40;
/// Bell bit of the slave alarm+bell byte.
pub const BELL_BIT: u8 = 0x20;
/// Zone bits of the slave alarm and trouble bytes.
pub const ZONE_MASK: u8 = 0x1F;

bitflags! {
    /// Bit positions of the master status byte.
    ///
    /// Every bit is active-low: a cleared bit means the feature is ON/ACTIVE,
    /// a set bit means OFF/INACTIVE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusBits: u8 {
        /// Bit 7 - LCD backlight
        const BACKLIGHT_LCD = 1 << 7;
        /// Bit 6 - mains (AC) power
        const AC_POWER      = 1 << 6;
        /// Bit 5 - battery (DC) power
        const DC_POWER      = 1 << 5;
        /// Bit 4 - alarm
        const ALARM         = 1 << 4;
        /// Bit 3 - trouble
        const TROUBLE       = 1 << 3;
        /// Bit 2 - supervisory (drill mode)
        const SUPERVISORY   = 1 << 2;
        /// Bit 1 - silenced
        const SILENCED      = 1 << 1;
        /// Bit 0 - disabled
        const DISABLED      = 1 << 0;
    }
}

/// Decoded master controller status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MasterStatus {
    pub backlight_lcd: bool,
    pub ac_power: bool,
    pub dc_power: bool,
    pub alarm_active: bool,
    pub trouble_active: bool,
    /// Drill mode
    pub supervisory: bool,
    pub silenced: bool,
    pub disabled: bool,
}

impl MasterStatus {
    /// Decode a raw status byte (active-low for every bit).
    pub fn from_byte(byte: u8) -> Self {
        let bits = StatusBits::from_bits_retain(byte);
        Self {
            backlight_lcd: !bits.contains(StatusBits::BACKLIGHT_LCD),
            ac_power: !bits.contains(StatusBits::AC_POWER),
            dc_power: !bits.contains(StatusBits::DC_POWER),
            alarm_active: !bits.contains(StatusBits::ALARM),
            trouble_active: !bits.contains(StatusBits::TROUBLE),
            supervisory: !bits.contains(StatusBits::SUPERVISORY),
            silenced: !bits.contains(StatusBits::SILENCED),
            disabled: !bits.contains(StatusBits::DISABLED),
        }
    }

    /// Active-low bit image of this status, without header bits.
    pub fn to_bits(&self) -> StatusBits {
        self.fields()
            .into_iter()
            .filter(|(_, on)| !on)
            .fold(StatusBits::empty(), |acc, (flag, _)| acc | flag)
    }

    /// The panel's normal idle state, as produced by a system reset.
    pub fn all_clear() -> Self {
        Self {
            backlight_lcd: false,
            ac_power: true,
            dc_power: true,
            alarm_active: false,
            trouble_active: false,
            supervisory: false,
            silenced: false,
            disabled: false,
        }
    }

    fn fields(&self) -> [(StatusBits, bool); 8] {
        [
            (StatusBits::BACKLIGHT_LCD, self.backlight_lcd),
            (StatusBits::AC_POWER, self.ac_power),
            (StatusBits::DC_POWER, self.dc_power),
            (StatusBits::ALARM, self.alarm_active),
            (StatusBits::TROUBLE, self.trouble_active),
            (StatusBits::SUPERVISORY, self.supervisory),
            (StatusBits::SILENCED, self.silenced),
            (StatusBits::DISABLED, self.disabled),
        ]
    }
}

impl fmt::Display for MasterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = [
            ("backlight", self.backlight_lcd),
            ("ac", self.ac_power),
            ("dc", self.dc_power),
            ("alarm", self.alarm_active),
            ("trouble", self.trouble_active),
            ("drill", self.supervisory),
            ("silenced", self.silenced),
            ("disabled", self.disabled),
        ];
        let active: Vec<&str> = labels
            .iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| *name)
            .collect();
        if active.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", active.join(" "))
        }
    }
}

/// Set of active zones (1..=5) on one slave module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "Vec<u8>", from = "Vec<u8>")]
pub struct ZoneSet(u8);

impl ZoneSet {
    pub const fn empty() -> Self {
        ZoneSet(0)
    }

    /// Build from a zone byte; bits above bit 4 are ignored.
    pub fn from_bits(byte: u8) -> Self {
        ZoneSet(byte & ZONE_MASK)
    }

    pub fn contains(&self, zone: u8) -> bool {
        (1..=ZONES_PER_SLAVE).contains(&zone) && self.0 & (1 << (zone - 1)) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Active zones in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=ZONES_PER_SLAVE).filter(move |z| self.contains(*z))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }
}

impl From<ZoneSet> for Vec<u8> {
    fn from(zones: ZoneSet) -> Self {
        zones.to_vec()
    }
}

impl From<Vec<u8>> for ZoneSet {
    fn from(zones: Vec<u8>) -> Self {
        zones
            .into_iter()
            .filter(|z| (1..=ZONES_PER_SLAVE).contains(z))
            .fold(ZoneSet::empty(), |acc, z| ZoneSet(acc.0 | (1 << (z - 1))))
    }
}

impl fmt::Display for ZoneSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|z| z.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Overall state of one slave module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlaveState {
    Normal,
    Trouble,
    Alarm,
    Offline,
}

impl SlaveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaveState::Normal => "NORMAL",
            SlaveState::Trouble => "TROUBLE",
            SlaveState::Alarm => "ALARM",
            SlaveState::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Decoded state of a single slave (zone expander) module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveStatus {
    pub address: u8,
    pub online: bool,
    pub status: SlaveState,
    pub alarm_zones: ZoneSet,
    pub trouble_zones: ZoneSet,
    pub bell_active: bool,
}

impl SlaveStatus {
    pub fn offline(address: u8) -> Self {
        Self {
            address,
            online: false,
            status: SlaveState::Offline,
            alarm_zones: ZoneSet::empty(),
            trouble_zones: ZoneSet::empty(),
            bell_active: false,
        }
    }
}

/// One decoded frame: master status plus the slave map.
///
/// `master` is `None` when the frame carried no usable status byte; callers
/// must treat that as unknown rather than as all-inactive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub master: Option<MasterStatus>,
    pub slaves: BTreeMap<u8, SlaveStatus>,
}

impl Snapshot {
    /// Nothing observed yet: unknown master, no slave entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reset state: unknown master and every address 1..=63 offline.
    pub fn baseline() -> Self {
        let slaves = (1..=MAX_SLAVE_ADDRESS)
            .map(|addr| (addr, SlaveStatus::offline(addr)))
            .collect();
        Self {
            master: None,
            slaves,
        }
    }

    pub fn slave(&self, address: u8) -> Option<&SlaveStatus> {
        self.slaves.get(&address)
    }

    /// Slaves currently in `state`, ascending by address.
    pub fn slaves_in(&self, state: SlaveState) -> impl Iterator<Item = &SlaveStatus> + '_ {
        self.slaves.values().filter(move |s| s.status == state)
    }

    pub fn online_count(&self) -> usize {
        self.slaves.values().filter(|s| s.online).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_set_orders_and_masks() {
        let zones = ZoneSet::from_bits(0xFF);
        assert_eq!(zones.to_vec(), vec![1, 2, 3, 4, 5]);
        let zones = ZoneSet::from_bits(0b0001_0010);
        assert_eq!(zones.to_vec(), vec![2, 5]);
        assert_eq!(zones.to_string(), "2, 5");
        assert!(!zones.contains(0));
        assert!(!zones.contains(6));
    }

    #[test]
    fn zone_set_serializes_as_list() {
        let zones = ZoneSet::from_bits(0b0000_0101);
        let json = serde_json::to_string(&zones).unwrap();
        assert_eq!(json, "[1,3]");
        let back: ZoneSet = serde_json::from_str("[3,1,9]").unwrap();
        assert_eq!(back, zones);
    }

    #[test]
    fn baseline_has_every_address_offline() {
        let snap = Snapshot::baseline();
        assert!(snap.master.is_none());
        assert_eq!(snap.slaves.len(), 63);
        assert!(snap
            .slaves
            .values()
            .all(|s| !s.online && s.status == SlaveState::Offline));
        assert_eq!(snap.slaves.keys().next(), Some(&1));
        assert_eq!(snap.slaves.keys().last(), Some(&63));
    }

    #[test]
    fn all_clear_display() {
        assert_eq!(MasterStatus::all_clear().to_string(), "ac dc");
        assert_eq!(MasterStatus::default().to_string(), "(none)");
    }
}
