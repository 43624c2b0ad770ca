//! # Firewatch - Status Monitor for Networked Fire-Alarm Panels
//!
//! Firewatch decodes the compact status frames emitted by a master fire-alarm
//! controller, tracks the 63 zone-expander ("slave") modules behind it, logs
//! every meaningful transition, and encodes operator commands back into the
//! controller's status byte.
//!
//! ## Features
//!
//! - **Frame Decoder**: Noise-tolerant, best-effort decoding of `HH SS <STX>SEG...<ETX>` frames
//! - **Command Encoder**: `SYSTEM_RESET`, `ACKNOWLEDGE`, `DRILL` and `SILENCE` to a status byte
//! - **Change Detection**: Ordered alarm/trouble/mode/slave transition events
//! - **Event Log**: Append-only JSON-lines log with category filters
//! - **Frame Sources**: Byte streams, HTTP polling of the controller, or its serial line
//!
//! ## Quick Start
//!
//! ```rust
//! use firewatch::events::{diff_snapshots, ChangeKind};
//! use firewatch::protocol::{decode_frame, Snapshot};
//!
//! let before = decode_frame(Some("40FF<STX>010000<ETX>"));
//! let after = decode_frame(Some("40EF<STX>010001<ETX>"));
//! let events = diff_snapshots(&before, &after);
//! assert_eq!(events[0].kind, ChangeKind::AlarmRaised);
//! assert!(diff_snapshots(&after, &after).is_empty());
//! # let _ = Snapshot::baseline();
//! ```
//!
//! ## Module Organization
//!
//! - [`protocol`] - wire types, frame decoder, command encoder, stream reassembly
//! - [`events`] - change detection between consecutive snapshots
//! - [`monitor`] - the decode/diff task and its event and command sinks
//! - [`source`] - frame producers (stream, HTTP, serial)
//! - [`storage`] - event and command logs
//! - [`config`] - TOML configuration and the live configuration service
//! - [`metrics`] - process-wide pipeline counters
//! - [`logutil`] - log-safe rendering of raw frames
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Frame Source   │ ← stream / HTTP poll / serial
//! └─────────────────┘
//!          │ Option<String>
//! ┌─────────────────┐
//! │    Monitor      │ ← decode + diff, latest snapshot on a watch channel
//! └─────────────────┘
//!          │ ChangeEvent batches
//! ┌─────────────────┐
//! │   Event Sinks   │ ← event log, log output
//! └─────────────────┘
//! ```

pub mod config;
pub mod events;
pub mod logutil;
pub mod metrics;
pub mod monitor;
pub mod protocol;
pub mod source;
pub mod storage;
