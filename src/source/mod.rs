//! # Frame Sources
//!
//! Producers that feed raw frames into the monitor's
//! `mpsc::UnboundedSender<Option<String>>`:
//!
//! - [`stream`] - any `AsyncRead` (stdin, capture file, TCP socket)
//! - [`http`] - polls the panel controller's HTTP endpoint (feature `http`)
//! - [`serial`] - reads the controller's serial line (feature `serial`)
//!
//! Every source delivers frames in the order they arrived and stops when
//! the receiving side is dropped.

pub mod stream;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "serial")]
pub mod serial;

pub use stream::spawn_reader;
