//! Serial-line frame source.
//!
//! The controller writes frames continuously on its UART (38400 8N1 by
//! default). `serialport` is blocking, so the port is read on a dedicated
//! thread that feeds the same [`FrameAssembler`] as the stream source.
use anyhow::{anyhow, Result};
use log::{debug, info, trace, warn};
use std::io::{ErrorKind, Read};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::logutil::escape_frame;
use crate::metrics;
use crate::protocol::{FrameAssembler, FrameMarkers};

fn open_port(port_name: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>> {
    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(500));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    builder
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))
}

/// Open `port_name` and forward frames to `tx` until the port fails or the
/// receiver is dropped. The thread resolves to the number of frames sent.
pub fn spawn_serial_reader(
    port_name: &str,
    baud_rate: u32,
    markers: &FrameMarkers,
    tx: mpsc::UnboundedSender<Option<String>>,
) -> Result<JoinHandle<u64>> {
    let mut port = open_port(port_name, baud_rate)?;
    info!("Reading panel frames from {} at {} baud", port_name, baud_rate);
    let mut assembler = FrameAssembler::new(&markers.end);
    let name = port_name.to_string();

    let handle = std::thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            let mut forwarded = 0u64;
            loop {
                if tx.is_closed() {
                    break;
                }
                match port.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        metrics::add_bytes_received(n);
                        assembler.push(&buf[..n]);
                        while let Some(frame) = assembler.next_frame() {
                            trace!("serial frame: {}", escape_frame(&frame));
                            if tx.send(Some(frame)).is_err() {
                                return forwarded;
                            }
                            forwarded += 1;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!("Serial read error on {}: {}", name, e);
                        break;
                    }
                }
            }
            debug!("Serial reader for {} stopped", name);
            forwarded
        })
        .map_err(|e| anyhow!("Failed to spawn serial reader thread: {}", e))?;
    Ok(handle)
}
