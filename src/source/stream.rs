//! Byte-stream frame source.
use anyhow::Result;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::logutil::escape_frame;
use crate::metrics;
use crate::protocol::{FrameAssembler, FrameMarkers};

/// Read `reader` to the end, forwarding each reassembled frame to `tx`.
///
/// The task resolves to the number of frames forwarded. A trailing partial
/// frame is forwarded too when the stream ends.
pub fn spawn_reader<R>(
    mut reader: R,
    markers: &FrameMarkers,
    tx: mpsc::UnboundedSender<Option<String>>,
) -> JoinHandle<Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut assembler = FrameAssembler::new(&markers.end);
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let mut forwarded = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            metrics::add_bytes_received(n);
            assembler.push(&buf[..n]);
            while let Some(frame) = assembler.next_frame() {
                trace!("stream frame: {}", escape_frame(&frame));
                if tx.send(Some(frame)).is_err() {
                    debug!("Frame receiver dropped; stopping stream reader");
                    return Ok(forwarded);
                }
                forwarded += 1;
            }
        }
        if let Some(tail) = assembler.finish() {
            if tx.send(Some(tail)).is_ok() {
                forwarded += 1;
            }
        }
        debug!("Stream source finished after {} frame(s)", forwarded);
        Ok(forwarded)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_frames_in_order() {
        let input: &[u8] = b"405F<STX>010000<ETX>\r\n40FF<STX>02<ETX>\n40DF<STX>03";
        let (tx, mut rx) = mpsc::unbounded_channel();
        let count = spawn_reader(input, &FrameMarkers::default(), tx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("405F<STX>010000<ETX>"));
        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("40FF<STX>02<ETX>"));
        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("40DF<STX>03"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn noise_inside_frame_stays_in_one_frame() {
        let input: &[u8] = b"$40\x855F\r\n<STX>010000\r\n<STX>020022<ETX>\r\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        let count = spawn_reader(input, &FrameMarkers::default(), tx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
        let frame = rx.recv().await.unwrap().unwrap();
        assert!(frame.contains('\u{85}'));
        let snap = crate::protocol::decode_frame(Some(&frame));
        assert_eq!(snap.online_count(), 2);
        assert_eq!(
            snap.slaves[&2].status,
            crate::protocol::SlaveState::Alarm
        );
    }

    #[tokio::test]
    async fn stops_when_receiver_dropped() {
        let input: &[u8] = b"40FF<STX>01<ETX>40FF<STX>02<ETX>";
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let count = spawn_reader(input, &FrameMarkers::default(), tx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 0);
    }
}
