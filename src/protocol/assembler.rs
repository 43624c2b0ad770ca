//! Incremental frame reassembly for byte-stream feeds (serial line, stdin,
//! capture files).
//!
//! Bytes are accumulated until the frame end marker is seen. CR and LF are
//! in-frame noise, so they only terminate frames when no end marker is
//! configured (plain line-oriented feeds). The wire is ASCII apart from a few noise bytes, so each byte maps to the
//! char with the same code point; `0x85` therefore arrives as `U+0085` and is
//! stripped by the decoder like any other noise character.
use bytes::BytesMut;
use log::warn;

/// Upper bound on buffered bytes without a terminator.
const MAX_PENDING: usize = 8 * 1024;

pub struct FrameAssembler {
    buf: BytesMut,
    end_marker: Vec<u8>,
    overflows: u64,
}

impl FrameAssembler {
    pub fn new(end_marker: &str) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            end_marker: end_marker.as_bytes().to_vec(),
            overflows: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, including its end marker if it had one.
    /// Line breaks between frames are skipped.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            self.skip_line_breaks();
            let end = match self.terminator_end() {
                Some(end) => end,
                None => {
                    if self.buf.len() > MAX_PENDING {
                        warn!(
                            "Dropping {} buffered bytes with no frame terminator",
                            self.buf.len()
                        );
                        self.overflows += 1;
                        self.buf.clear();
                    }
                    return None;
                }
            };
            let chunk = self.buf.split_to(end);
            let text = latin1(&chunk);
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = latin1(&self.buf);
        self.buf.clear();
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of times the buffer was discarded for lack of a terminator.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Byte offset just past the first terminator in the buffer.
    fn terminator_end(&self) -> Option<usize> {
        if self.end_marker.is_empty() {
            return self.buf.iter().position(|&b| b == b'\n').map(|i| i + 1);
        }
        self.buf
            .windows(self.end_marker.len())
            .position(|w| w == self.end_marker.as_slice())
            .map(|i| i + self.end_marker.len())
    }

    fn skip_line_breaks(&mut self) {
        let n = self
            .buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        if n > 0 {
            let _ = self.buf.split_to(n);
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
