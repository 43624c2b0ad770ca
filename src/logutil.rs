//! Helpers for putting raw panel frames into log lines.
//! Frames carry stray control bytes (`0x85`, CR/LF) that would otherwise
//! split or garble a log line.

/// Longest frame preview written to the log.
const MAX_PREVIEW: usize = 200;

/// Render a frame for single-line logging:
/// - CR, LF and tab become `\r`, `\n`, `\t`
/// - other control characters become `\xNN`
/// - backslash is doubled
///
/// Frames longer than the preview limit are cut with an ellipsis.
pub fn escape_frame(s: &str) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_frame;

    #[test]
    fn escapes_wire_noise() {
        let s = "$405F\u{85}<STX>01\r\n";
        assert_eq!(escape_frame(s), "$405F\\x85<STX>01\\r\\n");
    }

    #[test]
    fn truncates_long_frames() {
        let long = "0".repeat(500);
        let esc = escape_frame(&long);
        assert_eq!(esc.chars().count(), 201);
        assert!(esc.ends_with('…'));
    }
}
