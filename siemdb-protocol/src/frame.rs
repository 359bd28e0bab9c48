//! Brace-balanced frame detection over a byte stream.
//!
//! A frame is complete once unescaped `{`/`}` nesting returns to zero
//! outside a string. [`FrameReader`] additionally
//! carries scan state across calls so a frame split across multiple
//! `recv()`/`read()` chunks is detected correctly, and so multiple frames
//! delivered in one chunk are each extracted in order.

/// Incremental brace-balance frame splitter.
///
/// Feed raw bytes as they arrive with [`FrameReader::feed`]; each call
/// returns zero or more complete frames extracted from the accumulated
/// buffer. Bytes that are not yet part of a complete frame are retained
/// internally and combined with bytes from the next call.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    scan_pos: usize,
    frame_start: usize,
    brace_count: i32,
    in_string: bool,
    escaped: bool,
    started: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly received bytes and returns any complete frames found.
    /// Frames are returned in arrival order and do not include trailing
    /// bytes belonging to the next, still-incomplete frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while self.scan_pos < self.buf.len() {
            let c = self.buf[self.scan_pos];

            if self.escaped {
                self.escaped = false;
            } else if c == b'\\' {
                self.escaped = true;
            } else if c == b'"' {
                self.in_string = !self.in_string;
            } else if !self.in_string {
                if c == b'{' {
                    if !self.started {
                        self.started = true;
                        self.frame_start = self.scan_pos;
                    }
                    self.brace_count += 1;
                } else if c == b'}' {
                    self.brace_count -= 1;
                }
            }

            self.scan_pos += 1;

            if self.started && self.brace_count == 0 && !self.in_string {
                frames.push(self.buf[self.frame_start..self.scan_pos].to_vec());
                self.started = false;
                self.buf.drain(0..self.scan_pos);
                self.scan_pos = 0;
                self.frame_start = 0;
            }
        }

        frames
    }

    /// True if bytes are currently buffered that belong to an incomplete frame.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_frame() {
        let mut r = FrameReader::new();
        let frames = r.feed(br#"{"a":1}"#);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], br#"{"a":1}"#);
        assert!(!r.has_pending());
    }

    #[test]
    fn extracts_two_frames_from_one_chunk() {
        let mut r = FrameReader::new();
        let frames = r.feed(br#"{"a":1}{"b":2}"#);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], br#"{"a":1}"#);
        assert_eq!(frames[1], br#"{"b":2}"#);
    }

    #[test]
    fn reassembles_frame_split_across_chunks() {
        let mut r = FrameReader::new();
        assert!(r.feed(br#"{"a":"hel"#).is_empty());
        assert!(r.has_pending());
        let frames = r.feed(br#"lo"}"#);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], br#"{"a":"hello"}"#);
        assert!(!r.has_pending());
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let mut r = FrameReader::new();
        let frames = r.feed(br#"{"a":"{not a brace}"}"#);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn handles_escaped_quotes_inside_strings() {
        let mut r = FrameReader::new();
        let frames = r.feed(br#"{"a":"she said \"hi\" {still in string}"}"#);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn skips_leading_noise_before_first_brace() {
        let mut r = FrameReader::new();
        let frames = r.feed(b"   \n{\"a\":1}");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], br#"{"a":1}"#);
    }
}
