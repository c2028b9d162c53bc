//! Splits the serial byte stream into frames at the end-of-frame marker.

use tracing::warn;

/// Accumulates bytes and hands out complete frames, marker excluded.
///
/// A scale that never sends the marker (wrong baud rate, wrong protocol)
/// would grow the buffer forever, so anything beyond `max_len` bytes without
/// a marker is dropped.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    marker: u8,
    max_len: usize,
}

impl FrameBuffer {
    pub fn new(marker: u8, max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(1024)),
            marker,
            max_len,
        }
    }

    /// Appends freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.trim_runaway();
    }

    /// Removes and returns the oldest complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.buf.iter().position(|&b| b == self.marker)?;
        let mut frame: Vec<u8> = self.buf.drain(..=end).collect();
        frame.pop();
        Some(frame)
    }

    /// Bytes waiting for a marker.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn trim_runaway(&mut self) {
        // Only the tail after the last marker can be a runaway partial frame.
        let tail_start = self
            .buf
            .iter()
            .rposition(|&b| b == self.marker)
            .map_or(0, |i| i + 1);
        let tail_len = self.buf.len() - tail_start;
        if tail_len > self.max_len {
            warn!(
                "Dropping {} bytes received without end-of-frame marker 0x{:02X}",
                tail_len, self.marker
            );
            self.buf.truncate(tail_start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut framer = FrameBuffer::new(0x03, 64);
        framer.push(b"S 12.50\x03");
        assert_eq!(framer.next_frame(), Some(b"S 12.50".to_vec()));
        assert_eq!(framer.next_frame(), None);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut framer = FrameBuffer::new(0x03, 64);
        framer.push(b"\x02S 1");
        assert_eq!(framer.next_frame(), None);
        framer.push(b"2.5\x03U");
        assert_eq!(framer.next_frame(), Some(b"\x02S 12.5".to_vec()));
        assert_eq!(framer.pending(), 1);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut framer = FrameBuffer::new(0x03, 64);
        framer.push(b"S 1\x03S 2\x03S 3");
        assert_eq!(framer.next_frame(), Some(b"S 1".to_vec()));
        assert_eq!(framer.next_frame(), Some(b"S 2".to_vec()));
        assert_eq!(framer.next_frame(), None);
    }

    #[test]
    fn test_empty_frame_between_markers() {
        let mut framer = FrameBuffer::new(0x03, 64);
        framer.push(b"\x03\x03");
        assert_eq!(framer.next_frame(), Some(Vec::new()));
        assert_eq!(framer.next_frame(), Some(Vec::new()));
    }

    #[test]
    fn test_runaway_tail_dropped() {
        let mut framer = FrameBuffer::new(0x03, 16);
        framer.push(b"S 1\x03");
        framer.push(&[b'x'; 20]);
        assert_eq!(framer.next_frame(), Some(b"S 1".to_vec()));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut framer = FrameBuffer::new(0x03, 64);
        framer.push(b"S 4");
        framer.reset();
        framer.push(b"U 5\x03");
        assert_eq!(framer.next_frame(), Some(b"U 5".to_vec()));
    }
}
