//! # Line Reader
//!
//! Pulls whatever the serial port currently has, stages it in the
//! [`RingBuffer`], and hands out complete `\n`-terminated lines. A partial
//! line survives between calls, so a line may be assembled over many polls.

use embedded_io::{Read, ReadReady};
use heapless::Vec;

use crate::ring::RingBuffer;
use crate::traits::{LinkError, LinkResult};
use crate::SERIAL_INPUT_CAPACITY;

/// A received line, terminator included
pub type Line = Vec<u8, SERIAL_INPUT_CAPACITY>;

/// Assembles serial bytes into lines
pub struct LineReader<const N: usize> {
    ring: RingBuffer<N>,
}

impl<const N: usize> LineReader<N> {
    /// Create a reader with an empty staging buffer
    pub const fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
        }
    }

    /// Consume available bytes until a line completes or the port runs dry
    ///
    /// Returns `Ok(true)` with the line (terminator included) in `dest`.
    /// A line longer than `dest` is truncated and the rest of it dropped.
    /// Bytes after the terminator stay in the port for the next call.
    pub fn try_read_line<T, const L: usize>(
        &mut self,
        port: &mut T,
        dest: &mut Vec<u8, L>,
    ) -> LinkResult<bool>
    where
        T: Read + ReadReady,
    {
        let mut byte = [0u8; 1];
        while port.read_ready().map_err(LinkError::io)? {
            if port.read(&mut byte).map_err(LinkError::io)? == 0 {
                break;
            }
            self.ring.put(byte[0]);
            if byte[0] == b'\n' {
                self.take_line(dest);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of bytes of an unfinished line currently staged
    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    /// Forget any partially received line
    pub fn reset(&mut self) {
        self.ring.reset();
    }

    fn take_line<const L: usize>(&mut self, dest: &mut Vec<u8, L>) {
        if self.ring.take_overflow() {
            log::warn!("line reader: input exceeded {} bytes, line head lost", N - 1);
        }

        dest.clear();
        let _ = dest.resize_default(L);
        let copied = self.ring.drain_to(dest);
        dest.truncate(copied);

        if !self.ring.is_empty() {
            log::warn!("line reader: line truncated to {} bytes", L);
            self.ring.reset();
        }
    }
}

impl<const N: usize> Default for LineReader<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of the first occurrence of `needle` in `haystack`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Literal substring test on raw bytes
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// Strip trailing `\r` and `\n`
pub fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ByteFeed;

    #[test]
    fn test_line_assembled_one_byte_at_a_time() {
        let mut feed = ByteFeed::new();
        let mut reader = LineReader::<16>::new();
        let mut line: Vec<u8, 16> = Vec::new();
        let mut completed = 0;

        for byte in b"ab\r\nc" {
            feed.push(&[*byte]);
            if reader.try_read_line(&mut feed, &mut line).unwrap() {
                completed += 1;
                assert_eq!(line.as_slice(), b"ab\r\n");
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(reader.pending(), 1);
        assert!(!reader.try_read_line(&mut feed, &mut line).unwrap());

        feed.push(b"d\n");
        assert!(reader.try_read_line(&mut feed, &mut line).unwrap());
        assert_eq!(line.as_slice(), b"cd\n");
    }

    #[test]
    fn test_stops_at_terminator() {
        let mut feed = ByteFeed::new();
        feed.push(b"first\nsecond\n");
        let mut reader = LineReader::<32>::new();
        let mut line: Vec<u8, 32> = Vec::new();

        assert!(reader.try_read_line(&mut feed, &mut line).unwrap());
        assert_eq!(line.as_slice(), b"first\n");
        assert_eq!(feed.remaining(), 7);
        assert!(reader.try_read_line(&mut feed, &mut line).unwrap());
        assert_eq!(line.as_slice(), b"second\n");
    }

    #[test]
    fn test_long_line_truncated() {
        let mut feed = ByteFeed::new();
        feed.push(b"0123456789\nnext\n");
        let mut reader = LineReader::<32>::new();
        let mut line: Vec<u8, 4> = Vec::new();

        assert!(reader.try_read_line(&mut feed, &mut line).unwrap());
        assert_eq!(line.as_slice(), b"0123");
        assert_eq!(reader.pending(), 0);

        assert!(reader.try_read_line(&mut feed, &mut line).unwrap());
        assert_eq!(line.as_slice(), b"next");
    }

    #[test]
    fn test_overlong_input_keeps_tail() {
        let mut feed = ByteFeed::new();
        feed.push(b"abcdefghij\n");
        let mut reader = LineReader::<8>::new();
        let mut line: Vec<u8, 16> = Vec::new();

        assert!(reader.try_read_line(&mut feed, &mut line).unwrap());
        assert_eq!(line.as_slice(), b"efghij\n");
    }

    #[test]
    fn test_helpers() {
        assert!(contains(b"+IPD,0,12:GET /", b"IPD,"));
        assert!(!contains(b"OK", b"ERROR"));
        assert_eq!(find(b"abcabc", b"ca"), Some(2));
        assert_eq!(trim_line(b"value\r\n"), b"value");
        assert_eq!(trim_line(b"\r\n"), b"");
    }
}
