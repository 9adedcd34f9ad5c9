//! Bounded output capture
//!
//! External tools can write arbitrarily large amounts of diagnostic text.
//! [`OutputTail`] keeps only the most recent bytes so a long-running tool
//! never holds its whole stream in memory.

use std::collections::VecDeque;
use std::fmt;

/// Default number of bytes retained per tool invocation
pub const DEFAULT_TAIL_BYTES: usize = 16 * 1024;

/// Tail-truncated byte buffer
#[derive(Clone, PartialEq, Eq)]
pub struct OutputTail {
    buf: VecDeque<u8>,
    capacity: usize,
    dropped: u64,
}

impl OutputTail {
    /// Create an empty tail keeping at most `capacity` bytes
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity.min(DEFAULT_TAIL_BYTES)),
            capacity,
            dropped: 0,
        }
    }

    /// Append bytes, discarding the oldest ones past capacity
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.dropped += (self.buf.len() + bytes.len() - self.capacity) as u64;
            self.buf.clear();
            self.buf.extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }

        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow as u64;
        }
        self.buf.extend(bytes);
    }

    /// Maximum number of retained bytes
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was captured
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether older output was discarded
    #[inline]
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Number of bytes discarded so far
    #[inline]
    #[must_use]
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }

    /// Retained output as (lossy) UTF-8
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        let (front, back) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(self.buf.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// End of the retained output in at most `n` characters, trimmed
    ///
    /// A cut is marked with a leading `...`, which counts toward `n`.
    #[must_use]
    pub fn last_chars(&self, n: usize) -> String {
        let text = self.to_string_lossy();
        let text = text.trim();
        let total = text.chars().count();
        if total <= n && !self.truncated() {
            return text.to_string();
        }
        let skip = total.saturating_sub(n.saturating_sub(3));
        let tail: String = text.chars().skip(skip).collect();
        format!("...{tail}")
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TAIL_BYTES)
    }
}

impl fmt::Debug for OutputTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTail")
            .field("len", &self.buf.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keeps_everything_under_capacity() {
        let mut tail = OutputTail::with_capacity(16);
        tail.push(b"hello ");
        tail.push(b"world");
        assert_eq!(tail.to_string_lossy(), "hello world");
        assert!(!tail.truncated());
    }

    #[test]
    fn drops_oldest_bytes_first() {
        let mut tail = OutputTail::with_capacity(5);
        tail.push(b"abc");
        tail.push(b"defg");
        assert_eq!(tail.to_string_lossy(), "cdefg");
        assert_eq!(tail.dropped_bytes(), 2);
    }

    #[test]
    fn oversized_chunk_keeps_its_end() {
        let mut tail = OutputTail::with_capacity(4);
        tail.push(b"xy");
        tail.push(b"0123456789");
        assert_eq!(tail.to_string_lossy(), "6789");
        assert_eq!(tail.dropped_bytes(), 8);
    }

    #[test]
    fn last_chars_marks_cut() {
        let mut tail = OutputTail::with_capacity(64);
        tail.push(b"error: mesh generation failed\n");
        assert_eq!(tail.last_chars(100), "error: mesh generation failed");
        assert_eq!(tail.last_chars(9), "...failed");
        assert_eq!(tail.last_chars(9).chars().count(), 9);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity_and_keeps_suffix(
            cap in 1usize..64,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 0..20),
        ) {
            let mut tail = OutputTail::with_capacity(cap);
            let mut all = Vec::new();
            for chunk in &chunks {
                tail.push(chunk);
                all.extend_from_slice(chunk);
            }
            prop_assert!(tail.len() <= cap);
            let keep = all.len().min(cap);
            let expected = &all[all.len() - keep..];
            let (front, back) = tail.buf.as_slices();
            let got: Vec<u8> = front.iter().chain(back.iter()).copied().collect();
            prop_assert_eq!(got.as_slice(), expected);
            prop_assert_eq!(tail.dropped_bytes(), (all.len() - keep) as u64);
        }
    }
}
