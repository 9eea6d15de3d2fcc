//! # Serial Input Ring Buffer
//!
//! Fixed-capacity circular byte buffer that collects characters from the
//! module until a complete line can be handed to the line reader.
//!
//! ## Overflow Policy
//!
//! The buffer favors availability over completeness: a put into a full
//! buffer always succeeds and silently discards the oldest unread byte.
//! The return value of [`RingBuffer::put`] and the sticky flag behind
//! [`RingBuffer::take_overflow`] let a stricter caller notice the loss.
//!
//! ## Memory Layout
//!
//! ```text
//! ┌──────────┬───────────────────────┬──────────────────────┐
//! │   free   │    readable data      │        free          │
//! └──────────┴───────────────────────┴──────────────────────┘
//!            ▲                       ▲
//!          tail                    head
//! ```
//!
//! One slot is always left empty so that `head == tail` means empty and
//! `(head + 1) % N == tail` means full; at most `N - 1` bytes are held.
//! `N` must be at least 2, which is checked when the buffer is built.

/// Fixed-capacity circular byte buffer
pub struct RingBuffer<const N: usize> {
    /// Backing storage, sized at compile time
    data: [u8; N],
    /// Next slot to write
    head: usize,
    /// Next slot to read
    tail: usize,
    /// Set whenever a put discarded unread data
    overflowed: bool,
}

impl<const N: usize> RingBuffer<N> {
    /// Rejects capacities that leave no usable slot, at compile time
    const MIN_CAPACITY: () = assert!(N >= 2, "ring buffer needs at least two slots");

    /// Create an empty buffer
    pub const fn new() -> Self {
        let () = Self::MIN_CAPACITY;
        Self {
            data: [0u8; N],
            head: 0,
            tail: 0,
            overflowed: false,
        }
    }

    /// Total number of slots (one more than the usable space)
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of unread bytes
    #[inline]
    pub fn len(&self) -> usize {
        (self.head + N - self.tail) % N
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Check if the buffer is full
    #[inline]
    pub fn is_full(&self) -> bool {
        (self.head + 1) % N == self.tail
    }

    /// Append one byte
    ///
    /// Returns `true` when the buffer was already full and the oldest unread
    /// byte was dropped to make room. The new byte is always stored.
    pub fn put(&mut self, byte: u8) -> bool {
        self.data[self.head] = byte;
        self.head = (self.head + 1) % N;

        if self.head == self.tail {
            self.tail = (self.tail + 1) % N;
            self.overflowed = true;
            return true;
        }
        false
    }

    /// Remove and return the oldest byte
    pub fn get(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.data[self.tail];
        self.tail = (self.tail + 1) % N;
        Some(byte)
    }

    /// Move bytes into `dest` until the buffer is empty or `dest` is full
    ///
    /// Returns the number of bytes copied. Bytes that do not fit stay in
    /// the buffer.
    pub fn drain_to(&mut self, dest: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dest.len() {
            match self.get() {
                Some(byte) => {
                    dest[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }
        copied
    }

    /// Report and clear the overflow flag
    pub fn take_overflow(&mut self) -> bool {
        core::mem::take(&mut self.overflowed)
    }

    /// Reset the buffer to empty state
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.overflowed = false;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
