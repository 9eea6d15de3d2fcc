//! # Zero-Copy Output Queue
//!
//! Describes an outbound message as an ordered list of borrowed fragments
//! instead of copying everything into one response buffer. Each fragment
//! remembers whether its bytes live in RAM or in program memory so the
//! drain can pick the right accessor.
//!
//! ## Write-Then-Drain Discipline
//!
//! ```text
//!   add_fragment ×k          next_fragment ×k           (auto reset)
//! ┌────────────────┐      ┌────────────────────┐      ┌──────────────┐
//! │ cursor == 0    │ ───► │ 0 < cursor < len   │ ───► │ fresh queue  │
//! │ appends OK     │      │ appends rejected   │      │ appends OK   │
//! └────────────────┘      └────────────────────┘      └──────────────┘
//! ```
//!
//! A consumer that stops draining early leaves the queue un-appendable
//! until it finishes; call [`OutputQueue::clear`] to abandon a drain.

use heapless::Vec;
use thiserror::Error;

use crate::traits::RomReader;

/// Where the bytes of a fragment are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageKind {
    /// Ordinary memory, readable as a slice
    Ram,
    /// Program memory, readable only through a [`RomReader`]
    Rom,
}

/// A borrowed piece of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment<'a> {
    /// Bytes in RAM; must not change until the fragment is drained
    Ram(&'a [u8]),
    /// Bytes in program memory
    Rom(&'static [u8]),
}

impl<'a> Fragment<'a> {
    /// Fragment over a RAM slice
    pub const fn ram(data: &'a [u8]) -> Self {
        Fragment::Ram(data)
    }

    /// Fragment over a program-memory constant
    pub const fn rom(data: &'static [u8]) -> Self {
        Fragment::Rom(data)
    }

    /// Number of bytes referenced
    pub fn len(&self) -> usize {
        match self {
            Fragment::Ram(data) => data.len(),
            Fragment::Rom(data) => data.len(),
        }
    }

    /// Check if the fragment references no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage kind tag
    pub fn kind(&self) -> StorageKind {
        match self {
            Fragment::Ram(_) => StorageKind::Ram,
            Fragment::Rom(_) => StorageKind::Rom,
        }
    }

    /// Read byte `index`, going through `rom` for program memory
    pub fn byte_at(&self, index: usize, rom: RomReader) -> u8 {
        match self {
            Fragment::Ram(data) => data[index],
            Fragment::Rom(data) => rom(data, index),
        }
    }
}

/// Reasons an append is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// All fragment slots are in use
    #[error("output queue is full")]
    Full,
    /// A drain has started and not yet finished
    #[error("output queue is partially read")]
    PartiallyRead,
}

/// Ordered list of fragments with a running byte total
pub struct OutputQueue<'a, const M: usize> {
    /// Fragments in insertion order
    fragments: Vec<Fragment<'a>, M>,
    /// Index of the next fragment to hand out
    read_position: usize,
    /// Sum of all fragment lengths
    total_len: usize,
}

impl<'a, const M: usize> OutputQueue<'a, M> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            fragments: Vec::new(),
            read_position: 0,
            total_len: 0,
        }
    }

    /// Append a fragment
    pub fn add_fragment(&mut self, fragment: Fragment<'a>) -> Result<(), QueueError> {
        if self.read_position != 0 {
            log::warn!("output queue: cannot append to a partially read queue");
            return Err(QueueError::PartiallyRead);
        }
        if self.fragments.push(fragment).is_err() {
            log::warn!("output queue: max length {} exceeded", M);
            return Err(QueueError::Full);
        }
        self.total_len += fragment.len();
        Ok(())
    }

    /// Hand out the next fragment in insertion order
    ///
    /// The queue resets itself once the last fragment has been returned.
    pub fn next_fragment(&mut self) -> Option<Fragment<'a>> {
        let fragment = *self.fragments.get(self.read_position)?;
        self.read_position += 1;
        if self.read_position >= self.fragments.len() {
            self.clear();
        }
        Some(fragment)
    }

    /// Sum of the lengths of the queued fragments
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Number of queued fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Check if a drain has started but not finished
    pub fn is_partially_read(&self) -> bool {
        self.read_position != 0
    }

    /// Drop every fragment and rewind the read cursor
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.read_position = 0;
        self.total_len = 0;
    }
}

impl<'a, const M: usize> Default for OutputQueue<'a, M> {
    fn default() -> Self {
        Self::new()
    }
}
