//! Fixed-capacity circular buffer that overwrites its oldest entry when full.
//!
//! The buffer never blocks and never grows: producers can always [`push`],
//! and a consumer polling with [`pop`] gets [`Empty`] back when there is
//! nothing to take. When the buffer is full, the next push evicts the oldest
//! value and bumps the [`overflow`] counter, which is reset by the next
//! successful pop.
//!
//! [`push`]: RingBuffer::push
//! [`pop`]: RingBuffer::pop
//! [`overflow`]: RingBuffer::overflow

use thiserror::Error;

/// Returned by [`RingBuffer::pop`] when there is nothing to take.
///
/// This is a normal polling outcome, not a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("ring buffer is empty")]
pub struct Empty;

#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    read: usize,
    write: usize,
    size: usize,
    overflow: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be at least 1");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            read: 0,
            write: 0,
            size: 0,
            overflow: 0,
        }
    }

    /// Inserts a value, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, value: T) {
        self.slots[self.write] = Some(value);
        self.write = self.advance(self.write);

        if self.size == self.capacity() {
            // The write position has just overtaken the oldest value.
            self.read = self.advance(self.read);
            self.overflow += 1;
        } else {
            self.size += 1;
        }
    }

    /// Removes and returns the oldest value.
    pub fn pop(&mut self) -> Result<T, Empty> {
        if self.is_empty() {
            return Err(Empty);
        }

        let value = self.slots[self.read].take().ok_or(Empty)?;
        self.read = self.advance(self.read);
        self.size -= 1;
        self.overflow = 0;

        Ok(value)
    }

    // The read and write positions also meet when the buffer is full, so
    // emptiness is decided by the count.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    pub const fn len(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of values evicted since the last successful [`pop`](Self::pop).
    pub const fn overflow(&self) -> usize {
        self.overflow
    }

    fn advance(&self, position: usize) -> usize {
        (position + 1) % self.capacity()
    }
}
