//! Fixed-capacity circular buffer
//!
//! The send window of every connection is a [`RingBuffer`] of
//! [`SendEnvelope`]s, oldest first. Capacity is fixed at construction so the
//! window bounds both memory and how far ahead a sender can get.

use thiserror::Error;

/// Buffer errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer is full")]
    Full,

    #[error("Buffer is empty")]
    Empty,
}

/// Bookkeeping for one in-flight notify packet
#[derive(Debug, Clone, PartialEq)]
pub struct SendEnvelope<U> {
    /// Sequence number the packet was sent with
    pub sequence: u64,
    /// Clock reading (seconds) when the packet was sent
    pub send_time: f64,
    /// Caller data handed back on delivery or loss
    pub user_data: Option<U>,
}

/// Circular FIFO with a fixed capacity
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items
    ///
    /// # Panics
    /// Panics if `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Ring buffer capacity must be non-zero");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        RingBuffer {
            slots,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Append an item at the back
    pub fn push(&mut self, item: T) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::Full);
        }

        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.slots.len();
        self.count += 1;

        Ok(())
    }

    /// Remove and return the oldest item
    pub fn pop(&mut self) -> Result<T, BufferError> {
        if self.is_empty() {
            return Err(BufferError::Empty);
        }

        let item = self.slots[self.tail].take().ok_or(BufferError::Empty)?;
        self.tail = (self.tail + 1) % self.slots.len();
        self.count -= 1;

        Ok(item)
    }

    /// Borrow the oldest item without removing it
    pub fn peek(&self) -> Result<&T, BufferError> {
        if self.is_empty() {
            return Err(BufferError::Empty);
        }

        self.slots[self.tail].as_ref().ok_or(BufferError::Empty)
    }

    /// Drop every held item and reset to empty
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.slots.len();
        (0..self.count).filter_map(move |i| self.slots[(self.tail + i) % capacity].as_ref())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
