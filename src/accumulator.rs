//! Fixed-capacity receive buffer.
//!
//! One accumulator holds one backend response (or one captured utterance). The
//! storage is reserved once at construction; `reset` only rewinds the length.
//! A write that would cross the capacity is rejected as a whole, so the buffer
//! never holds a silently truncated response.

use std::ops::Range;

use crate::error::{PipelineError, Result};

#[derive(Debug)]
pub struct Accumulator {
    buffer: Vec<u8>,
    capacity: usize,
}

impl Accumulator {
    /// Reserve `capacity` bytes up front.
    ///
    /// Fails with [`PipelineError::AllocationFailure`] instead of aborting when
    /// the allocator cannot provide the buffer.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| PipelineError::AllocationFailure { size: capacity })?;
        Ok(Self { buffer, capacity })
    }

    /// Rewind to empty without releasing the storage.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Append `chunk` after the bytes already held.
    ///
    /// Nothing is written when the chunk does not fit completely.
    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        let attempted = self.buffer.len().saturating_add(chunk.len());
        if attempted > self.capacity {
            return Err(PipelineError::OverflowDropped {
                capacity: self.capacity,
                attempted,
            });
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Borrow a sub-range of the received bytes, e.g. one frame.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.buffer[range]
    }
}
