//! Caller-owned packet buffer with a valid-length cursor.
//!
//! The same buffer carries the outgoing request and, after a reply arrives,
//! the incoming response. The capacity is fixed at construction and never
//! grows, so it must be sized for the larger of the two.

use thiserror::Error;

/// Requested length exceeds the buffer's fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("length {requested} exceeds buffer capacity {capacity}")]
pub struct CapacityError {
    pub requested: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct PacketBuf {
    storage: Box<[u8]>,
    len: usize,
}

impl PacketBuf {
    /// Allocate a zeroed buffer of `capacity` bytes with nothing valid in it.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid region, `[0..len]`.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// The whole backing storage, regardless of the cursor. Writers must
    /// follow up with [`PacketBuf::set_len`].
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    pub fn set_len(&mut self, len: usize) -> Result<(), CapacityError> {
        if len > self.storage.len() {
            return Err(CapacityError {
                requested: len,
                capacity: self.storage.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}
