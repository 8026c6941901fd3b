use super::{Error, Result};

/// An owned output buffer that exposes its unfilled tail as a slice and grows in fixed steps.
///
/// The converter writes into [`unfilled`](Self::unfilled) and then marks bytes as filled with
/// [`advance`](Self::advance). When a converter reports that the tail is too short, the caller
/// invokes [`grow`](Self::grow) and retries the same input position. Growth beyond `limit` bytes
/// fails with [`Error::OutputLimit`] instead of reallocating without bound.
#[derive(Debug)]
pub(crate) struct GrowableBuffer {
    buffer: Vec<u8>,
    filled: usize,
    increment: usize,
    limit: usize,
}

impl GrowableBuffer {
    pub fn new(initial: usize, increment: usize, limit: usize) -> Self {
        Self {
            buffer: vec![0; initial.min(limit)],
            filled: 0,
            increment: increment.max(1),
            limit,
        }
    }

    /// Returns the filled part of the buffer.
    pub fn filled(&self) -> &[u8] {
        &self.buffer[..self.filled]
    }

    pub fn filled_len(&self) -> usize {
        self.filled
    }

    /// Returns the unfilled tail as a slice.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buffer[self.filled..]
    }

    /// Marks the first `n` bytes of the unfilled tail as filled.
    pub fn advance(&mut self, n: usize) {
        assert!(self.filled + n <= self.buffer.len());
        self.filled += n;
    }

    /// Enlarges the unfilled tail by one increment.
    pub fn grow(&mut self) -> Result<()> {
        let len = self.buffer.len();
        if len >= self.limit {
            return Err(Error::OutputLimit { limit: self.limit });
        }
        let new_len = len.saturating_add(self.increment).min(self.limit);
        self.buffer.resize(new_len, 0);
        Ok(())
    }

    /// Grows until the unfilled tail holds at least `minimum` bytes.
    pub fn try_reserve(&mut self, minimum: usize) -> Result<()> {
        while self.buffer.len() - self.filled < minimum {
            self.grow()?;
        }
        Ok(())
    }

    /// Appends `bytes`, growing as needed.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.try_reserve(bytes.len())?;
        self.unfilled()[..bytes.len()].copy_from_slice(bytes);
        self.advance(bytes.len());
        Ok(())
    }

    /// Forgets the filled bytes while keeping the allocation.
    pub fn clear(&mut self) {
        self.filled = 0;
    }

    /// Consumes the buffer, returning the filled bytes.
    pub fn into_filled(mut self) -> Vec<u8> {
        self.buffer.truncate(self.filled);
        self.buffer
    }
}
