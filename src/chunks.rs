//! Positional chunk allocation
//!
//! A run's time period is cut into fixed-size chunks so buffered data moves
//! in bounded units. Chunk ids are purely positional (`i / max_step`), not
//! calendar-aligned, and are re-indexed on every acquisition pass.

use crate::errors::{HydrobufError, Result};
use std::ops::Range;

/// Chunk layout for a period of `len` timestamps with at most `max_step`
/// timestamps per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    len: usize,
    max_step: usize,
}

impl ChunkPlan {
    /// # Errors
    ///
    /// [`HydrobufError::Config`] when `max_step` is zero.
    pub fn new(len: usize, max_step: usize) -> Result<Self> {
        if max_step == 0 {
            return Err(HydrobufError::Config {
                message: "chunk max_step must be greater than zero".to_string(),
            });
        }
        Ok(ChunkPlan { len, max_step })
    }

    /// Chunk id of the timestamp at position `index`.
    pub fn id_of(&self, index: usize) -> usize {
        index / self.max_step
    }

    /// Number of chunks, `ceil(len / max_step)`.
    pub fn num_chunks(&self) -> usize {
        self.len.div_ceil(self.max_step)
    }

    /// One chunk id per timestamp position.
    pub fn ids(&self) -> Vec<usize> {
        (0..self.len).map(|i| self.id_of(i)).collect()
    }

    /// Iterate `(chunk_id, index_range)` pairs. Every range has `max_step`
    /// elements except possibly the last.
    pub fn ranges(&self) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        (0..self.num_chunks()).map(move |id| {
            let start = id * self.max_step;
            let end = (start + self.max_step).min(self.len);
            (id, start..end)
        })
    }
}

/// Zero-padded chunk label, substituted for the `$subset` token in buffer
/// file names so lexicographic order matches chunk order.
pub fn chunk_label(chunk_id: usize, width: usize) -> String {
    format!("{:0width$}", chunk_id, width = width)
}
