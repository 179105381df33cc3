//! Collective operations between cooperating ranks.
//!
//! A rank owns a contiguous `[start, end)` range of particles. Reductions are
//! blocking: every rank must reach every call, and every rank receives the same
//! result.

pub mod exchange;
pub mod single;
pub mod thread_group;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("Rank {rank} contributed {found} values to a reduction of {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        found: usize,
    },

    #[error("A peer rank panicked while holding the reduction buffer")]
    Poisoned,
}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    #[inline]
    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Replaces every element of `values` by its sum over all ranks.
    ///
    /// The sum is taken in rank order, so results are bitwise identical on all ranks.
    fn sum(&self, values: &mut [f64]) -> Result<(), CommError>;
}
