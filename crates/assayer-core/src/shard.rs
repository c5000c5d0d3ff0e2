//! Deterministic sharding of the entry set.
//!
//! A shard is a pure function of entry identifier and shard count:
//! identifiers are sorted, then assigned by position modulo
//! `shard_count`. Discovery order never affects membership, so
//! re-running the same shard yields the same subset. The union over
//! all shard indices reproduces the full set exactly once.
//!
//! Sharding bounds peak memory: only one shard's entries are held in
//! memory at a time, and shard outputs are merged by the index builder.

use thiserror::Error;

/// Errors from shard parameter validation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShardError {
    #[error("shard_count must be >= 1, got {0}")]
    InvalidCount(usize),

    #[error("shard_index must be in range [0, {count}), got {index}")]
    IndexOutOfRange { index: usize, count: usize },
}

/// One deterministic partition of the entry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    index: usize,
    count: usize,
}

impl Shard {
    /// Validate shard parameters.
    pub fn new(index: usize, count: usize) -> Result<Self, ShardError> {
        if count < 1 {
            return Err(ShardError::InvalidCount(count));
        }
        if index >= count {
            return Err(ShardError::IndexOutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Select this shard's members from the full item set.
    ///
    /// Items are sorted first so that assignment depends only on the
    /// item values and the shard count, not on discovery order.
    pub fn select<T: Ord>(&self, mut items: Vec<T>) -> Vec<T> {
        items.sort();
        items
            .into_iter()
            .enumerate()
            .filter(|(position, _)| position % self.count == self.index)
            .map(|(_, item)| item)
            .collect()
    }
}
