/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definition for the read-only view of the block tree that grandpa-rs consumes.
//!
//! grandpa-rs does not import, store, or produce blocks. Everything it needs to know about the shape of
//! the block tree it asks through the [`Chain`] trait, which the user implements on top of their own
//! block storage.
//!
//! ## Consistency
//!
//! Answers must be consistent across calls made during the lifetime of one round: a block that was once
//! reported as a descendant of another must keep being reported as such.

use crate::types::data_types::{BlockHash, BlockInfo};

pub trait Chain: Clone + Send + Sync + 'static {
    /// Whether `block` is `base` itself or one of its descendants. Blocks unknown to the chain are never
    /// descendants.
    fn is_equal_or_descendant_of(&self, base: &BlockHash, block: &BlockHash) -> bool;

    /// Get the hashes of the blocks strictly between `base` and `block`, lowest block first.
    ///
    /// For a chain `base <- A <- B <- block` this returns `[A, B]`. Fails with
    /// [`ChainError::NotDescendant`] if `block` does not descend from `base`.
    fn ancestry(&self, base: &BlockHash, block: &BlockHash) -> Result<Vec<BlockHash>, ChainError>;

    /// Get the head of the best chain that contains `base`. Ties between forks are broken in favour of the
    /// chain's actual current best block.
    fn best_chain_containing(&self, base: &BlockHash) -> Result<BlockInfo, ChainError>;
}

/// Errors that the [`Chain`] may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain does not know the block with this hash.
    UnknownBlock { block: BlockHash },

    /// `block` is known but does not descend from `base`.
    NotDescendant { base: BlockHash, block: BlockHash },
}
