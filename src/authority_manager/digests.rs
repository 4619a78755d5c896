/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consensus digests: the messages that blocks carry to change the authority set.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::authority_set::Authority;

/// Identifier of the consensus engine that a digest is addressed to.
pub type EngineId = [u8; 4];

/// Engine id of GRANDPA digests. Digests addressed to any other engine are ignored.
pub const GRANDPA_ENGINE_ID: EngineId = *b"FRNK";

/// A change to the authority set, observed in the header of `target_block`.
///
/// Every delay is counted in blocks after the target block: a change with delay `d` on target block `T`
/// takes effect at block number `T + d`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusDigest {
    /// Replace the authority set. Pre-empted by any forced change on the same branch.
    ScheduledChange {
        authorities: Vec<Authority>,
        delay: u64,
    },

    /// Replace the authority set, discarding any scheduled change still pending on the same branch.
    ForcedChange {
        authorities: Vec<Authority>,
        delay: u64,
    },

    /// Set the weight of the authority at `authority_index` to zero, from the target block onwards. The
    /// authority set id is unchanged.
    OnDisabled { authority_index: u64 },

    /// Set the weight of every authority to zero, halting finality on this branch.
    Pause { delay: u64 },

    /// Undo a previous pause.
    Resume { delay: u64 },
}

impl ConsensusDigest {
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusDigest::ScheduledChange { .. } => "ScheduledChange",
            ConsensusDigest::ForcedChange { .. } => "ForcedChange",
            ConsensusDigest::OnDisabled { .. } => "OnDisabled",
            ConsensusDigest::Pause { .. } => "Pause",
            ConsensusDigest::Resume { .. } => "Resume",
        }
    }
}
