/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Stages of a voting round, and the state that carries over from one round to the next.

use std::fmt::{self, Display, Formatter};

use crate::types::{
    data_types::{BlockInfo, RoundNumber},
    signed_messages::VoteVariant,
};

/// Where a [`VotingRound`](super::implementation::VotingRound) is in its life.
///
/// Stages only ever move forward, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoundStage {
    /// Constructed, not played yet.
    Start,

    /// Waiting for the primary's proposal before prevoting.
    Propose,

    /// Prevoted. Waiting for a prevote ghost before precommitting.
    Prevote,

    /// Precommitted. Waiting for the round to become completable.
    Precommit,

    /// The round cannot produce a better estimate than it already has. The next round may start.
    Completable,

    /// The round finalized a block at least as high as the previous round's best final candidate.
    Finalized,
}

impl Display for RoundStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStage::Start => "Start",
            RoundStage::Propose => "Propose",
            RoundStage::Prevote => "Prevote",
            RoundStage::Precommit => "Precommit",
            RoundStage::Completable => "Completable",
            RoundStage::Finalized => "Finalized",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of a round, handed to the next round as its previous round, and to the
/// [`Environment`](crate::environment::Environment) when the round becomes completable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovableRoundState {
    pub round_number: RoundNumber,

    /// The primary proposal (if any), then every prevote, then every precommit, each group in the order the
    /// authorities were first heard from.
    pub votes: Vec<VoteVariant>,
    pub prevote_ghost: Option<BlockInfo>,
    pub estimate: Option<BlockInfo>,
    pub finalized: Option<BlockInfo>,
    pub last_finalized_block: BlockInfo,
    pub completable: bool,
}

impl MovableRoundState {
    /// The state of the implicit round 0 of an authority set whose first block is `base`: `base` is its
    /// ghost, estimate, and finalized block.
    pub fn genesis(base: BlockInfo) -> MovableRoundState {
        MovableRoundState {
            round_number: RoundNumber::new(0),
            votes: Vec::new(),
            prevote_ghost: Some(base),
            estimate: Some(base),
            finalized: Some(base),
            last_finalized_block: base,
            completable: true,
        }
    }

    /// The block that the next round should try to finalize at least: the estimate, else the finalized
    /// block, else the last finalized block the round started from.
    pub fn best_final_candidate(&self) -> BlockInfo {
        self.estimate
            .or(self.finalized)
            .unwrap_or(self.last_finalized_block)
    }
}
