/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Proof that a block was finalized in a round.
//!
//! A [`Justification`] collects the signed precommits that made a block final: every precommit for the
//! block or one of its descendants, plus both messages of every precommit equivocation seen in the round.
//! Equivocators count towards every block, since their votes can be attributed to whichever block
//! benefits.
//!
//! Anyone who knows the authority set of the round can [`verify`](Justification::verify) a
//! justification without knowing anything else about the round.

use std::collections::{HashMap, HashSet};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    chain::Chain,
    types::{
        authority_set::AuthoritySet,
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{AuthorityId, AuthoritySetId, BlockInfo, RoundNumber, Weight},
        signed_messages::{SignedMessage, Vote},
    },
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Justification {
    pub round: RoundNumber,
    pub block: BlockInfo,
    pub items: Vec<SignedMessage>,
}

impl Justification {
    /// Check that this justification proves `block` final for the authority set `authorities`.
    ///
    /// Every item must be a precommit, correctly signed for this round by a member of `authorities`. Each
    /// authority contributes its weight at most once: either through precommits for `block` or its
    /// descendants, or by having precommitted two different blocks. The total must reach the set's
    /// threshold.
    pub fn verify<C: Chain>(
        &self,
        set_id: AuthoritySetId,
        authorities: &AuthoritySet,
        chain: &C,
    ) -> Result<(), JustificationError> {
        let mut blocks_by_voter: HashMap<AuthorityId, HashSet<BlockInfo>> = HashMap::new();
        for item in &self.items {
            let block = match item.vote {
                Vote::Precommit(block) => block,
                _ => return Err(JustificationError::NotAPrecommit { id: item.id }),
            };
            if !authorities.contains(&item.id) {
                return Err(JustificationError::UnknownVoter { id: item.id });
            }
            if !item.is_correct(self.round, set_id) {
                return Err(JustificationError::InvalidSignature { id: item.id });
            }
            blocks_by_voter.entry(item.id).or_default().insert(block);
        }

        let mut weight = Weight::zero();
        for (id, blocks) in &blocks_by_voter {
            let equivocated = blocks.len() > 1;
            if !equivocated {
                let supports = blocks
                    .iter()
                    .all(|block| chain.is_equal_or_descendant_of(&self.block.hash, &block.hash));
                if !supports {
                    return Err(JustificationError::PrecommitNotDescendant { id: *id });
                }
            }
            weight += authorities.weight(id).unwrap_or_default();
        }

        let threshold = authorities.threshold();
        if weight < threshold {
            return Err(JustificationError::InsufficientWeight { weight, threshold });
        }
        Ok(())
    }

    /// Compute the SHA256 hash over the Borsh encoding of this justification.
    pub fn hash(&self) -> [u8; 32] {
        let mut bytes = Vec::new();
        // Writing into a `Vec` cannot fail.
        let _ = self.serialize(&mut bytes);
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }
}

/// Reasons for a [`Justification`] to fail [verification](Justification::verify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JustificationError {
    NotAPrecommit { id: AuthorityId },
    UnknownVoter { id: AuthorityId },
    InvalidSignature { id: AuthorityId },

    /// The authority precommitted only for a block that does not contain the justified block.
    PrecommitNotDescendant { id: AuthorityId },

    InsufficientWeight { weight: Weight, threshold: Weight },
}
