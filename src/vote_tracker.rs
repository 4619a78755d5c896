/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Storage of the votes of one kind (prevotes or precommits) cast in one round.
//!
//! A [`VoteTracker`] keeps at most one vote per authority. The first time an authority is seen voting
//! for something different from what it voted for before, both votes are kept as an
//! [equivocation](VoteVariant::Equivocation). The weight of an equivocating authority is counted exactly
//! once in [`total_weight`](VoteTracker::total_weight).

use std::collections::HashMap;

use crate::types::{
    data_types::{AuthorityId, Weight},
    signed_messages::{SignedMessage, VoteVariant},
};

/// The outcome of [`VoteTracker::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushResult {
    /// First vote from this authority.
    Accepted,

    /// The authority already cast exactly this vote. Nothing changed.
    Duplicate,

    /// The authority already cast a different vote.
    Equivocated,
}

pub struct VoteTracker {
    votes: HashMap<AuthorityId, (VoteVariant, Weight)>,
    // Authorities in the order their first vote arrived.
    arrival_order: Vec<AuthorityId>,
    total_weight: Weight,
}

impl Default for VoteTracker {
    fn default() -> Self {
        VoteTracker::new()
    }
}

impl VoteTracker {
    pub fn new() -> VoteTracker {
        Self {
            votes: HashMap::new(),
            arrival_order: Vec::new(),
            total_weight: Weight::zero(),
        }
    }

    /// Record `signed`, cast by an authority with voting weight `weight`.
    pub fn push(&mut self, signed: SignedMessage, weight: Weight) -> PushResult {
        if !self.votes.contains_key(&signed.id) {
            self.arrival_order.push(signed.id);
            self.total_weight += weight;
            self.votes
                .insert(signed.id, (VoteVariant::Vote(signed), weight));
            return PushResult::Accepted;
        }

        let (variant, _) = self
            .votes
            .get_mut(&signed.id)
            .expect("presence checked above; qed");
        match variant {
            VoteVariant::Vote(existing) if existing.vote == signed.vote => PushResult::Duplicate,
            VoteVariant::Vote(existing) => {
                *variant = VoteVariant::Equivocation(existing.clone(), signed);
                PushResult::Equivocated
            }
            VoteVariant::Equivocation(first, second) => {
                if first.vote == signed.vote || second.vote == signed.vote {
                    PushResult::Duplicate
                } else {
                    // Only the first two votes are kept as evidence.
                    PushResult::Equivocated
                }
            }
        }
    }

    /// Undo a push that returned [`PushResult::Accepted`]. Used when a vote was accepted by the tracker but
    /// could not be placed in the vote graph.
    pub fn unpush(&mut self, signed: &SignedMessage) {
        if let Some((VoteVariant::Vote(existing), weight)) = self.votes.get(&signed.id) {
            if existing == signed {
                self.total_weight -= *weight;
                self.votes.remove(&signed.id);
                self.arrival_order.retain(|id| id != &signed.id);
            }
        }
    }

    /// Sum of the weights of every authority that voted, with equivocators counted once.
    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    pub fn get(&self, id: &AuthorityId) -> Option<&VoteVariant> {
        self.votes.get(id).map(|(variant, _)| variant)
    }

    /// Get every vote and equivocation in the order the authorities were first heard from.
    pub fn messages(&self) -> Vec<VoteVariant> {
        self.arrival_order
            .iter()
            .filter_map(|id| self.votes.get(id).map(|(variant, _)| variant.clone()))
            .collect()
    }

    /// Get the authorities that equivocated, with their weights.
    pub fn equivocators(&self) -> impl Iterator<Item = (&AuthorityId, Weight)> {
        self.votes.iter().filter_map(|(id, (variant, weight))| match variant {
            VoteVariant::Equivocation(..) => Some((id, *weight)),
            VoteVariant::Vote(_) => None,
        })
    }

    /// Sum of the weights of the authorities that equivocated.
    pub fn equivocation_weight(&self) -> Weight {
        self.equivocators().map(|(_, weight)| weight).sum()
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        data_types::{BlockHash, BlockInfo, BlockNumber, SignatureBytes},
        signed_messages::Vote,
    };

    fn prevote(id: u8, number: u64, hash: u8) -> SignedMessage {
        SignedMessage {
            vote: Vote::Prevote(BlockInfo::new(
                BlockNumber::new(number),
                BlockHash::new([hash; 32]),
            )),
            signature: SignatureBytes::new([id; 64]),
            id: AuthorityId::new([id; 32]),
        }
    }

    #[test]
    fn push_and_equivocate_test() {
        let mut tracker = VoteTracker::new();

        assert_eq!(tracker.push(prevote(1, 9, 1), Weight::new(4)), PushResult::Accepted);
        assert_eq!(tracker.push(prevote(2, 9, 2), Weight::new(7)), PushResult::Accepted);
        assert_eq!(tracker.total_weight(), Weight::new(11));

        // Identical repeat.
        assert_eq!(tracker.push(prevote(1, 9, 1), Weight::new(4)), PushResult::Duplicate);
        assert_eq!(tracker.total_weight(), Weight::new(11));

        // Different payload from the same authority.
        assert_eq!(tracker.push(prevote(1, 6, 3), Weight::new(4)), PushResult::Equivocated);
        assert_eq!(tracker.total_weight(), Weight::new(11));
        assert_eq!(tracker.equivocation_weight(), Weight::new(4));
        assert_eq!(
            tracker.get(&AuthorityId::new([1; 32])),
            Some(&VoteVariant::Equivocation(prevote(1, 9, 1), prevote(1, 6, 3)))
        );

        // A third vote neither replaces the evidence nor changes the weight.
        assert_eq!(tracker.push(prevote(1, 7, 4), Weight::new(4)), PushResult::Equivocated);
        assert_eq!(tracker.push(prevote(1, 6, 3), Weight::new(4)), PushResult::Duplicate);
        assert_eq!(tracker.total_weight(), Weight::new(11));

        let messages = tracker.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id(), AuthorityId::new([1; 32]));
        assert_eq!(messages[1], VoteVariant::Vote(prevote(2, 9, 2)));
    }

    #[test]
    fn unpush_test() {
        let mut tracker = VoteTracker::new();
        tracker.push(prevote(1, 9, 1), Weight::new(4));
        tracker.push(prevote(2, 9, 2), Weight::new(7));

        tracker.unpush(&prevote(2, 9, 2));
        assert_eq!(tracker.total_weight(), Weight::new(4));
        assert!(tracker.get(&AuthorityId::new([2; 32])).is_none());
        assert_eq!(tracker.len(), 1);

        // Re-pushing after an unpush is accepted again.
        assert_eq!(tracker.push(prevote(2, 9, 2), Weight::new(7)), PushResult::Accepted);
    }
}
