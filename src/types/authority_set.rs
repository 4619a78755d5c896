/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Authority`] and [`AuthoritySet`] types and their associated methods.

use std::slice;

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{AuthorityId, AuthoritySetId, RoundNumber, Weight};

/// A weighted voting participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Authority {
    pub id: AuthorityId,
    pub weight: Weight,
}

impl Authority {
    pub const fn new(id: AuthorityId, weight: Weight) -> Self {
        Self { id, weight }
    }
}

/// Identities of authorities, their voting weights, and the id of the set they form.
///
/// The authorities of an `AuthoritySet` keep the order in which they were listed by the consensus digest
/// that introduced them. This order is the
/// voting index order: it decides, for example, who the [primary](AuthoritySet::primary) of a round is.
///
/// # Limits to total weight
///
/// The total weight of an authority set must not exceed `u64::MAX`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AuthoritySet {
    id: AuthoritySetId,
    authorities: Vec<Authority>,
}

impl AuthoritySet {
    pub fn new(id: AuthoritySetId, authorities: Vec<Authority>) -> AuthoritySet {
        Self { id, authorities }
    }

    pub fn id(&self) -> AuthoritySetId {
        self.id
    }

    /// Get an iterator through the authorities in voting index order.
    pub fn authorities(&self) -> slice::Iter<Authority> {
        self.authorities.iter()
    }

    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    pub fn contains(&self, authority: &AuthorityId) -> bool {
        self.position(authority).is_some()
    }

    pub fn position(&self, authority: &AuthorityId) -> Option<usize> {
        self.authorities.iter().position(|a| &a.id == authority)
    }

    pub fn weight(&self, authority: &AuthorityId) -> Option<Weight> {
        self.authorities
            .iter()
            .find(|a| &a.id == authority)
            .map(|a| a.weight)
    }

    /// Get the voting index and weight of `authority`, if it is a member of this set.
    pub fn index_and_weight(&self, authority: &AuthorityId) -> Option<(usize, Weight)> {
        self.authorities
            .iter()
            .enumerate()
            .find(|(_, a)| &a.id == authority)
            .map(|(index, a)| (index, a.weight))
    }

    pub fn total_weight(&self) -> Weight {
        self.authorities.iter().map(|a| a.weight).sum()
    }

    /// Compute the minimum weight that is strictly greater than two thirds of the total weight.
    ///
    /// A set whose weights were all zeroed (for example, by a pause) has a threshold of 1, so nothing can be
    /// finalized with it.
    pub fn threshold(&self) -> Weight {
        threshold(self.total_weight())
    }

    /// Get the primary of `round`: the authority whose voting index is `round mod len`.
    pub fn primary(&self, round: RoundNumber) -> Option<&AuthorityId> {
        if self.authorities.is_empty() {
            return None;
        }
        let index = (round.int() % self.authorities.len() as u64) as usize;
        Some(&self.authorities[index].id)
    }

    /// Get a copy of this set in which the authority at `index` has weight zero. Returns `None` if `index`
    /// is out of bounds.
    pub(crate) fn with_disabled(&self, index: usize) -> Option<AuthoritySet> {
        let mut disabled = self.clone();
        disabled.authorities.get_mut(index)?.weight = Weight::zero();
        Some(disabled)
    }

    /// Get a copy of this set in which every authority has weight zero.
    pub(crate) fn zeroed(&self) -> AuthoritySet {
        AuthoritySet {
            id: self.id,
            authorities: self
                .authorities
                .iter()
                .map(|a| Authority::new(a.id, Weight::zero()))
                .collect(),
        }
    }
}

/// Compute ⌊2W/3⌋ + 1 for a total weight `W`, in integer arithmetic.
pub fn threshold(total_weight: Weight) -> Weight {
    Weight::new((total_weight.int() as u128 * 2 / 3) as u64 + 1)
}
