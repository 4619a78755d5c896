/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Votes, signed votes, and evidence of equivocation.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{self, Keypair},
    data_types::{AuthorityId, AuthoritySetId, BlockInfo, RoundNumber, SignatureBytes},
};

/// The decision that an authority signs in a round. Each kind of vote names a single block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Vote {
    Prevote(BlockInfo),
    Precommit(BlockInfo),
    PrimaryPropose(BlockInfo),
}

impl Vote {
    pub fn block(&self) -> BlockInfo {
        match self {
            Vote::Prevote(block) | Vote::Precommit(block) | Vote::PrimaryPropose(block) => *block,
        }
    }

    pub fn kind(&self) -> VoteKind {
        match self {
            Vote::Prevote(_) => VoteKind::Prevote,
            Vote::Precommit(_) => VoteKind::Precommit,
            Vote::PrimaryPropose(_) => VoteKind::PrimaryPropose,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoteKind {
    Prevote,
    Precommit,
    PrimaryPropose,
}

impl Display for VoteKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VoteKind::Prevote => write!(f, "Prevote"),
            VoteKind::Precommit => write!(f, "Precommit"),
            VoteKind::PrimaryPropose => write!(f, "PrimaryPropose"),
        }
    }
}

/// A [`Vote`], the authority that cast it, and its signature over the vote, the round number, and the
/// authority set id. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedMessage {
    pub vote: Vote,
    pub signature: SignatureBytes,
    pub id: AuthorityId,
}

impl SignedMessage {
    /// Sign `vote` for `round` of the authority set `set_id` with `keypair`.
    pub fn new(
        keypair: &Keypair,
        vote: Vote,
        round: RoundNumber,
        set_id: AuthoritySetId,
    ) -> SignedMessage {
        let signature = keypair.sign(&Self::message_bytes(&vote, round, set_id));
        SignedMessage {
            vote,
            signature,
            id: keypair.id(),
        }
    }

    /// Get the bytes that are passed as input into the signing function to form the signature of a
    /// `SignedMessage` carrying `vote`.
    pub fn message_bytes(vote: &Vote, round: RoundNumber, set_id: AuthoritySetId) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a `Vec` cannot fail.
        let _ = (*vote, round, set_id).serialize(&mut bytes);
        bytes
    }

    /// Verify that `signature` is a signature created by `id` over this vote in `round` of the authority
    /// set `set_id`.
    pub fn is_correct(&self, round: RoundNumber, set_id: AuthoritySetId) -> bool {
        crypto_primitives::verify(
            &self.id,
            &Self::message_bytes(&self.vote, round, set_id),
            &self.signature,
        )
    }

    pub fn block(&self) -> BlockInfo {
        self.vote.block()
    }
}

/// What a vote tracker keeps for one authority: either its single vote, or the first two distinct votes
/// it cast, which together prove that it equivocated.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum VoteVariant {
    Vote(SignedMessage),
    Equivocation(SignedMessage, SignedMessage),
}

impl VoteVariant {
    pub fn id(&self) -> AuthorityId {
        match self {
            VoteVariant::Vote(vote) => vote.id,
            VoteVariant::Equivocation(first, _) => first.id,
        }
    }

    /// Get every signed message contained in this variant.
    pub fn messages(&self) -> Vec<&SignedMessage> {
        match self {
            VoteVariant::Vote(vote) => vec![vote],
            VoteVariant::Equivocation(first, second) => vec![first, second],
        }
    }
}

/// Evidence that an authority signed two different votes of the same kind in the same round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Equivocation {
    pub round: RoundNumber,
    pub set_id: AuthoritySetId,
    pub first: SignedMessage,
    pub second: SignedMessage,
}
