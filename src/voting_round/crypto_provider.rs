/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::types::{
    crypto_primitives::Keypair,
    data_types::{AuthorityId, AuthoritySetId, BlockInfo, RoundNumber},
    signed_messages::{SignedMessage, Vote},
};

/// Signs this voter's votes and checks other voters' signatures, for one round of one authority set.
#[derive(Clone)]
pub struct VoteCryptoProvider {
    keypair: Keypair,
    round: RoundNumber,
    set_id: AuthoritySetId,
}

impl VoteCryptoProvider {
    pub fn new(keypair: Keypair, round: RoundNumber, set_id: AuthoritySetId) -> VoteCryptoProvider {
        VoteCryptoProvider {
            keypair,
            round,
            set_id,
        }
    }

    pub fn id(&self) -> AuthorityId {
        self.keypair.id()
    }

    pub fn sign_prevote(&self, block: BlockInfo) -> SignedMessage {
        SignedMessage::new(&self.keypair, Vote::Prevote(block), self.round, self.set_id)
    }

    pub fn sign_precommit(&self, block: BlockInfo) -> SignedMessage {
        SignedMessage::new(&self.keypair, Vote::Precommit(block), self.round, self.set_id)
    }

    pub fn sign_primary_propose(&self, block: BlockInfo) -> SignedMessage {
        SignedMessage::new(
            &self.keypair,
            Vote::PrimaryPropose(block),
            self.round,
            self.set_id,
        )
    }

    /// Whether `signed` carries a valid signature by its author for this round and authority set.
    pub fn verify(&self, signed: &SignedMessage) -> bool {
        signed.is_correct(self.round, self.set_id)
    }
}
