/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definition for the outside world that voting rounds report to.
//!
//! grandpa-rs does not send votes over the network or write finality to the block store by itself. The
//! user implements [`Environment`] to do these things. Its methods are called from the voter thread, in
//! the order the corresponding actions happen in the round.

use crate::{
    justification::Justification,
    types::{
        data_types::{AuthoritySetId, RoundNumber},
        signed_messages::SignedMessage,
    },
    voting_round::state::MovableRoundState,
};

pub trait Environment: Send + 'static {
    /// Called when this voter signed `vote` in `round` of the authority set `set_id`. The implementation
    /// should broadcast it to the other authorities.
    fn on_voted(&mut self, round: RoundNumber, set_id: AuthoritySetId, vote: &SignedMessage);

    /// Called every time the finalized block of a round advances. The block is not final from the
    /// chain's point of view until this returns `Ok`.
    fn finalize(
        &mut self,
        set_id: AuthoritySetId,
        justification: &Justification,
    ) -> Result<(), EnvironmentError>;

    /// Called once when a round becomes completable, with the state the next round should start from.
    fn on_completed(&mut self, state: &MovableRoundState);
}

/// Failure reported by an [`Environment`]. A block the environment failed to finalize is not counted as
/// finalized by the round, which tries again later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentError {
    pub reason: String,
}
