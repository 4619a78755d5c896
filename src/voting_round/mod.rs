/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The voting round: one attempt by an authority set to finalize a block.
//!
//! ## Stages
//!
//! A round moves through the [stages](state::RoundStage) below, never backwards:
//! 1. **Start**: when [played](implementation::VotingRound::play), the round starts its stage timers.
//!    If this voter is the round's primary (the authority at index `round mod len` of the set), it
//!    proposes the previous round's best final candidate, provided that candidate is higher than the last
//!    finalized block.
//! 2. **Propose**: the voter waits for the primary's proposal, the prevote timer, or the round becoming
//!    completable, whichever comes first. It then prevotes for the head of the best chain containing the
//!    primary's proposal, if the proposal extends the previous round's estimate, or else containing the
//!    previous round's estimate.
//! 3. **Prevote**: once prevotes with a total weight of at least the threshold are in, the round has a
//!    *prevote ghost*: the highest block that a threshold of prevotes agree on. The voter precommits
//!    when the round is completable or the precommit timer expires, for the prevote ghost if it extends
//!    the previous round's estimate, or else for the base of the round.
//! 4. **Precommit**: once precommits with a total weight of at least the threshold are in, the round
//!    has a *finalized* block: the highest ancestor of the prevote ghost that a threshold of precommits
//!    agree on. It also has an *estimate*: the highest ancestor of the prevote ghost that could still be
//!    finalized in this round. The round becomes *completable* when no block above the estimate can
//!    still be finalized in it.
//! 5. **Completable**: the [`Environment`](crate::environment::Environment) is told that the next round
//!    may start.
//! 6. **Finalized**: the finalized block reached the previous round's best final candidate.
//!
//! A block above the last finalized block only becomes the round's finalized block once
//! [`Environment::finalize`](crate::environment::Environment::finalize) accepted it.
//!
//! ## Justifications
//!
//! A round can also learn of a finalized block from a [justification](crate::justification) produced by
//! another voter. The justification's precommits are imported like any others, so a round that never
//! heard a prevote (for example, one the voter skipped to) can still finalize.
//!
//! ## Thresholds
//!
//! The threshold of an authority set with total weight `W` is `⌊2W/3⌋ + 1`. An authority that votes for
//! two different blocks in the same stage of a round has its weight counted once.
//!
//! ## Timers
//!
//! The prevote timer expires twice the configured stage duration after the round is played, and the
//! precommit timer four times the stage duration after. Timers are threads that post a
//! [`RoundEvent::StageTimerExpired`](timers::RoundEvent::StageTimerExpired) into the round's event
//! queue.

pub mod crypto_provider;

pub mod implementation;

pub mod state;

pub mod timers;
