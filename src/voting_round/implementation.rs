/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of a single voting round.
//!
//! Main type: [`VotingRound`].

use std::{
    cmp,
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use crate::{
    chain::Chain,
    config::RoundConfiguration,
    environment::{Environment, EnvironmentError},
    events::{
        CompleteRoundEvent, EquivocationEvent, Event, FinalizeEvent, ProposeEvent,
        ReceiveVoteEvent, StageTimeoutEvent, StartRoundEvent, UpdateEstimateEvent,
        UpdatePrevoteGhostEvent, VoteEvent,
    },
    justification::{Justification, JustificationError},
    types::{
        authority_set::AuthoritySet,
        data_types::{AuthorityId, AuthoritySetId, BlockInfo, RoundNumber, Weight},
        signed_messages::{Equivocation, SignedMessage, Vote, VoteVariant},
    },
    vote_graph::{VoteGraph, VoteGraphError},
    vote_tracker::{PushResult, VoteTracker},
};

use super::{
    crypto_provider::VoteCryptoProvider,
    state::{MovableRoundState, RoundStage},
    timers::{start_stage_timer, RoundEvent, StageTimer},
};

/// One round of voting by one authority set.
///
/// # Usage
///
/// After creating a `VotingRound` using [`new`](Self::new), the caller should:
/// 1. Call [`play`](Self::play) once, to start the round's timers and, if this voter is the round's
///    primary, propose a block.
/// 2. Pass every [`RoundEvent`] addressed to the round to [`on_event`](Self::on_event), one at a time.
/// 3. Call [`rebroadcast`](Self::rebroadcast) every now and then, for as long as the round is kept.
///
/// All of the round's effects on the outside world go through the `Environment` passed into these
/// methods. The round never blocks.
///
/// A round stays able to import late votes after it reaches [`RoundStage::Finalized`], so that it can
/// still advance its finalized block.
///
/// A block counts as the round's finalized block only once [`Environment::finalize`] accepted it. If the
/// environment refuses, the round tries again the next time its votes change or it is rebroadcast.
pub struct VotingRound<C: Chain> {
    config: RoundConfiguration,
    round_number: RoundNumber,
    authorities: Arc<AuthoritySet>,
    threshold: Weight,
    crypto: VoteCryptoProvider,
    chain: C,
    // `None` for a round with no predecessor in its authority set.
    previous_round: Option<Arc<MovableRoundState>>,
    last_finalized: BlockInfo,
    stage: RoundStage,

    primary_proposal: Option<SignedMessage>,
    prevotes: VoteTracker,
    precommits: VoteTracker,
    prevote_graph: VoteGraph,
    precommit_graph: VoteGraph,

    prevote_ghost: Option<BlockInfo>,
    estimate: Option<BlockInfo>,
    finalized: Option<BlockInfo>,
    // Reached the threshold, but the environment refused to finalize it.
    refused_finalization: Option<BlockInfo>,
    completable: bool,

    prevote_timer_expired: bool,
    precommit_timer_expired: bool,
    timer_sender: Option<Sender<RoundEvent>>,
    event_publisher: Option<Sender<Event>>,
}

impl<C: Chain> VotingRound<C> {
    /// Create a round numbered `round_number`, voted on by `authorities`, that follows `previous_round`.
    /// A round without a previous round treats `last_finalized` as the previous estimate.
    ///
    /// Both vote graphs are based at `last_finalized`. If `timer_sender` is `None`, `play` starts no
    /// timers, and the caller is responsible for passing `RoundEvent::StageTimerExpired` events.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RoundConfiguration,
        round_number: RoundNumber,
        authorities: Arc<AuthoritySet>,
        previous_round: Option<Arc<MovableRoundState>>,
        last_finalized: BlockInfo,
        chain: C,
        timer_sender: Option<Sender<RoundEvent>>,
        event_publisher: Option<Sender<Event>>,
    ) -> VotingRound<C> {
        let crypto = VoteCryptoProvider::new(config.keypair.clone(), round_number, authorities.id());
        Self {
            config,
            round_number,
            threshold: authorities.threshold(),
            authorities,
            crypto,
            chain,
            previous_round,
            last_finalized,
            stage: RoundStage::Start,
            primary_proposal: None,
            prevotes: VoteTracker::new(),
            precommits: VoteTracker::new(),
            prevote_graph: VoteGraph::new(last_finalized),
            precommit_graph: VoteGraph::new(last_finalized),
            prevote_ghost: None,
            estimate: None,
            finalized: None,
            refused_finalization: None,
            completable: false,
            prevote_timer_expired: false,
            precommit_timer_expired: false,
            timer_sender,
            event_publisher,
        }
    }

    /// Rebuild a round from a snapshot by replaying its votes. `previous_round` is the snapshot of the round
    /// before it, as passed to [`new`](Self::new) when the round was first created.
    ///
    /// The rebuilt round is never played: it lands in `Completable` or `Finalized` if the votes make it so,
    /// and in `Precommit` otherwise. Replaying calls no `Environment` method and publishes no events.
    pub fn from_state(
        config: RoundConfiguration,
        state: &MovableRoundState,
        previous_round: Option<Arc<MovableRoundState>>,
        authorities: Arc<AuthoritySet>,
        chain: C,
        event_publisher: Option<Sender<Event>>,
    ) -> VotingRound<C> {
        let mut round = VotingRound::new(
            config,
            state.round_number,
            authorities,
            previous_round,
            state.last_finalized_block,
            chain,
            None,
            None,
        );

        let mut silent = SilentEnvironment;
        for variant in &state.votes {
            for message in variant.messages() {
                if let Err(err) = round.import(message.clone(), &mut silent) {
                    log::debug!(
                        "Vote by {:?} not replayed into round {}: {:?}",
                        message.id,
                        state.round_number,
                        err
                    );
                }
            }
        }

        round.stage = if round.completable {
            RoundStage::Completable
        } else {
            RoundStage::Precommit
        };
        round.advance(&mut silent);
        round.event_publisher = event_publisher;
        round
    }

    /// Start the round: start its stage timers and, if this voter is the primary, propose the previous
    /// round's best final candidate. Does nothing if the round was already played.
    pub fn play<E: Environment>(&mut self, env: &mut E) {
        if self.stage != RoundStage::Start {
            return;
        }

        let primary = self.authorities.primary(self.round_number).copied();
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            round: self.round_number,
            set_id: self.set_id(),
            primary: primary.unwrap_or_default(),
        })
        .publish(&self.event_publisher);
        self.stage = RoundStage::Propose;

        if let Some(sender) = &self.timer_sender {
            start_stage_timer(
                sender.clone(),
                self.set_id(),
                self.round_number,
                StageTimer::Prevote,
                self.config.prevote_timeout(),
            );
            start_stage_timer(
                sender.clone(),
                self.set_id(),
                self.round_number,
                StageTimer::Precommit,
                self.config.precommit_timeout(),
            );
        }

        if self.is_voter() && primary == Some(self.crypto.id()) {
            let candidate = self.previous_best_final_candidate();
            if candidate.number > self.last_finalized.number {
                let proposal = self.crypto.sign_primary_propose(candidate);
                env.on_voted(self.round_number, self.set_id(), &proposal);
                Event::Propose(ProposeEvent {
                    timestamp: SystemTime::now(),
                    round: self.round_number,
                    proposal: proposal.clone(),
                })
                .publish(&self.event_publisher);
                self.primary_proposal = Some(proposal);
            }
        }

        self.advance(env);
    }

    /// Apply one event addressed to the round.
    ///
    /// Votes and justifications for other rounds, including rounds with the same number in other
    /// authority sets, fail with `WrongAuthoritySet` or `WrongRound`. Timer expiries from other rounds are
    /// ignored.
    pub fn on_event<E: Environment>(
        &mut self,
        event: RoundEvent,
        env: &mut E,
    ) -> Result<(), VotingRoundError> {
        match event {
            RoundEvent::Vote {
                set_id,
                round,
                message,
            } => {
                self.check_addressee(set_id, round)?;
                self.import_vote(message, env)
            }
            RoundEvent::StageTimerExpired {
                set_id,
                round,
                timer,
            } => {
                if set_id == self.set_id() && round == self.round_number {
                    self.on_timer_expired(timer, env);
                }
                Ok(())
            }
            RoundEvent::Justification {
                set_id,
                justification,
            } => {
                self.check_addressee(set_id, justification.round)?;
                self.apply_justification(&justification, env)
            }
        }
    }

    /// Import a vote received from another voter, and move the round forward as far as it can go.
    ///
    /// Votes from unknown or zero-weight voters, badly signed votes, repeats, and equivocations are
    /// dropped (equivocations are still recorded as evidence) and reported as errors.
    pub fn import_vote<E: Environment>(
        &mut self,
        signed: SignedMessage,
        env: &mut E,
    ) -> Result<(), VotingRoundError> {
        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            round: self.round_number,
            origin: signed.id,
            vote: signed.clone(),
        })
        .publish(&self.event_publisher);

        let id = signed.id;
        let result = self.import(signed, env);
        if let Err(err) = &result {
            log::debug!(
                "Dropped vote by {:?} in round {}: {:?}",
                id,
                self.round_number,
                err
            );
        }
        self.advance(env);
        result
    }

    /// Import a justification for this round received from another voter, and finalize its block without
    /// waiting to hear the round's votes directly.
    ///
    /// The justification is checked against the round's authority set first. Its precommits are then
    /// imported like any other precommit, so the round's own justifications stay complete.
    pub fn apply_justification<E: Environment>(
        &mut self,
        justification: &Justification,
        env: &mut E,
    ) -> Result<(), VotingRoundError> {
        if justification.round != self.round_number {
            return Err(VotingRoundError::WrongRound {
                expected: self.round_number,
                received: justification.round,
            });
        }
        justification.verify(self.set_id(), &self.authorities, &self.chain)?;

        for item in &justification.items {
            if let Err(err) = self.import(item.clone(), env) {
                log::debug!(
                    "Precommit by {:?} from a justification not counted in round {}: {:?}",
                    item.id,
                    self.round_number,
                    err
                );
            }
        }

        let result = self.try_finalize(justification.block, env);
        self.advance(env);
        result.map_err(VotingRoundError::EnvironmentError)
    }

    /// Replace the snapshot of the previous round, after the previous round changed by importing late
    /// votes. This can move the round on to `Finalized`.
    pub fn update_previous_round<E: Environment>(
        &mut self,
        previous_round: Arc<MovableRoundState>,
        env: &mut E,
    ) {
        self.previous_round = Some(previous_round);
        self.advance(env);
    }

    /// Hand the votes this voter cast in the round to the environment again, and retry finalizing the
    /// round's finalized block if the environment refused it before.
    pub fn rebroadcast<E: Environment>(&mut self, env: &mut E) {
        let id = self.crypto.id();
        let mut own_votes: Vec<SignedMessage> = self
            .primary_proposal
            .iter()
            .filter(|proposal| proposal.id == id)
            .cloned()
            .collect();
        for tracker in [&self.prevotes, &self.precommits] {
            if let Some(variant) = tracker.get(&id) {
                own_votes.extend(variant.messages().into_iter().cloned());
            }
        }
        for vote in &own_votes {
            env.on_voted(self.round_number, self.set_id(), vote);
        }

        if let Some(block) = self.refused_finalization {
            let _ = self.try_finalize(block, env);
            self.advance(env);
        }
    }

    /// Handle the expiry of one of the round's stage timers.
    pub fn on_timer_expired<E: Environment>(&mut self, timer: StageTimer, env: &mut E) {
        let timeout = match timer {
            StageTimer::Prevote => self.config.prevote_timeout(),
            StageTimer::Precommit => self.config.precommit_timeout(),
        };
        Event::StageTimeout(StageTimeoutEvent {
            timestamp: SystemTime::now(),
            round: self.round_number,
            stage: self.stage,
            timeout,
        })
        .publish(&self.event_publisher);

        match timer {
            StageTimer::Prevote => self.prevote_timer_expired = true,
            StageTimer::Precommit => {
                // The precommit deadline lies after the prevote deadline.
                self.prevote_timer_expired = true;
                self.precommit_timer_expired = true;
            }
        }
        self.advance(env);
    }

    pub fn round_number(&self) -> RoundNumber {
        self.round_number
    }

    pub fn set_id(&self) -> AuthoritySetId {
        self.authorities.id()
    }

    pub fn authorities(&self) -> &Arc<AuthoritySet> {
        &self.authorities
    }

    pub fn stage(&self) -> RoundStage {
        self.stage
    }

    pub fn primary_proposal(&self) -> Option<&SignedMessage> {
        self.primary_proposal.as_ref()
    }

    pub fn prevote_ghost(&self) -> Option<BlockInfo> {
        self.prevote_ghost
    }

    pub fn estimate(&self) -> Option<BlockInfo> {
        self.estimate
    }

    pub fn finalized(&self) -> Option<BlockInfo> {
        self.finalized
    }

    pub fn is_completable(&self) -> bool {
        self.completable
    }

    pub fn prevote_weight(&self) -> Weight {
        self.prevotes.total_weight()
    }

    pub fn precommit_weight(&self) -> Weight {
        self.precommits.total_weight()
    }

    /// The block that the next round should try to finalize at least.
    pub fn best_final_candidate(&self) -> BlockInfo {
        self.estimate
            .or(self.finalized)
            .unwrap_or(self.last_finalized)
    }

    /// Take a snapshot of the round.
    pub fn state(&self) -> MovableRoundState {
        let mut votes: Vec<VoteVariant> = self
            .primary_proposal
            .iter()
            .cloned()
            .map(VoteVariant::Vote)
            .collect();
        votes.extend(self.prevotes.messages());
        votes.extend(self.precommits.messages());

        MovableRoundState {
            round_number: self.round_number,
            votes,
            prevote_ghost: self.prevote_ghost,
            estimate: self.estimate,
            finalized: self.finalized,
            last_finalized_block: self.last_finalized,
            completable: self.completable,
        }
    }

    /// Collect the precommits that justify finalizing `block` in this round: every precommit for `block`
    /// or one of its descendants, and both messages of every precommit equivocation.
    pub fn justification(&self, block: BlockInfo) -> Justification {
        let items = self
            .precommits
            .messages()
            .into_iter()
            .flat_map(|variant| match variant {
                VoteVariant::Vote(precommit) => {
                    if self
                        .chain
                        .is_equal_or_descendant_of(&block.hash, &precommit.block().hash)
                    {
                        vec![precommit]
                    } else {
                        Vec::new()
                    }
                }
                VoteVariant::Equivocation(first, second) => vec![first, second],
            })
            .collect();

        Justification {
            round: self.round_number,
            block,
            items,
        }
    }

    fn check_addressee(
        &self,
        set_id: AuthoritySetId,
        round: RoundNumber,
    ) -> Result<(), VotingRoundError> {
        if set_id != self.set_id() {
            return Err(VotingRoundError::WrongAuthoritySet {
                expected: self.set_id(),
                received: set_id,
            });
        }
        if round != self.round_number {
            return Err(VotingRoundError::WrongRound {
                expected: self.round_number,
                received: round,
            });
        }
        Ok(())
    }

    fn previous_estimate(&self) -> BlockInfo {
        self.previous_round
            .as_ref()
            .and_then(|previous| previous.estimate)
            .unwrap_or(self.last_finalized)
    }

    fn previous_best_final_candidate(&self) -> BlockInfo {
        self.previous_round
            .as_ref()
            .map_or(self.last_finalized, |previous| previous.best_final_candidate())
    }

    fn is_voter(&self) -> bool {
        self.authorities
            .weight(&self.crypto.id())
            .map_or(false, |weight| !weight.is_zero())
    }

    /// Move through as many stages as the current state allows.
    fn advance<E: Environment>(&mut self, env: &mut E) {
        loop {
            let stage = self.stage;
            match stage {
                RoundStage::Start | RoundStage::Finalized => {}
                RoundStage::Propose => {
                    if self.primary_proposal.is_some()
                        || self.prevote_timer_expired
                        || self.completable
                    {
                        self.stage = RoundStage::Prevote;
                        self.prevote(env);
                    }
                }
                RoundStage::Prevote => {
                    // A completable round always has a prevote ghost.
                    if self.completable || self.precommit_timer_expired {
                        self.stage = RoundStage::Precommit;
                        self.precommit(env);
                    }
                }
                RoundStage::Precommit => {
                    if self.completable {
                        self.stage = RoundStage::Completable;
                        env.on_completed(&self.state());
                        Event::CompleteRound(CompleteRoundEvent {
                            timestamp: SystemTime::now(),
                            round: self.round_number,
                            estimate: self.estimate,
                            finalized: self.finalized,
                        })
                        .publish(&self.event_publisher);
                    }
                }
                RoundStage::Completable => {
                    let candidate = self.previous_best_final_candidate();
                    if self
                        .finalized
                        .map_or(false, |finalized| finalized.number >= candidate.number)
                    {
                        self.stage = RoundStage::Finalized;
                    }
                }
            }

            if self.stage == stage {
                break;
            }
        }
    }

    fn prevote<E: Environment>(&mut self, env: &mut E) {
        if !self.is_voter() {
            return;
        }

        let previous_estimate = self.previous_estimate();
        let base = match &self.primary_proposal {
            Some(proposal)
                if proposal.block().number > previous_estimate.number
                    && self
                        .chain
                        .is_equal_or_descendant_of(&previous_estimate.hash, &proposal.block().hash) =>
            {
                proposal.block()
            }
            _ => previous_estimate,
        };
        let target = match self.chain.best_chain_containing(&base.hash) {
            Ok(head) => head,
            Err(err) => {
                log::warn!(
                    "No best chain containing {} in round {} ({:?}), prevoting the last finalized block",
                    base,
                    self.round_number,
                    err
                );
                self.last_finalized
            }
        };

        let prevote = self.crypto.sign_prevote(target);
        self.cast(prevote, env);
    }

    fn precommit<E: Environment>(&mut self, env: &mut E) {
        if !self.is_voter() {
            return;
        }

        let previous_estimate = self.previous_estimate();
        let target = match self.prevote_ghost {
            Some(ghost)
                if self
                    .chain
                    .is_equal_or_descendant_of(&previous_estimate.hash, &ghost.hash) =>
            {
                ghost
            }
            _ => self.prevote_graph.base(),
        };

        let precommit = self.crypto.sign_precommit(target);
        self.cast(precommit, env);
    }

    /// Hand this voter's own vote to the environment, then count it.
    fn cast<E: Environment>(&mut self, vote: SignedMessage, env: &mut E) {
        env.on_voted(self.round_number, self.set_id(), &vote);
        Event::Vote(VoteEvent {
            timestamp: SystemTime::now(),
            round: self.round_number,
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        if let Err(err) = self.import(vote, env) {
            log::warn!(
                "Own vote could not be counted in round {}: {:?}",
                self.round_number,
                err
            );
        }
    }

    /// Check and count `signed`, then recompute the ghost, the estimate, and the finalized block.
    fn import<E: Environment>(
        &mut self,
        signed: SignedMessage,
        env: &mut E,
    ) -> Result<(), VotingRoundError> {
        let weight = self
            .authorities
            .weight(&signed.id)
            .ok_or(VotingRoundError::UnknownVoter { id: signed.id })?;
        if weight.is_zero() {
            return Err(VotingRoundError::ZeroWeightVoter { id: signed.id });
        }
        if !self.crypto.verify(&signed) {
            return Err(VotingRoundError::InvalidSignature { id: signed.id });
        }

        let result = self.count(signed, weight);
        // Equivocations change what can still be precommitted, so this runs even if counting failed.
        self.update(env);
        result
    }

    fn count(&mut self, signed: SignedMessage, weight: Weight) -> Result<(), VotingRoundError> {
        let (tracker, graph) = match signed.vote {
            Vote::PrimaryPropose(_) => return self.count_primary_proposal(signed),
            Vote::Prevote(_) => (&mut self.prevotes, &mut self.prevote_graph),
            Vote::Precommit(_) => (&mut self.precommits, &mut self.precommit_graph),
        };

        match tracker.push(signed.clone(), weight) {
            PushResult::Accepted => {
                if let Err(err) = graph.insert(signed.block(), weight, &self.chain) {
                    tracker.unpush(&signed);
                    return Err(err.into());
                }
                Ok(())
            }
            PushResult::Duplicate => Err(VotingRoundError::DuplicateVote { id: signed.id }),
            PushResult::Equivocated => {
                if let Some(VoteVariant::Equivocation(first, _)) = tracker.get(&signed.id) {
                    let equivocation = Equivocation {
                        round: self.round_number,
                        set_id: self.authorities.id(),
                        first: first.clone(),
                        second: signed.clone(),
                    };
                    report_equivocation(equivocation, &self.event_publisher);
                }
                Err(VotingRoundError::EquivocatedVote { id: signed.id })
            }
        }
    }

    fn count_primary_proposal(&mut self, signed: SignedMessage) -> Result<(), VotingRoundError> {
        if self.authorities.primary(self.round_number) != Some(&signed.id) {
            return Err(VotingRoundError::NotPrimary { id: signed.id });
        }

        match &self.primary_proposal {
            None => {
                self.primary_proposal = Some(signed);
                Ok(())
            }
            Some(existing) if existing.vote == signed.vote => {
                Err(VotingRoundError::DuplicateVote { id: signed.id })
            }
            Some(existing) => {
                // The first proposal stays in effect.
                let equivocation = Equivocation {
                    round: self.round_number,
                    set_id: self.authorities.id(),
                    first: existing.clone(),
                    second: signed.clone(),
                };
                report_equivocation(equivocation, &self.event_publisher);
                Err(VotingRoundError::EquivocatedVote { id: signed.id })
            }
        }
    }

    /// Recompute the prevote ghost, the finalized block, the estimate, and completability from the votes
    /// counted so far.
    fn update<E: Environment>(&mut self, env: &mut E) {
        let threshold = self.threshold;
        if self.prevotes.total_weight() < threshold {
            return;
        }

        let ghost = self
            .prevote_graph
            .find_ghost(self.prevote_ghost, |weight| weight >= threshold);
        if ghost != self.prevote_ghost {
            if let Some(prevote_ghost) = ghost {
                Event::UpdatePrevoteGhost(UpdatePrevoteGhostEvent {
                    timestamp: SystemTime::now(),
                    round: self.round_number,
                    prevote_ghost,
                })
                .publish(&self.event_publisher);
            }
            self.prevote_ghost = ghost;
        }
        let ghost = match ghost {
            Some(ghost) => ghost,
            None => return,
        };

        let precommit_total = self.precommits.total_weight();
        if precommit_total < threshold {
            // Until a threshold of precommits is in, any block could still gather one.
            self.set_estimate(ghost);
            return;
        }

        if let Some((block, _)) =
            self.precommit_graph
                .find_ancestor(ghost, |weight| weight >= threshold, &self.chain)
        {
            // A refusal is logged, and retried on the next update.
            let _ = self.try_finalize(block, env);
        }

        let total = self.authorities.total_weight();
        let remaining = total - precommit_total;
        let additional_equivocations = (total - threshold) - self.precommits.equivocation_weight();
        // Weight that a block could still end up with: its own precommits, every precommit not heard yet,
        // and the precommits for other blocks by voters who may still equivocate in its favour.
        let possible_to_precommit = |weight: Weight| {
            let possible_equivocations =
                cmp::min(precommit_total - weight, additional_equivocations);
            weight + remaining + possible_equivocations >= threshold
        };

        if let Some((estimate, _)) =
            self.precommit_graph
                .find_ancestor(ghost, &possible_to_precommit, &self.chain)
        {
            self.set_estimate(estimate);
            self.completable = estimate != ghost
                || self
                    .precommit_graph
                    .find_ghost(Some(estimate), &possible_to_precommit)
                    .map_or(true, |block| block == ghost);
        }
    }

    fn set_estimate(&mut self, estimate: BlockInfo) {
        if self.estimate != Some(estimate) {
            self.estimate = Some(estimate);
            Event::UpdateEstimate(UpdateEstimateEvent {
                timestamp: SystemTime::now(),
                round: self.round_number,
                estimate,
            })
            .publish(&self.event_publisher);
        }
    }

    /// Make `block` the round's finalized block if it is higher than the current one. A block above the
    /// last finalized block is first handed to the environment, and only counts once it was accepted.
    fn try_finalize<E: Environment>(
        &mut self,
        block: BlockInfo,
        env: &mut E,
    ) -> Result<(), EnvironmentError> {
        if self
            .finalized
            .map_or(false, |finalized| block.number <= finalized.number)
        {
            return Ok(());
        }

        if block.number > self.last_finalized.number {
            let justification = self.justification(block);
            if let Err(err) = env.finalize(self.set_id(), &justification) {
                log::error!(
                    "Environment failed to finalize {} in round {}: {}",
                    block,
                    self.round_number,
                    err.reason
                );
                self.refused_finalization = Some(block);
                return Err(err);
            }
            Event::Finalize(FinalizeEvent {
                timestamp: SystemTime::now(),
                set_id: self.set_id(),
                justification,
            })
            .publish(&self.event_publisher);
        }

        self.finalized = Some(block);
        if self
            .refused_finalization
            .map_or(false, |refused| refused.number <= block.number)
        {
            self.refused_finalization = None;
        }
        Ok(())
    }
}

fn report_equivocation(equivocation: Equivocation, event_publisher: &Option<Sender<Event>>) {
    log::warn!(
        "Equivocation by {:?} in round {}: {} and {}",
        equivocation.first.id,
        equivocation.round,
        equivocation.first.vote.kind(),
        equivocation.second.vote.kind()
    );
    Event::Equivocation(EquivocationEvent {
        timestamp: SystemTime::now(),
        equivocation,
    })
    .publish(event_publisher);
}

/// Environment used while replaying a snapshot, whose effects already happened.
struct SilentEnvironment;

impl Environment for SilentEnvironment {
    fn on_voted(&mut self, _: RoundNumber, _: AuthoritySetId, _: &SignedMessage) {}

    fn finalize(&mut self, _: AuthoritySetId, _: &Justification) -> Result<(), EnvironmentError> {
        Ok(())
    }

    fn on_completed(&mut self, _: &MovableRoundState) {}
}

/// Reasons a vote or a justification was not counted by a round.
#[derive(Debug)]
pub enum VotingRoundError {
    /// The author is not in the round's authority set.
    UnknownVoter { id: AuthorityId },

    /// The author's weight is zero: it was disabled, or the set is paused.
    ZeroWeightVoter { id: AuthorityId },

    InvalidSignature { id: AuthorityId },

    /// A primary proposal by an authority that is not the round's primary.
    NotPrimary { id: AuthorityId },

    WrongRound {
        expected: RoundNumber,
        received: RoundNumber,
    },

    WrongAuthoritySet {
        expected: AuthoritySetId,
        received: AuthoritySetId,
    },

    /// The author already cast exactly this vote.
    DuplicateVote { id: AuthorityId },

    /// The author already cast a different vote of the same kind. The evidence was recorded.
    EquivocatedVote { id: AuthorityId },

    /// The vote graph could not place the vote.
    VoteGraphError(VoteGraphError),

    /// A justification for the round failed verification.
    InvalidJustification(JustificationError),

    /// The environment refused to finalize a block. The round retries later.
    EnvironmentError(EnvironmentError),
}

impl From<VoteGraphError> for VotingRoundError {
    fn from(value: VoteGraphError) -> Self {
        VotingRoundError::VoteGraphError(value)
    }
}

impl From<JustificationError> for VotingRoundError {
    fn from(value: JustificationError) -> Self {
        VotingRoundError::InvalidJustification(value)
    }
}

