/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a voter.
//!
//! A voter plays [voting rounds](crate::voting_round) back to back on a thread of its own. It starts from
//! the last block finalized by the [authority manager](crate::authority_manager), plays round 1 of the
//! authority set in effect at that block, and starts the next round once the current one is completable
//! and the round before it has a finalized block. Each time a round finalizes a block, the voter reports
//! it to the authority manager. When the authority set in effect at the last finalized block changes,
//! round numbering restarts at 1 with the new set.
//!
//! ## Rounds kept
//!
//! Besides the current round, the voter keeps the round before it, which goes on importing late votes and
//! can still finalize higher blocks. Votes for the round after the current one (or for round 1 of the next
//! authority set) are held back and replayed once that round starts. Every
//! [rebroadcast interval](RoundConfiguration::rebroadcast_interval) the voter hands its own votes in both
//! kept rounds to the environment again.
//!
//! Votes and justifications received from the network are passed to the voter through a [`VoterHandle`].
//! A justification for a round at or past the current one in the same authority set finalizes its block
//! and moves the voter on to the round after it.
//!
//! If the authority manager fails to persist a finalized block, the voter thread stops. The error is
//! returned by [`Voter::stop`].
//!
//! ## Starting a voter
//!
//! ```ignore
//! let voter =
//!     VoterSpec::builder()
//!         .kv_store(kv_store)
//!         .chain(chain)
//!         .environment(environment)
//!         .configuration(configuration)
//!         .genesis(genesis)
//!         .genesis_authorities(genesis_authorities)
//!         .on_finalize(|finalize_event| { ... })
//!         .build()
//!         .start()?;
//! ```
//!
//! Dropping the returned [`Voter`] stops its threads.

use std::{
    mem,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use typed_builder::TypedBuilder;

use crate::{
    authority_manager::{AuthorityContext, AuthorityManager, AuthorityManagerError},
    chain::Chain,
    config::RoundConfiguration,
    environment::Environment,
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    justification::Justification,
    pluggables::KVStore,
    types::{
        authority_set::Authority,
        data_types::{AuthoritySetId, BlockInfo, RoundNumber},
        signed_messages::SignedMessage,
    },
    voting_round::{
        implementation::VotingRound,
        state::{MovableRoundState, RoundStage},
        timers::RoundEvent,
    },
};

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [VoterSpec]. On the builder call the following methods to construct a valid [VoterSpec].

    Required:
    - `.kv_store(...)`
    - `.chain(...)`
    - `.environment(...)`
    - `.configuration(...)`
    - `.genesis(...)`
    - `.genesis_authorities(...)`

    Optional (each registers a handler for the event of the same name):
    - `.on_schedule_change(...)`
    - `.on_finalize_schedule(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_receive_vote(...)`
    - `.on_equivocation(...)`
    - `.on_start_round(...)`
    - `.on_stage_timeout(...)`
    - `.on_update_prevote_ghost(...)`
    - `.on_update_estimate(...)`
    - `.on_finalize(...)`
    - `.on_complete_round(...)`
"))]
pub struct VoterSpec<K: KVStore, C: Chain, E: Environment> {
    // Required parameters
    #[builder(setter(doc = "Set the key-value store in which the authority schedule is persisted. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the read-only view of the block tree. Required."))]
    chain: C,
    #[builder(setter(doc = "Set the environment that votes and finalizations are reported to. Required."))]
    environment: E,
    #[builder(setter(doc = "Set the [configuration](RoundConfiguration) of the rounds the voter plays. Required."))]
    configuration: RoundConfiguration,
    #[builder(setter(doc = "Set the genesis block, used if the key-value store holds no authority schedule. Required."))]
    genesis: BlockInfo,
    #[builder(setter(doc = "Set the authorities in effect at genesis, used if the key-value store holds no authority schedule. Required."))]
    genesis_authorities: Vec<Authority>,

    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&ScheduleChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ScheduleChangeEvent>),
    doc = "Register a handler closure to be invoked after a consensus digest is applied to the authority schedule. Optional."))]
    on_schedule_change: Option<HandlerPtr<ScheduleChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeScheduleEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeScheduleEvent>),
    doc = "Register a handler closure to be invoked after the authority schedule is re-rooted and persisted. Optional."))]
    on_finalize_schedule: Option<HandlerPtr<FinalizeScheduleEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the voter, as primary, proposes a block. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the voter casts a prevote or a precommit. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the voter receives a vote for its current or previous round. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EquivocationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EquivocationEvent>),
    doc = "Register a handler closure to be invoked after an equivocation is detected. Optional."))]
    on_equivocation: Option<HandlerPtr<EquivocationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after a round is played. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StageTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StageTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a stage timer expires. Optional."))]
    on_stage_timeout: Option<HandlerPtr<StageTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdatePrevoteGhostEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdatePrevoteGhostEvent>),
    doc = "Register a handler closure to be invoked after the prevote ghost of a round changes. Optional."))]
    on_update_prevote_ghost: Option<HandlerPtr<UpdatePrevoteGhostEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateEstimateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateEstimateEvent>),
    doc = "Register a handler closure to be invoked after the estimate of a round changes. Optional."))]
    on_update_estimate: Option<HandlerPtr<UpdateEstimateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeEvent>),
    doc = "Register a handler closure to be invoked after a round finalizes a block. Optional."))]
    on_finalize: Option<HandlerPtr<FinalizeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CompleteRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CompleteRoundEvent>),
    doc = "Register a handler closure to be invoked after a round becomes completable. Optional."))]
    on_complete_round: Option<HandlerPtr<CompleteRoundEvent>>,
}

impl<K: KVStore, C: Chain, E: Environment> VoterSpec<K, C, E> {
    /// Prepare the authority manager, then start the voter thread (and the event bus thread, if any
    /// handler is registered or logging is enabled).
    pub fn start(self) -> Result<Voter<K, C>, AuthorityManagerError> {
        let mut event_handlers = EventHandlers::new(self.configuration.log_events);
        event_handlers.schedule_change_handlers.extend(self.on_schedule_change);
        event_handlers.finalize_schedule_handlers.extend(self.on_finalize_schedule);
        event_handlers.propose_handlers.extend(self.on_propose);
        event_handlers.vote_handlers.extend(self.on_vote);
        event_handlers.receive_vote_handlers.extend(self.on_receive_vote);
        event_handlers.equivocation_handlers.extend(self.on_equivocation);
        event_handlers.start_round_handlers.extend(self.on_start_round);
        event_handlers.stage_timeout_handlers.extend(self.on_stage_timeout);
        event_handlers.update_prevote_ghost_handlers.extend(self.on_update_prevote_ghost);
        event_handlers.update_estimate_handlers.extend(self.on_update_estimate);
        event_handlers.finalize_handlers.extend(self.on_finalize);
        event_handlers.complete_round_handlers.extend(self.on_complete_round);

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let authority_manager = Arc::new(AuthorityManager::prepare(
            self.kv_store,
            self.chain.clone(),
            self.genesis,
            self.genesis_authorities,
            event_publisher.clone(),
        )?);

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(event_bus), Some(shutdown))
            }
            None => (None, None),
        };

        let (round_events, round_event_receiver) = mpsc::channel();
        let (voter_shutdown, voter_shutdown_receiver) = mpsc::channel();
        let voter_loop = VoterLoop {
            configuration: self.configuration,
            authority_manager: authority_manager.clone(),
            chain: self.chain,
            environment: self.environment,
            round_events: round_events.clone(),
            event_publisher,
        };
        let voter = thread::spawn(move || {
            let result = voter_loop.run(round_event_receiver, voter_shutdown_receiver);
            if let Err(err) = &result {
                log::error!("Voter stopped: {:?}", err);
            }
            result
        });

        Ok(Voter {
            authority_manager,
            round_events,
            voter: Some(voter),
            voter_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a running voter. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Voter<K: KVStore, C: Chain> {
    authority_manager: Arc<AuthorityManager<K, C>>,
    round_events: Sender<RoundEvent>,
    voter: Option<JoinHandle<Result<(), VoterError>>>,
    voter_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, C: Chain> Voter<K, C> {
    /// Get a handle through which votes and justifications received from the network can be passed to
    /// the voter.
    pub fn handle(&self) -> VoterHandle {
        VoterHandle {
            round_events: self.round_events.clone(),
        }
    }

    /// Get the authority manager of the voter. The block import pipeline should pass consensus digests to
    /// it through [`on_consensus`](AuthorityManager::on_consensus).
    pub fn authority_manager(&self) -> &Arc<AuthorityManager<K, C>> {
        &self.authority_manager
    }

    /// Whether the voter thread is still playing rounds. It stops on its own only after an error.
    pub fn is_running(&self) -> bool {
        self.voter
            .as_ref()
            .map_or(false, |voter| !voter.is_finished())
    }

    /// Stop the background threads, and return the error that stopped the voter thread, if any.
    pub fn stop(mut self) -> Result<(), VoterError> {
        let _ = self.voter_shutdown.send(());
        match self.voter.take() {
            Some(voter) => voter.join().unwrap_or(Err(VoterError::ThreadPanicked)),
            None => Ok(()),
        }
    }
}

impl<K: KVStore, C: Chain> Drop for Voter<K, C> {
    fn drop(&mut self) {
        // The voter thread publishes events, so it is stopped before the event bus.
        let _ = self.voter_shutdown.send(());
        if let Some(voter) = self.voter.take() {
            let _ = voter.join();
        }

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

/// Cloneable sender of votes and justifications into a running [`Voter`].
#[derive(Clone)]
pub struct VoterHandle {
    round_events: Sender<RoundEvent>,
}

impl VoterHandle {
    /// Pass `message`, received for `round` of the authority set `set_id`, to the voter. Does nothing if
    /// the voter has stopped.
    pub fn submit_vote(&self, set_id: AuthoritySetId, round: RoundNumber, message: SignedMessage) {
        let _ = self.round_events.send(RoundEvent::Vote {
            set_id,
            round,
            message,
        });
    }

    /// Pass a justification received from another voter to the voter. Does nothing if the voter has
    /// stopped.
    pub fn submit_justification(&self, set_id: AuthoritySetId, justification: Justification) {
        let _ = self.round_events.send(RoundEvent::Justification {
            set_id,
            justification,
        });
    }
}

/// Reasons for the voter thread to stop on its own.
#[derive(Debug)]
pub enum VoterError {
    /// The authority set of a round could not be determined, or a finalized block could not be persisted.
    AuthorityManagerError(AuthorityManagerError),

    ThreadPanicked,
}

impl From<AuthorityManagerError> for VoterError {
    fn from(value: AuthorityManagerError) -> Self {
        VoterError::AuthorityManagerError(value)
    }
}

// Votes held back for the round after the current one.
const MAX_EARLY_VOTES: usize = 1024;

/// State owned by the voter thread.
struct VoterLoop<K: KVStore, C: Chain, E: Environment> {
    configuration: RoundConfiguration,
    authority_manager: Arc<AuthorityManager<K, C>>,
    chain: C,
    environment: E,
    round_events: Sender<RoundEvent>,
    event_publisher: Option<Sender<Event>>,
}

/// The rounds the voter keeps, and the votes it received ahead of them.
struct Rounds<C: Chain> {
    current: VotingRound<C>,
    previous: Option<VotingRound<C>>,
    early_votes: Vec<(AuthoritySetId, RoundNumber, SignedMessage)>,
}

impl<C: Chain> Rounds<C> {
    /// Whether a vote for `round` of `set_id` belongs to the round that will follow the current one.
    fn is_next(&self, set_id: AuthoritySetId, round: RoundNumber) -> bool {
        (set_id == self.current.set_id() && round == self.current.round_number() + 1)
            || (set_id == self.current.set_id().next() && round == RoundNumber::new(1))
    }

    /// Give the current round a fresh snapshot of the previous round, if they belong to the same set.
    fn refresh_previous<E: Environment>(&mut self, env: &mut E) {
        if let Some(previous) = &self.previous {
            if previous.set_id() == self.current.set_id() {
                self.current
                    .update_previous_round(Arc::new(previous.state()), env);
            }
        }
    }
}

impl<K: KVStore, C: Chain, E: Environment> VoterLoop<K, C, E> {
    fn run(
        mut self,
        round_events: Receiver<RoundEvent>,
        shutdown_signal: Receiver<()>,
    ) -> Result<(), VoterError> {
        let mut last_finalized = self.authority_manager.root();
        let mut rounds = Rounds {
            current: self.first_round(last_finalized)?,
            previous: None,
            early_votes: Vec::new(),
        };
        rounds.current.play(&mut self.environment);
        let mut last_rebroadcast = Instant::now();

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => (),
            }

            let mut concluded = false;
            match round_events.recv_timeout(Duration::from_millis(50)) {
                Ok(RoundEvent::Vote {
                    set_id,
                    round,
                    message,
                }) => self.on_vote(&mut rounds, set_id, round, message),
                Ok(RoundEvent::Justification {
                    set_id,
                    justification,
                }) => {
                    concluded =
                        self.on_justification(&mut rounds, set_id, justification, last_finalized)
                }
                Ok(timer) => {
                    let _ = rounds.current.on_event(timer, &mut self.environment);
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }

            if last_rebroadcast.elapsed() >= self.configuration.rebroadcast_interval() {
                if let Some(previous) = &mut rounds.previous {
                    previous.rebroadcast(&mut self.environment);
                }
                rounds.refresh_previous(&mut self.environment);
                rounds.current.rebroadcast(&mut self.environment);
                last_rebroadcast = Instant::now();
            }

            for round in rounds.previous.iter().chain([&rounds.current]) {
                if let Some(finalized) = round.finalized() {
                    if finalized.number > last_finalized.number {
                        self.authority_manager.on_finalize(&finalized)?;
                        last_finalized = finalized;
                    }
                }
            }

            let previous_finalized = rounds
                .previous
                .as_ref()
                .map_or(true, |previous| previous.finalized().is_some());
            if concluded || (rounds.current.stage() >= RoundStage::Completable && previous_finalized) {
                let next = self.next_round(&rounds.current, last_finalized)?;
                rounds.previous = Some(mem::replace(&mut rounds.current, next));
                rounds.current.play(&mut self.environment);

                for (set_id, round, message) in mem::take(&mut rounds.early_votes) {
                    self.on_vote(&mut rounds, set_id, round, message);
                }
            }
        }
    }

    /// Route a vote to the current round or the previous one, hold it back if it is for the next round,
    /// and drop it otherwise.
    fn on_vote(
        &mut self,
        rounds: &mut Rounds<C>,
        set_id: AuthoritySetId,
        round: RoundNumber,
        message: SignedMessage,
    ) {
        let env = &mut self.environment;
        if set_id == rounds.current.set_id() && round == rounds.current.round_number() {
            // Rejections are logged by the round.
            let _ = rounds.current.import_vote(message, env);
            return;
        }

        if let Some(previous) = &mut rounds.previous {
            if set_id == previous.set_id() && round == previous.round_number() {
                if previous.import_vote(message, env).is_ok() {
                    rounds.refresh_previous(env);
                }
                return;
            }
        }

        if rounds.is_next(set_id, round) {
            if rounds.early_votes.len() < MAX_EARLY_VOTES {
                rounds.early_votes.push((set_id, round, message));
            } else {
                log::debug!("Too many early votes, dropped one for round {} of set {}", round, set_id);
            }
            return;
        }

        log::debug!("Dropped a vote for round {} of set {}", round, set_id);
    }

    /// Apply a justification to the round it is for. Returns whether the current round should end.
    ///
    /// A justification for a later round of the current set is applied to a fresh round with that number,
    /// which replaces the current one.
    fn on_justification(
        &mut self,
        rounds: &mut Rounds<C>,
        set_id: AuthoritySetId,
        justification: Justification,
        last_finalized: BlockInfo,
    ) -> bool {
        let env = &mut self.environment;
        let round = justification.round;

        if set_id == rounds.current.set_id() && round == rounds.current.round_number() {
            return match rounds.current.apply_justification(&justification, env) {
                Ok(()) => true,
                Err(err) => {
                    log::debug!("Justification for round {} rejected: {:?}", round, err);
                    false
                }
            };
        }

        if let Some(previous) = &mut rounds.previous {
            if set_id == previous.set_id() && round == previous.round_number() {
                match previous.apply_justification(&justification, env) {
                    Ok(()) => rounds.refresh_previous(env),
                    Err(err) => log::debug!("Justification for round {} rejected: {:?}", round, err),
                }
                return false;
            }
        }

        if set_id == rounds.current.set_id() && round > rounds.current.round_number() {
            let mut skipped_to = VotingRound::new(
                self.configuration.clone(),
                round,
                rounds.current.authorities().clone(),
                None,
                last_finalized,
                self.chain.clone(),
                None,
                self.event_publisher.clone(),
            );
            return match skipped_to.apply_justification(&justification, env) {
                Ok(()) => {
                    log::info!(
                        "Skipping from round {} to round {} of set {} after a justification",
                        rounds.current.round_number(),
                        round,
                        set_id
                    );
                    rounds.current = skipped_to;
                    rounds.previous = None;
                    true
                }
                Err(err) => {
                    log::debug!("Justification for round {} rejected: {:?}", round, err);
                    false
                }
            };
        }

        log::debug!("Dropped a justification for round {} of set {}", round, set_id);
        false
    }

    /// Round 1 of the authority set in effect at `last_finalized`.
    fn first_round(&self, last_finalized: BlockInfo) -> Result<VotingRound<C>, AuthorityManagerError> {
        let authorities = self
            .authority_manager
            .authorities(&last_finalized, AuthorityContext::Current)?;
        Ok(VotingRound::new(
            self.configuration.clone(),
            RoundNumber::new(1),
            authorities,
            Some(Arc::new(MovableRoundState::genesis(last_finalized))),
            last_finalized,
            self.chain.clone(),
            Some(self.round_events.clone()),
            self.event_publisher.clone(),
        ))
    }

    /// The round after `completed`, or round 1 of a new authority set if the set changed at
    /// `last_finalized`.
    fn next_round(
        &self,
        completed: &VotingRound<C>,
        last_finalized: BlockInfo,
    ) -> Result<VotingRound<C>, AuthorityManagerError> {
        let authorities = self
            .authority_manager
            .authorities(&last_finalized, AuthorityContext::Current)?;
        if authorities.id() != completed.set_id() {
            log::info!(
                "Authority set {} takes over from set {} at block {}",
                authorities.id(),
                completed.set_id(),
                last_finalized
            );
            return self.first_round(last_finalized);
        }

        Ok(VotingRound::new(
            self.configuration.clone(),
            completed.round_number() + 1,
            authorities,
            Some(Arc::new(completed.state())),
            last_finalized,
            self.chain.clone(),
            Some(self.round_events.clone()),
            self.event_publisher.clone(),
        ))
    }
}
