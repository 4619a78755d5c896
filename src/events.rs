/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of grandpa-rs events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by the
//! voting round and the authority manager onto a channel, and consumed by the
//! [event bus](crate::event_bus) thread, which passes each event to the handlers registered for its type:
//! the default [loggers](crate::logging) if logging is enabled, and the handlers passed to the
//! [`VoterSpec`](crate::voter::VoterSpec) builder.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::authority_manager::digests::ConsensusDigest;
use crate::justification::Justification;
use crate::types::{
    data_types::{AuthorityId, AuthoritySetId, BlockInfo, RoundNumber},
    signed_messages::{Equivocation, SignedMessage},
};
use crate::voting_round::state::RoundStage;

pub enum Event {
    // Events that change the persistent authority schedule.
    ScheduleChange(ScheduleChangeEvent),
    FinalizeSchedule(FinalizeScheduleEvent),
    // Events that involve signing and broadcasting a vote.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    // Events that involve receiving a vote.
    ReceiveVote(ReceiveVoteEvent),
    Equivocation(EquivocationEvent),
    // Round progress events.
    StartRound(StartRoundEvent),
    StageTimeout(StageTimeoutEvent),
    UpdatePrevoteGhost(UpdatePrevoteGhostEvent),
    UpdateEstimate(UpdateEstimateEvent),
    Finalize(FinalizeEvent),
    CompleteRound(CompleteRoundEvent),
}

impl Event {
    /// Publish this event on `event_publisher`, if any.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already have shut down while the voter winds down.
            let _ = event_publisher.send(self);
        }
    }
}

/// A consensus digest was applied to the schedule node of `target_block`.
pub struct ScheduleChangeEvent {
    pub timestamp: SystemTime,
    pub target_block: BlockInfo,
    pub digest: ConsensusDigest,
}

/// The schedule tree was re-rooted at `root` and persisted.
pub struct FinalizeScheduleEvent {
    pub timestamp: SystemTime,
    pub root: BlockInfo,
    pub set_id: AuthoritySetId,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub proposal: SignedMessage,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub vote: SignedMessage,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub origin: AuthorityId,
    pub vote: SignedMessage,
}

pub struct EquivocationEvent {
    pub timestamp: SystemTime,
    pub equivocation: Equivocation,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub set_id: AuthoritySetId,
    pub primary: AuthorityId,
}

pub struct StageTimeoutEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub stage: RoundStage,
    pub timeout: Duration,
}

pub struct UpdatePrevoteGhostEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub prevote_ghost: BlockInfo,
}

pub struct UpdateEstimateEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub estimate: BlockInfo,
}

pub struct FinalizeEvent {
    pub timestamp: SystemTime,
    pub set_id: AuthoritySetId,
    pub justification: Justification,
}

pub struct CompleteRoundEvent {
    pub timestamp: SystemTime,
    pub round: RoundNumber,
    pub estimate: Option<BlockInfo>,
    pub finalized: Option<BlockInfo>,
}
