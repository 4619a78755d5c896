/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that passes published [events](crate::events) to their handlers.
//!
//! Each event type has its own list of handlers: the default [logger](crate::logging) of the event type
//! if logging is enabled, followed by the handler the user registered for it (if any) on the
//! [`VoterSpec`](crate::voter::VoterSpec) builder.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) schedule_change_handlers: Vec<HandlerPtr<ScheduleChangeEvent>>,
    pub(crate) finalize_schedule_handlers: Vec<HandlerPtr<FinalizeScheduleEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) equivocation_handlers: Vec<HandlerPtr<EquivocationEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) stage_timeout_handlers: Vec<HandlerPtr<StageTimeoutEvent>>,
    pub(crate) update_prevote_ghost_handlers: Vec<HandlerPtr<UpdatePrevoteGhostEvent>>,
    pub(crate) update_estimate_handlers: Vec<HandlerPtr<UpdateEstimateEvent>>,
    pub(crate) finalize_handlers: Vec<HandlerPtr<FinalizeEvent>>,
    pub(crate) complete_round_handlers: Vec<HandlerPtr<CompleteRoundEvent>>,
}

impl EventHandlers {
    /// Create a set of handler lists that contains the default loggers if `log_events` is true, and is
    /// empty otherwise.
    pub(crate) fn new(log_events: bool) -> EventHandlers {
        fn logger<T: Logger>(log_events: bool) -> Vec<HandlerPtr<T>> {
            if log_events {
                vec![T::get_logger()]
            } else {
                Vec::new()
            }
        }

        EventHandlers {
            schedule_change_handlers: logger(log_events),
            finalize_schedule_handlers: logger(log_events),
            propose_handlers: logger(log_events),
            vote_handlers: logger(log_events),
            receive_vote_handlers: logger(log_events),
            equivocation_handlers: logger(log_events),
            start_round_handlers: logger(log_events),
            stage_timeout_handlers: logger(log_events),
            update_prevote_ghost_handlers: logger(log_events),
            update_estimate_handlers: logger(log_events),
            finalize_handlers: logger(log_events),
            complete_round_handlers: logger(log_events),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.schedule_change_handlers.is_empty()
            && self.finalize_schedule_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.equivocation_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.stage_timeout_handlers.is_empty()
            && self.update_prevote_ghost_handlers.is_empty()
            && self.update_estimate_handlers.is_empty()
            && self.finalize_handlers.is_empty()
            && self.complete_round_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ScheduleChange(schedule_change_event) => self
                .schedule_change_handlers
                .iter()
                .for_each(|handler| handler(&schedule_change_event)),

            Event::FinalizeSchedule(finalize_schedule_event) => self
                .finalize_schedule_handlers
                .iter()
                .for_each(|handler| handler(&finalize_schedule_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::Equivocation(equivocation_event) => self
                .equivocation_handlers
                .iter()
                .for_each(|handler| handler(&equivocation_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::StageTimeout(stage_timeout_event) => self
                .stage_timeout_handlers
                .iter()
                .for_each(|handler| handler(&stage_timeout_event)),

            Event::UpdatePrevoteGhost(update_prevote_ghost_event) => self
                .update_prevote_ghost_handlers
                .iter()
                .for_each(|handler| handler(&update_prevote_ghost_event)),

            Event::UpdateEstimate(update_estimate_event) => self
                .update_estimate_handlers
                .iter()
                .for_each(|handler| handler(&update_estimate_event)),

            Event::Finalize(finalize_event) => self
                .finalize_handlers
                .iter()
                .for_each(|handler| handler(&finalize_event)),

            Event::CompleteRound(complete_round_event) => self
                .complete_round_handlers
                .iter()
                .for_each(|handler| handler(&complete_round_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone: the voter has stopped.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
