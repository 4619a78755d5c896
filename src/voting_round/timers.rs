/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The events a round consumes, and the timer threads that produce some of them.

use std::{
    sync::mpsc::Sender,
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    justification::Justification,
    types::{
        data_types::{AuthoritySetId, RoundNumber},
        signed_messages::SignedMessage,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageTimer {
    Prevote,
    Precommit,
}

/// Input to [`VotingRound::on_event`](super::implementation::VotingRound::on_event). A round applies its
/// events one at a time, in the order they were received.
///
/// Round numbers restart at 1 with every authority set, so every event names both the set and the round
/// it is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundEvent {
    /// A signed message received for `round` of the authority set `set_id`.
    Vote {
        set_id: AuthoritySetId,
        round: RoundNumber,
        message: SignedMessage,
    },

    /// The `timer` started when `round` of the authority set `set_id` was played has expired.
    StageTimerExpired {
        set_id: AuthoritySetId,
        round: RoundNumber,
        timer: StageTimer,
    },

    /// A justification received for round `justification.round` of the authority set `set_id`.
    Justification {
        set_id: AuthoritySetId,
        justification: Justification,
    },
}

/// Start a thread that sends `RoundEvent::StageTimerExpired` on `sender` after `after` has elapsed.
///
/// The thread is detached: a round that is dropped before its timers expire causes nothing but a failed
/// send, which is ignored.
pub(crate) fn start_stage_timer(
    sender: Sender<RoundEvent>,
    set_id: AuthoritySetId,
    round: RoundNumber,
    timer: StageTimer,
    after: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(after);
        let _ = sender.send(RoundEvent::StageTimerExpired {
            set_id,
            round,
            timer,
        });
    })
}
