/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the round
//! [configuration](crate::config::RoundConfiguration).
//!
//! grandpa-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveVote](crate::events::ReceiveVoteEvent) is printed:
//!
//! ```text
//! ReceiveVote, 1701329264, 3, Id5u7f6, Prevote, fNGCJyk, 9
//! ```
//!
//! In the snippet:
//! - The third value is the round number.
//! - The fourth value is the first seven characters of the Base64 encoding of the id of the authority
//!   that cast the vote.
//! - The fifth value is the kind of vote.
//! - The sixth and seventh values are the hash (shortened the same way) and number of the voted block.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{events::*, types::data_types::BlockInfo};

// Names of each event in PascalCase for printing:
pub const SCHEDULE_CHANGE: &str = "ScheduleChange";
pub const FINALIZE_SCHEDULE: &str = "FinalizeSchedule";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";

pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const EQUIVOCATION: &str = "Equivocation";

pub const START_ROUND: &str = "StartRound";
pub const STAGE_TIMEOUT: &str = "StageTimeout";
pub const UPDATE_PREVOTE_GHOST: &str = "UpdatePrevoteGhost";
pub const UPDATE_ESTIMATE: &str = "UpdateEstimate";
pub const FINALIZE: &str = "Finalize";
pub const COMPLETE_ROUND: &str = "CompleteRound";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ScheduleChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |schedule_change_event: &ScheduleChangeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SCHEDULE_CHANGE,
                secs_since_unix_epoch(schedule_change_event.timestamp),
                block_info(&schedule_change_event.target_block),
                schedule_change_event.digest.name()
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeScheduleEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_schedule_event: &FinalizeScheduleEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FINALIZE_SCHEDULE,
                secs_since_unix_epoch(finalize_schedule_event.timestamp),
                block_info(&finalize_schedule_event.root),
                finalize_schedule_event.set_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.round,
                block_info(&propose_event.proposal.block())
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.round,
                vote_event.vote.vote.kind(),
                block_info(&vote_event.vote.block())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                receive_vote_event.round,
                first_seven_base64_chars(&receive_vote_event.origin.bytes()),
                receive_vote_event.vote.vote.kind(),
                block_info(&receive_vote_event.vote.block())
            )
        };
        Box::new(logger)
    }
}

impl Logger for EquivocationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |equivocation_event: &EquivocationEvent| {
            let equivocation = &equivocation_event.equivocation;
            log::warn!(
                "{}, {}, {}, {}, {}, {}, {}",
                EQUIVOCATION,
                secs_since_unix_epoch(equivocation_event.timestamp),
                equivocation.round,
                first_seven_base64_chars(&equivocation.first.id.bytes()),
                equivocation.first.vote.kind(),
                block_info(&equivocation.first.block()),
                block_info(&equivocation.second.block())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.round,
                start_round_event.set_id,
                first_seven_base64_chars(&start_round_event.primary.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StageTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |stage_timeout_event: &StageTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                STAGE_TIMEOUT,
                secs_since_unix_epoch(stage_timeout_event.timestamp),
                stage_timeout_event.round,
                stage_timeout_event.stage,
                stage_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdatePrevoteGhostEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_prevote_ghost_event: &UpdatePrevoteGhostEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_PREVOTE_GHOST,
                secs_since_unix_epoch(update_prevote_ghost_event.timestamp),
                update_prevote_ghost_event.round,
                block_info(&update_prevote_ghost_event.prevote_ghost)
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateEstimateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_estimate_event: &UpdateEstimateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_ESTIMATE,
                secs_since_unix_epoch(update_estimate_event.timestamp),
                update_estimate_event.round,
                block_info(&update_estimate_event.estimate)
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_event: &FinalizeEvent| {
            let justification = &finalize_event.justification;
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                FINALIZE,
                secs_since_unix_epoch(finalize_event.timestamp),
                finalize_event.set_id,
                justification.round,
                block_info(&justification.block),
                justification.items.len(),
                first_seven_base64_chars(&justification.hash())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_round_event: &CompleteRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMPLETE_ROUND,
                secs_since_unix_epoch(complete_round_event.timestamp),
                complete_round_event.round,
                optional_block_info(&complete_round_event.estimate),
                optional_block_info(&complete_round_event.finalized)
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}

// A block as two CSV values: its shortened hash, then its number.
fn block_info(block: &BlockInfo) -> String {
    format!(
        "{}, {}",
        first_seven_base64_chars(&block.hash.bytes()),
        block.number
    )
}

fn optional_block_info(block: &Option<BlockInfo>) -> String {
    match block {
        Some(block) => block_info(block),
        None => String::from("None, None"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::{BlockHash, BlockNumber};

    #[test]
    fn first_seven_base64_chars_test() {
        assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
        assert_eq!(first_seven_base64_chars(&[255u8]), "/w");
    }

    #[test]
    fn block_info_test() {
        let block = BlockInfo::new(BlockNumber::new(9), BlockHash::new([0u8; 32]));
        assert_eq!(block_info(&block), "AAAAAAA, 9");
        assert_eq!(optional_block_info(&None), "None, None");
    }
}
