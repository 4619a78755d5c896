/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a voter and of the voting rounds it plays.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::types::crypto_primitives::{Keypair, SigningKey};

/// Parameters shared by every [voting round](crate::voting_round) that a voter plays.
///
/// ## Stage timers
///
/// Every round starts two timers when it is played: the prevote timer, which expires after twice the
/// `stage_duration`, and the precommit timer, which expires after four times the `stage_duration`. The
/// stage duration should be at least the expected worst-case network latency between two authorities.
///
/// A running voter also sends its own votes again every four stage durations.
///
/// ## Log Events
///
/// grandpa-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
/// onto a terminal or to a file, set up a
/// [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [RoundConfiguration]. On the builder call the following methods to construct a valid [RoundConfiguration].

    Required:
    - `.keypair(...)`
    - `.stage_duration(...)`
    - `.log_events(...)`
"))]
pub struct RoundConfiguration {
    #[builder(setter(
        transform = |signing_key: SigningKey| Keypair::new(signing_key),
        doc = "Set the voter's signing key, used to sign votes. Required."
    ))]
    pub keypair: Keypair,
    #[builder(setter(doc = "Set the base duration from which the stage timers of each round are derived. Required."))]
    pub stage_duration: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl RoundConfiguration {
    /// Time after the start of a round at which a voter prevotes even if it heard no primary proposal.
    pub fn prevote_timeout(&self) -> Duration {
        self.stage_duration * 2
    }

    /// Time after the start of a round at which a voter precommits even if the round is not completable.
    pub fn precommit_timeout(&self) -> Duration {
        self.stage_duration * 4
    }

    /// Interval at which a voter sends its votes in its current and previous rounds again, for
    /// authorities that missed them.
    pub fn rebroadcast_interval(&self) -> Duration {
        self.stage_duration * 4
    }
}
