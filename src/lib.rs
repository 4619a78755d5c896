/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the GRANDPA finality gadget.
//!
//! grandpa-rs lets a weighted set of authorities agree, round by round, on which blocks of a block tree
//! are final, while tracking how that authority set changes from fork to fork.
//!
//! ## Components
//!
//! 1. The [authority manager](authority_manager) tracks the authority set in effect at every block, by
//!    applying the consensus digests that blocks carry.
//! 2. The [vote graph](vote_graph) accumulates vote weight over the ancestry of voted blocks.
//! 3. The [vote tracker](vote_tracker) keeps one vote per authority and detects equivocations.
//! 4. The [voting round](voting_round) drives one round of propose, prevote, precommit, and finalize.
//! 5. The [voter](voter) plays rounds back to back on a thread of its own.
//!
//! ## Pluggables
//!
//! The user provides the block tree through the [`Chain`](chain::Chain) trait, persistence through the
//! [`KVStore`](pluggables::KVStore) trait, and networking and block finality through the
//! [`Environment`](environment::Environment) trait.

pub mod authority_manager;

pub mod chain;

pub mod config;

pub mod environment;

pub mod events;

pub(crate) mod event_bus;

pub mod justification;

pub mod logging;

pub mod pluggables;

pub mod types;

pub mod vote_graph;

pub mod vote_tracker;

pub mod voter;

pub mod voting_round;
