//! Types and traits that are used across multiple components of grandpa-rs.
//!
//! Other types, specific to single components, can be found in the modules of those components, e.g.,
//! [`crate::voting_round::state`].

pub mod authority_set;

pub mod crypto_primitives;

pub mod data_types;

pub mod signed_messages;
