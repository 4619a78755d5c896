/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of the authority manager's state.
//!
//! grandpa-rs persists exactly one value: the [schedule tree](crate::authority_manager::schedule_tree)
//! of the authority manager, serialized with Borsh under the fixed key [`SCHEDULE_TREE`]. The user
//! provides the key-value store by implementing [`KVStore`].

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::authority_manager::schedule_tree::{ScheduleTree, ScheduleTreeBytes};

/// Key under which the serialized schedule tree is stored.
pub const SCHEDULE_TREE: [u8; 1] = [0];

pub trait KVStore: KVGet + Clone + Send + Sync + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply `wb`. Failing to reach the underlying storage is reported as a [`KVWriteError`].
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError>;
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Get the persisted schedule tree, if one was ever written.
    fn schedule_tree(&self) -> Result<Option<ScheduleTree>, KVGetError> {
        match self.get(&SCHEDULE_TREE) {
            None => Ok(None),
            Some(bytes) => {
                let tree_bytes = ScheduleTreeBytes::deserialize(&mut bytes.as_slice()).map_err(
                    |err| KVGetError::DeserializeValueError {
                        key: Key::ScheduleTree,
                        source: err,
                    },
                )?;
                let tree = ScheduleTree::try_from(tree_bytes).map_err(|_| {
                    KVGetError::ValueExpectedButNotFound {
                        key: Key::ScheduleTree,
                    }
                })?;
                Ok(Some(tree))
            }
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value from a [`KVStore`].
///
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. A value that the deserialized value refers to cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError {
        key: Key,
        source: std::io::Error,
    },
    ValueExpectedButNotFound {
        key: Key,
    },
}

/// Error when trying to serialize a value into a [`WriteBatch`].
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

/// Error when a [`KVStore`] could not apply a write batch.
#[derive(Debug)]
pub struct KVWriteError {
    pub reason: String,
}

#[derive(Debug)]
pub enum Key {
    ScheduleTree,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::ScheduleTree => write!(f, "Authority Schedule Tree"),
        }
    }
}
