/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracking of the authority set across the forks of the block tree.
//!
//! The [`AuthorityManager`] answers one question: which [`AuthoritySet`] votes on a given block? The
//! answer can differ between forks, because blocks carry [consensus digests](digests::ConsensusDigest)
//! that schedule changes to the authority set, and those changes only take effect on the branch that
//! contains the digest.
//!
//! ## Lifecycle
//!
//! 1. [`prepare`](AuthorityManager::prepare) loads the persisted [schedule tree](schedule_tree) from the
//!    user's [`KVStore`], or starts a new one at genesis.
//! 2. The block import pipeline calls [`on_consensus`](AuthorityManager::on_consensus) for every digest it
//!    finds in an imported block header.
//! 3. The [voter](crate::voter) calls [`on_finalize`](AuthorityManager::on_finalize) every time a block is
//!    finalized. This re-roots the schedule tree at the finalized block, forgets every branch that
//!    conflicts with it, and persists the result.
//!
//! ## Concurrency
//!
//! The schedule tree sits behind a single `RwLock`. Queries take the read lock, updates the write lock.
//! An `AuthorityManager` is meant to be shared behind an `Arc`.

pub mod digests;

pub mod schedule_tree;

use std::sync::{mpsc::Sender, Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use borsh::BorshSerialize;

use crate::{
    chain::Chain,
    events::{Event, FinalizeScheduleEvent, ScheduleChangeEvent},
    pluggables::{KVGetError, KVSetError, KVStore, KVWriteError, Key, WriteBatch, SCHEDULE_TREE},
    types::{
        authority_set::{Authority, AuthoritySet},
        data_types::{AuthoritySetId, BlockInfo},
    },
};

use self::{
    digests::{ConsensusDigest, EngineId, GRANDPA_ENGINE_ID},
    schedule_tree::{PendingChange, ScheduleTree, ScheduleTreeBytes},
};

/// Which authority set to get for a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorityContext {
    /// The set that votes on the block.
    Current,

    /// The set that will vote on the block's children. Differs from `Current` only if a change activates
    /// at the next block number.
    Next,
}

pub struct AuthorityManager<K: KVStore, C: Chain> {
    tree: RwLock<ScheduleTree>,
    kv_store: Mutex<K>,
    chain: C,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, C: Chain> AuthorityManager<K, C> {
    /// Create an `AuthorityManager` from the schedule tree persisted in `kv_store`.
    ///
    /// If nothing is persisted, start a new tree rooted at `genesis`, in which `genesis_authorities` form
    /// the authority set with id 0, and persist it.
    pub fn prepare(
        kv_store: K,
        chain: C,
        genesis: BlockInfo,
        genesis_authorities: Vec<Authority>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<AuthorityManager<K, C>, AuthorityManagerError> {
        let tree = match Self::load(&kv_store) {
            Ok(tree) => tree,
            Err(AuthorityManagerError::NoPersistentState) => {
                log::info!(
                    "No persisted authority schedule found, starting from genesis block {}",
                    genesis
                );
                let tree = ScheduleTree::new(
                    genesis,
                    AuthoritySet::new(AuthoritySetId::new(0), genesis_authorities),
                );
                Self::persist(&mut kv_store.clone(), &tree)?;
                tree
            }
            Err(err) => return Err(err),
        };

        Ok(AuthorityManager {
            tree: RwLock::new(tree),
            kv_store: Mutex::new(kv_store),
            chain,
            event_publisher,
        })
    }

    fn load(kv_store: &K) -> Result<ScheduleTree, AuthorityManagerError> {
        kv_store
            .schedule_tree()?
            .ok_or(AuthorityManagerError::NoPersistentState)
    }

    fn persist(kv_store: &mut K, tree: &ScheduleTree) -> Result<(), AuthorityManagerError> {
        let bytes = ScheduleTreeBytes::from(tree).try_to_vec().map_err(|err| {
            KVSetError::SerializeValueError {
                key: Key::ScheduleTree,
                source: err,
            }
        })?;
        let mut wb = K::WriteBatch::new();
        wb.set(&SCHEDULE_TREE, &bytes);
        kv_store.write(wb)?;
        Ok(())
    }

    /// Get the authority set in effect at `block` (`Current`), or at `block`'s children (`Next`).
    ///
    /// A paused authority set is returned with every weight set to zero.
    pub fn authorities(
        &self,
        block: &BlockInfo,
        context: AuthorityContext,
    ) -> Result<Arc<AuthoritySet>, AuthorityManagerError> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        let node = tree
            .nearest_ancestor(&self.chain, block)
            .ok_or(AuthorityManagerError::UnknownBlock { block: *block })?;

        let horizon = match context {
            AuthorityContext::Current => block.number,
            AuthorityContext::Next => block.number + 1,
        };
        Ok(node.authorities_at(horizon))
    }

    /// Get the block at the root of the schedule tree: the last block passed to `on_finalize`, or genesis.
    pub fn root(&self) -> BlockInfo {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .root()
            .block()
    }

    /// Apply a consensus digest found in the header of `target_block`.
    ///
    /// Digests addressed to engines other than GRANDPA are ignored. A digest whose target block does not
    /// descend from the root of the schedule tree changes nothing and fails with `UnknownBlock`.
    ///
    /// Digests may arrive out of block order. Schedule nodes already created above `target_block` that are
    /// still governed by the same authority set take the change over, unless they carry a later change of
    /// the same kind themselves.
    pub fn on_consensus(
        &self,
        engine_id: EngineId,
        target_block: &BlockInfo,
        digest: &ConsensusDigest,
    ) -> Result<(), AuthorityManagerError> {
        if engine_id != GRANDPA_ENGINE_ID {
            return Ok(());
        }

        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let key = match tree.materialize(&self.chain, target_block) {
            Some(key) => key,
            None => {
                log::warn!(
                    "Ignoring {} digest on block {}, which does not descend from the last finalized block",
                    digest.name(),
                    target_block
                );
                return Err(AuthorityManagerError::UnknownBlock {
                    block: *target_block,
                });
            }
        };
        let node = tree
            .get_mut(&key)
            .expect("node was materialized above; qed");

        let set_id = node.actual_authorities.id();
        let next_set_id = set_id.next();
        match digest {
            ConsensusDigest::ScheduledChange { authorities, delay } => {
                if let Some(PendingChange::Forced { activation, .. }) = &node.set_change {
                    log::warn!(
                        "ConflictingChange: discarding scheduled change on block {}, a forced change activates at {}",
                        target_block,
                        activation
                    );
                    return Ok(());
                }
                node.set_change = Some(PendingChange::Scheduled {
                    activation: target_block.number + *delay,
                    authorities: Arc::new(AuthoritySet::new(next_set_id, authorities.clone())),
                });
                node.signals_set_change = true;
            }
            ConsensusDigest::ForcedChange { authorities, delay } => {
                if let Some(PendingChange::Scheduled { activation, .. }) = &node.set_change {
                    log::warn!(
                        "ConflictingChange: forced change on block {} discards the scheduled change activating at {}",
                        target_block,
                        activation
                    );
                }
                node.set_change = Some(PendingChange::Forced {
                    activation: target_block.number + *delay,
                    authorities: Arc::new(AuthoritySet::new(next_set_id, authorities.clone())),
                });
                node.signals_set_change = true;
            }
            ConsensusDigest::OnDisabled { authority_index } => {
                let disabled = usize::try_from(*authority_index)
                    .ok()
                    .and_then(|index| node.actual_authorities.with_disabled(index))
                    .ok_or(AuthorityManagerError::InvalidAuthorityIndex {
                        index: *authority_index,
                    })?;
                node.actual_authorities = Arc::new(disabled);
            }
            ConsensusDigest::Pause { delay } => {
                node.pause_change = Some(PendingChange::Pause {
                    activation: target_block.number + *delay,
                });
                node.signals_pause_change = true;
            }
            ConsensusDigest::Resume { delay } => {
                node.pause_change = Some(PendingChange::Resume {
                    activation: target_block.number + *delay,
                });
                node.signals_pause_change = true;
            }
        }
        let set_change = node.set_change.clone();
        let pause_change = node.pause_change.clone();
        node.adjust(target_block.number);

        // Nodes materialized above the target earlier inherited its state from before this digest.
        match digest {
            ConsensusDigest::ScheduledChange { .. } | ConsensusDigest::ForcedChange { .. } => {
                tree.propagate(&key, set_id, |descendant| {
                    if descendant.signals_set_change {
                        return false;
                    }
                    descendant.set_change = set_change.clone();
                    descendant.adjust(descendant.block.number);
                    true
                })
            }
            ConsensusDigest::OnDisabled { authority_index } => {
                // The index was checked against the same set above.
                let index = *authority_index as usize;
                tree.propagate(&key, set_id, |descendant| {
                    if let Some(disabled) = descendant.actual_authorities.with_disabled(index) {
                        descendant.actual_authorities = Arc::new(disabled);
                    }
                    true
                })
            }
            ConsensusDigest::Pause { .. } | ConsensusDigest::Resume { .. } => {
                tree.propagate(&key, set_id, |descendant| {
                    if descendant.signals_pause_change {
                        return false;
                    }
                    descendant.pause_change = pause_change.clone();
                    descendant.adjust(descendant.block.number);
                    true
                })
            }
        }

        Event::ScheduleChange(ScheduleChangeEvent {
            timestamp: SystemTime::now(),
            target_block: *target_block,
            digest: digest.clone(),
        })
        .publish(&self.event_publisher);
        Ok(())
    }

    /// Re-root the schedule tree at the newly finalized `block` and persist it.
    ///
    /// Finalizing the current root, or one of its ancestors, does nothing. The in-memory tree only changes
    /// once the new tree has been written to the `KVStore`.
    pub fn on_finalize(&self, block: &BlockInfo) -> Result<(), AuthorityManagerError> {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let root = tree.root().block();
        if self.chain.is_equal_or_descendant_of(&block.hash, &root.hash) {
            return Ok(());
        }

        let mut finalized = tree.clone();
        finalized
            .finalize(&self.chain, block)
            .ok_or(AuthorityManagerError::UnknownBlock { block: *block })?;
        Self::persist(
            &mut self.kv_store.lock().unwrap_or_else(PoisonError::into_inner),
            &finalized,
        )?;
        let set_id = finalized.root().actual_authorities.id();
        *tree = finalized;

        Event::FinalizeSchedule(FinalizeScheduleEvent {
            timestamp: SystemTime::now(),
            root: *block,
            set_id,
        })
        .publish(&self.event_publisher);
        Ok(())
    }
}

/// Errors that the [`AuthorityManager`] may return.
#[derive(Debug)]
pub enum AuthorityManagerError {
    /// The block does not descend from the root of the schedule tree, or the chain does not know it.
    UnknownBlock { block: BlockInfo },

    /// The persisted schedule tree could not be read.
    KVGetError(KVGetError),

    /// The schedule tree could not be serialized.
    KVSetError(KVSetError),

    /// The `KVStore` failed to apply the write batch containing the schedule tree.
    KVWriteError(KVWriteError),

    /// No schedule tree is persisted. Handled inside `prepare` by starting from genesis.
    NoPersistentState,

    /// An `OnDisabled` digest named an index outside the authority set.
    InvalidAuthorityIndex { index: u64 },
}

impl From<KVGetError> for AuthorityManagerError {
    fn from(value: KVGetError) -> Self {
        AuthorityManagerError::KVGetError(value)
    }
}

impl From<KVSetError> for AuthorityManagerError {
    fn from(value: KVSetError) -> Self {
        AuthorityManagerError::KVSetError(value)
    }
}

impl From<KVWriteError> for AuthorityManagerError {
    fn from(value: KVWriteError) -> Self {
        AuthorityManagerError::KVWriteError(value)
    }
}
