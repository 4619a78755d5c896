/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fork-aware tree of authority-set states kept by the [`AuthorityManager`](super::AuthorityManager).
//!
//! ## Shape
//!
//! A [`ScheduleTree`] mirrors the part of the block tree above the last finalized block in which the
//! authority set can differ. Each [`ScheduleNode`] is anchored to one block and records:
//! 1. The authority set in effect at that block (`actual_authorities`), and whether it is paused.
//! 2. The changes pending at that block: at most one set change (scheduled or forced), and at most one
//!    pause or resume. Changes pending at a node are inherited by every node created above it until their
//!    activation point is reached.
//!
//! The authority set in effect at any block `B` is computed from the nearest node at or below `B` by
//! applying the pending changes whose activation point is at most `B`'s number.
//!
//! ## Storage
//!
//! Nodes are kept in an arena keyed by the hash of their block. Parent and child links are hashes, not
//! references, so pruning a branch is simply removing its keys.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    chain::Chain,
    types::{
        authority_set::AuthoritySet,
        data_types::{AuthoritySetId, BlockHash, BlockInfo, BlockNumber},
    },
};

/// A change that was observed in a block and has not taken effect yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingChange {
    Scheduled {
        activation: BlockNumber,
        authorities: Arc<AuthoritySet>,
    },
    Forced {
        activation: BlockNumber,
        authorities: Arc<AuthoritySet>,
    },
    Pause {
        activation: BlockNumber,
    },
    Resume {
        activation: BlockNumber,
    },
}

impl PendingChange {
    pub fn activation(&self) -> BlockNumber {
        match self {
            PendingChange::Scheduled { activation, .. }
            | PendingChange::Forced { activation, .. }
            | PendingChange::Pause { activation }
            | PendingChange::Resume { activation } => *activation,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScheduleNode {
    pub(crate) block: BlockInfo,
    pub(crate) parent: Option<BlockHash>,
    pub(crate) children: Vec<BlockHash>,
    pub(crate) actual_authorities: Arc<AuthoritySet>,
    pub(crate) enabled: bool,
    // `Scheduled` or `Forced`.
    pub(crate) set_change: Option<PendingChange>,
    // `Pause` or `Resume`.
    pub(crate) pause_change: Option<PendingChange>,
    // Whether the block of this node itself carried a set change or a pause/resume digest.
    pub(crate) signals_set_change: bool,
    pub(crate) signals_pause_change: bool,
}

impl ScheduleNode {
    fn root(block: BlockInfo, authorities: Arc<AuthoritySet>) -> ScheduleNode {
        ScheduleNode {
            block,
            parent: None,
            children: Vec::new(),
            actual_authorities: authorities,
            enabled: true,
            set_change: None,
            pause_change: None,
            signals_set_change: false,
            signals_pause_change: false,
        }
    }

    pub fn block(&self) -> BlockInfo {
        self.block
    }

    pub fn set_change(&self) -> Option<&PendingChange> {
        self.set_change.as_ref()
    }

    pub fn pause_change(&self) -> Option<&PendingChange> {
        self.pause_change.as_ref()
    }

    /// Create the node for `block`, a descendant of this node's block, carrying this node's state forward
    /// to `block`'s number.
    fn descendant(&self, block: BlockInfo) -> ScheduleNode {
        let mut node = ScheduleNode {
            block,
            parent: Some(self.block.hash),
            children: Vec::new(),
            actual_authorities: self.actual_authorities.clone(),
            enabled: self.enabled,
            set_change: self.set_change.clone(),
            pause_change: self.pause_change.clone(),
            signals_set_change: false,
            signals_pause_change: false,
        };
        node.adjust(block.number);
        node
    }

    /// Enact the pending changes whose activation point is at most `horizon`.
    pub(crate) fn adjust(&mut self, horizon: BlockNumber) {
        if let Some(change) = self.set_change.take() {
            match change {
                PendingChange::Scheduled { activation, authorities }
                | PendingChange::Forced { activation, authorities }
                    if activation <= horizon =>
                {
                    self.actual_authorities = authorities
                }
                change => self.set_change = Some(change),
            }
        }

        if let Some(change) = self.pause_change.take() {
            match change {
                PendingChange::Pause { activation } if activation <= horizon => self.enabled = false,
                PendingChange::Resume { activation } if activation <= horizon => self.enabled = true,
                change => self.pause_change = Some(change),
            }
        }
    }

    /// Get the authority set in effect at a block above this node whose number is `horizon`, without
    /// changing the node.
    pub(crate) fn authorities_at(&self, horizon: BlockNumber) -> Arc<AuthoritySet> {
        let actual = match &self.set_change {
            Some(PendingChange::Scheduled { activation, authorities })
            | Some(PendingChange::Forced { activation, authorities })
                if *activation <= horizon =>
            {
                authorities.clone()
            }
            _ => self.actual_authorities.clone(),
        };
        let enabled = match &self.pause_change {
            Some(PendingChange::Pause { activation }) if *activation <= horizon => false,
            Some(PendingChange::Resume { activation }) if *activation <= horizon => true,
            _ => self.enabled,
        };

        if enabled {
            actual
        } else {
            Arc::new(actual.zeroed())
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScheduleTree {
    root: BlockHash,
    nodes: HashMap<BlockHash, ScheduleNode>,
}

impl ScheduleTree {
    /// Create a tree with a single root node at `block`, at which `authorities` are in effect.
    pub fn new(block: BlockInfo, authorities: AuthoritySet) -> ScheduleTree {
        let mut nodes = HashMap::new();
        nodes.insert(block.hash, ScheduleNode::root(block, Arc::new(authorities)));
        ScheduleTree {
            root: block.hash,
            nodes,
        }
    }

    pub fn root(&self) -> &ScheduleNode {
        self.nodes
            .get(&self.root)
            .expect("the root is never pruned; qed")
    }

    pub fn get(&self, block: &BlockHash) -> Option<&ScheduleNode> {
        self.nodes.get(block)
    }

    pub(crate) fn get_mut(&mut self, block: &BlockHash) -> Option<&mut ScheduleNode> {
        self.nodes.get_mut(block)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the node with the highest block that is `block` or one of its ancestors. `None` if `block`
    /// does not descend from the root.
    pub fn nearest_ancestor<C: Chain>(&self, chain: &C, block: &BlockInfo) -> Option<&ScheduleNode> {
        let mut current = self.root();
        if !chain.is_equal_or_descendant_of(&current.block.hash, &block.hash) {
            return None;
        }

        // Children of a node lie on pairwise different branches, so at most one of them leads to `block`.
        while let Some(next) = current
            .children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .find(|child| {
                child.block.number <= block.number
                    && chain.is_equal_or_descendant_of(&child.block.hash, &block.hash)
            })
        {
            current = next;
        }

        Some(current)
    }

    /// Make sure that a node exists for `block` and return its key. `None` if `block` does not descend
    /// from the root.
    ///
    /// Existing nodes above `block` on its branch are moved below the new node.
    pub(crate) fn materialize<C: Chain>(&mut self, chain: &C, block: &BlockInfo) -> Option<BlockHash> {
        let nearest = self.nearest_ancestor(chain, block)?;
        if nearest.block.hash == block.hash {
            return Some(block.hash);
        }

        let mut node = nearest.descendant(*block);
        let parent_key = nearest.block.hash;
        let (adopted, kept): (Vec<BlockHash>, Vec<BlockHash>) =
            nearest.children.iter().copied().partition(|child| {
                chain.is_equal_or_descendant_of(&block.hash, child)
            });
        node.children = adopted.clone();

        for child in adopted {
            if let Some(child) = self.nodes.get_mut(&child) {
                child.parent = Some(block.hash);
            }
        }
        let parent = self
            .nodes
            .get_mut(&parent_key)
            .expect("nearest ancestor was found in the arena; qed");
        parent.children = kept;
        parent.children.push(block.hash);
        self.nodes.insert(block.hash, node);

        Some(block.hash)
    }

    /// Carry a change just made to the node of `from` into the nodes above it that were materialized
    /// before the change was known.
    ///
    /// `apply` is called on each such node that is still in effect under the set `set_id`, nearest nodes
    /// first. The walk stops along a branch at a node that a later set took over, or for which `apply`
    /// returns `false`.
    pub(crate) fn propagate(
        &mut self,
        from: &BlockHash,
        set_id: AuthoritySetId,
        mut apply: impl FnMut(&mut ScheduleNode) -> bool,
    ) {
        let mut stack = match self.nodes.get(from) {
            Some(node) => node.children.clone(),
            None => return,
        };
        while let Some(key) = stack.pop() {
            let node = match self.nodes.get_mut(&key) {
                Some(node) => node,
                None => continue,
            };
            if node.actual_authorities.id() != set_id || !apply(node) {
                continue;
            }
            stack.extend(node.children.iter().copied());
        }
    }

    /// Make `block` the root of the tree, dropping every node that is not `block` or one of its
    /// descendants. `None` if `block` does not descend from the current root.
    pub(crate) fn finalize<C: Chain>(&mut self, chain: &C, block: &BlockInfo) -> Option<()> {
        let new_root = self.materialize(chain, block)?;

        let mut reachable = HashSet::new();
        let mut stack = vec![new_root];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.get(&key) {
                stack.extend(node.children.iter().copied());
                reachable.insert(key);
            }
        }
        self.nodes.retain(|key, _| reachable.contains(key));

        if let Some(root) = self.nodes.get_mut(&new_root) {
            root.parent = None;
        }
        self.root = new_root;
        Some(())
    }
}

/// Intermediate representation of [`ScheduleTree`] for safe serialization and deserialization.
///
/// To serialize a `ScheduleTree`, convert it into a `ScheduleTreeBytes` using this type's implementation
/// of `From`, then serialize the `ScheduleTreeBytes` using Borsh. Reverse the steps to deserialize.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct ScheduleTreeBytes {
    root: BlockHash,
    // Ordered by block number, then hash.
    nodes: Vec<ScheduleNodeBytes>,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
struct ScheduleNodeBytes {
    block: BlockInfo,
    parent: Option<BlockHash>,
    children: Vec<BlockHash>,
    actual_authorities: AuthoritySet,
    enabled: bool,
    set_change: Option<PendingChangeBytes>,
    pause_change: Option<PendingChangeBytes>,
    signals_set_change: bool,
    signals_pause_change: bool,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
enum PendingChangeBytes {
    Scheduled {
        activation: BlockNumber,
        authorities: AuthoritySet,
    },
    Forced {
        activation: BlockNumber,
        authorities: AuthoritySet,
    },
    Pause {
        activation: BlockNumber,
    },
    Resume {
        activation: BlockNumber,
    },
}

impl From<&PendingChange> for PendingChangeBytes {
    fn from(change: &PendingChange) -> Self {
        match change {
            PendingChange::Scheduled { activation, authorities } => PendingChangeBytes::Scheduled {
                activation: *activation,
                authorities: (**authorities).clone(),
            },
            PendingChange::Forced { activation, authorities } => PendingChangeBytes::Forced {
                activation: *activation,
                authorities: (**authorities).clone(),
            },
            PendingChange::Pause { activation } => PendingChangeBytes::Pause {
                activation: *activation,
            },
            PendingChange::Resume { activation } => PendingChangeBytes::Resume {
                activation: *activation,
            },
        }
    }
}

impl From<PendingChangeBytes> for PendingChange {
    fn from(change: PendingChangeBytes) -> Self {
        match change {
            PendingChangeBytes::Scheduled { activation, authorities } => PendingChange::Scheduled {
                activation,
                authorities: Arc::new(authorities),
            },
            PendingChangeBytes::Forced { activation, authorities } => PendingChange::Forced {
                activation,
                authorities: Arc::new(authorities),
            },
            PendingChangeBytes::Pause { activation } => PendingChange::Pause { activation },
            PendingChangeBytes::Resume { activation } => PendingChange::Resume { activation },
        }
    }
}

impl From<&ScheduleTree> for ScheduleTreeBytes {
    fn from(tree: &ScheduleTree) -> Self {
        let mut nodes: Vec<ScheduleNodeBytes> = tree
            .nodes
            .values()
            .map(|node| ScheduleNodeBytes {
                block: node.block,
                parent: node.parent,
                children: node.children.clone(),
                actual_authorities: (*node.actual_authorities).clone(),
                enabled: node.enabled,
                set_change: node.set_change.as_ref().map(PendingChangeBytes::from),
                pause_change: node.pause_change.as_ref().map(PendingChangeBytes::from),
                signals_set_change: node.signals_set_change,
                signals_pause_change: node.signals_pause_change,
            })
            .collect();
        nodes.sort_by_key(|node| (node.block.number, node.block.hash));

        ScheduleTreeBytes {
            root: tree.root,
            nodes,
        }
    }
}

/// The bytes do not describe a tree: the root or a linked node is missing.
#[derive(Debug)]
pub struct MalformedScheduleTree;

impl TryFrom<ScheduleTreeBytes> for ScheduleTree {
    type Error = MalformedScheduleTree;

    fn try_from(value: ScheduleTreeBytes) -> Result<Self, Self::Error> {
        let nodes: HashMap<BlockHash, ScheduleNode> = value
            .nodes
            .into_iter()
            .map(|node| {
                (
                    node.block.hash,
                    ScheduleNode {
                        block: node.block,
                        parent: node.parent,
                        children: node.children,
                        actual_authorities: Arc::new(node.actual_authorities),
                        enabled: node.enabled,
                        set_change: node.set_change.map(PendingChange::from),
                        pause_change: node.pause_change.map(PendingChange::from),
                        signals_set_change: node.signals_set_change,
                        signals_pause_change: node.signals_pause_change,
                    },
                )
            })
            .collect();

        let links_resolve = nodes.values().all(|node| {
            node.children.iter().all(|child| nodes.contains_key(child))
                && node.parent.map_or(true, |parent| nodes.contains_key(&parent))
        });
        if !nodes.contains_key(&value.root) || !links_resolve {
            return Err(MalformedScheduleTree);
        }

        Ok(ScheduleTree {
            root: value.root,
            nodes,
        })
    }
}
