/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An ancestry-aware accumulator of vote weight.
//!
//! A [`VoteGraph`] is rooted at a base block and answers questions of the form "what is the highest
//! block whose subtree carries enough vote weight". A vote for a block counts towards that block and
//! every one of its ancestors down to the base.
//!
//! ## Compression
//!
//! Only some blocks get an entry ("node") in the graph: the base, the blocks that were voted for, and the
//! branch points between votes that the graph had to introduce to keep weights correct. Each node
//! remembers the hashes of the blocks between itself and the nearest node below it, so that any block
//! on a path between nodes can still be located and weighed without asking the [`Chain`] again.
//!
//! ## Tie-breaking
//!
//! When more than one block at the same step of a [ghost](VoteGraph::find_ghost) descent satisfies the
//! condition, the one with the greater cumulative weight wins, then the one with the higher number, then
//! the one whose hash bytes are lower.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::{
    chain::{Chain, ChainError},
    types::data_types::{BlockHash, BlockInfo, BlockNumber, Weight},
};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    number: BlockNumber,
    // Ancestor hashes in reverse order: `ancestors[0]` is the parent, and the last element is the hash of
    // the nearest ancestor node.
    ancestors: Vec<BlockHash>,
    descendants: Vec<BlockHash>,
    cumulative_weight: Weight,
}

impl Entry {
    fn new(number: BlockNumber, ancestors: Vec<BlockHash>) -> Entry {
        Entry {
            number,
            ancestors,
            descendants: Vec::new(),
            cumulative_weight: Weight::zero(),
        }
    }

    /// Whether the block (`hash`, `number`) lies between this node and its ancestor node. `None` if
    /// `number` is outside that range.
    fn in_direct_ancestry(&self, hash: &BlockHash, number: BlockNumber) -> Option<bool> {
        self.ancestor_block(number).map(|h| h == hash)
    }

    /// Get the hash of the ancestor at `number`, if it lies between this node and its ancestor node.
    fn ancestor_block(&self, number: BlockNumber) -> Option<&BlockHash> {
        if number >= self.number {
            return None;
        }
        let offset = (self.number - number - 1) as usize;
        self.ancestors.get(offset)
    }

    fn ancestor_node(&self) -> Option<BlockHash> {
        self.ancestors.last().copied()
    }
}

pub struct VoteGraph {
    entries: HashMap<BlockHash, Entry>,
    heads: BTreeSet<BlockHash>,
    base: BlockInfo,
}

impl VoteGraph {
    /// Create a graph with only the `base` node and no weight.
    pub fn new(base: BlockInfo) -> VoteGraph {
        let mut entries = HashMap::new();
        entries.insert(base.hash, Entry::new(base.number, Vec::new()));
        let mut heads = BTreeSet::new();
        heads.insert(base.hash);

        VoteGraph {
            entries,
            heads,
            base,
        }
    }

    pub fn base(&self) -> BlockInfo {
        self.base
    }

    /// Add `weight` to `block` and every one of its ancestors down to the base.
    ///
    /// # Errors
    ///
    /// - [`VoteGraphError::InvalidVote`] if `block` is neither the base nor one of its descendants.
    /// - [`VoteGraphError::AncestryUnknown`] if `chain` cannot tell how `block` connects to the base.
    ///
    /// The graph is unchanged when an error is returned.
    pub fn insert<C: Chain>(
        &mut self,
        block: BlockInfo,
        weight: Weight,
        chain: &C,
    ) -> Result<(), VoteGraphError> {
        if block.number < self.base.number
            || (block.number == self.base.number && block.hash != self.base.hash)
        {
            return Err(VoteGraphError::InvalidVote { block });
        }

        match self.find_containing_nodes(&block) {
            Some(containing) if containing.is_empty() => self.append(block, chain)?,
            Some(containing) => self.introduce_branch(containing, block),
            None => {}
        }

        // Update the cumulative weight of the node and all of its ancestor nodes.
        let mut inspecting = block.hash;
        loop {
            let entry = self
                .entries
                .get_mut(&inspecting)
                .expect("vote-node and its ancestry always exist after insertion; qed");
            entry.cumulative_weight += weight;
            match entry.ancestor_node() {
                Some(parent) => inspecting = parent,
                None => break,
            }
        }

        Ok(())
    }

    /// Find the highest block reachable from `current_best` (or from the base) such that `condition` holds
    /// for the combined weight of the votes on it and on its descendants.
    ///
    /// If `current_best` is given and lies in the graph, only `current_best`, its ancestors, and its
    /// descendants are considered. Returns `None` if the starting point itself fails `condition`.
    pub fn find_ghost(
        &self,
        current_best: Option<BlockInfo>,
        condition: impl Fn(Weight) -> bool,
    ) -> Option<BlockInfo> {
        let (mut node_key, mut force_constrain) = current_best
            .and_then(|best| match self.find_containing_nodes(&best) {
                None => Some((best.hash, false)),
                Some(containing) if !containing.is_empty() => {
                    let ancestor = self
                        .entries
                        .get(&containing[0])
                        .expect("containing nodes are present in entries; qed")
                        .ancestor_node()
                        .expect("node containing non-node in history always has ancestor; qed");
                    Some((ancestor, true))
                }
                Some(_) => None,
            })
            .unwrap_or((self.base.hash, false));

        let mut active_node = self
            .entries
            .get(&node_key)
            .expect("node_key is the base or a node by construction; qed");

        if !condition(active_node.cumulative_weight) {
            return None;
        }

        // Descend through the nodes that satisfy the condition.
        loop {
            let next_descendant = active_node
                .descendants
                .iter()
                .map(|d| {
                    (
                        *d,
                        self.entries
                            .get(d)
                            .expect("descendants always present in entries; qed"),
                    )
                })
                .filter(|(_, node)| match (force_constrain, current_best) {
                    // Take only descendants with `current_best` in their ancestry.
                    (true, Some(best)) => node
                        .in_direct_ancestry(&best.hash, best.number)
                        .unwrap_or(false),
                    _ => true,
                })
                .filter(|(_, node)| condition(node.cumulative_weight))
                .max_by(|(a_hash, a), (b_hash, b)| {
                    a.cumulative_weight
                        .cmp(&b.cumulative_weight)
                        .then(a.number.cmp(&b.number))
                        .then(b_hash.cmp(a_hash))
                });

            match next_descendant {
                Some((key, node)) => {
                    // Once we have made one hop, the ancestry no longer has to be constrained.
                    force_constrain = false;
                    node_key = key;
                    active_node = node;
                }
                None => break,
            }
        }

        let constraint = if force_constrain { current_best } else { None };
        Some(self.ghost_find_merge_point(node_key, active_node, constraint, &condition))
    }

    /// Walk upwards block by block from `active_node`, summing the weight of its descendant nodes on each
    /// block, and return the highest block whose sum still satisfies `condition`.
    fn ghost_find_merge_point(
        &self,
        node_key: BlockHash,
        active_node: &Entry,
        constraint: Option<BlockInfo>,
        condition: &impl Fn(Weight) -> bool,
    ) -> BlockInfo {
        let mut descendant_nodes: Vec<&Entry> = active_node
            .descendants
            .iter()
            .map(|h| {
                self.entries
                    .get(h)
                    .expect("descendants always present in entries; qed")
            })
            .filter(|node| match constraint {
                Some(best) => node
                    .in_direct_ancestry(&best.hash, best.number)
                    .unwrap_or(false),
                None => true,
            })
            .collect();

        let mut best = BlockInfo::new(active_node.number, node_key);
        loop {
            let number = best.number + 1;

            let mut blocks: BTreeMap<BlockHash, Weight> = BTreeMap::new();
            for node in &descendant_nodes {
                if let Some(hash) = node.ancestor_block(number) {
                    *blocks.entry(*hash).or_default() += node.cumulative_weight;
                }
            }

            let new_best = blocks
                .into_iter()
                .filter(|(_, weight)| condition(*weight))
                .max_by(|(a_hash, a), (b_hash, b)| a.cmp(b).then(b_hash.cmp(a_hash)));

            match new_best {
                Some((hash, _)) => {
                    best = BlockInfo::new(number, hash);
                    descendant_nodes
                        .retain(|node| node.in_direct_ancestry(&hash, number).unwrap_or(false));
                }
                None => break,
            }
        }

        best
    }

    /// Find the highest ancestor-or-equal of `block` such that `condition` holds for the weight
    /// accumulated on it, and return it along with that weight.
    ///
    /// `block` does not have to be in the graph: if it is not, the search starts from its highest
    /// ancestor that is, found through `chain`. Returns `None` if no block down to the base satisfies
    /// `condition`, or if `block` does not descend from the base.
    pub fn find_ancestor<C: Chain>(
        &self,
        block: BlockInfo,
        condition: impl Fn(Weight) -> bool,
        chain: &C,
    ) -> Option<(BlockInfo, Weight)> {
        let mut current = self.locate(block, chain)?;
        loop {
            match self.find_containing_nodes(&current) {
                None => {
                    // The block has a node in the graph.
                    let node = self
                        .entries
                        .get(&current.hash)
                        .expect("by definition of find_containing_nodes; qed");
                    if condition(node.cumulative_weight) {
                        return Some((current, node.cumulative_weight));
                    }
                    let parent = node.ancestors.first()?;
                    current = BlockInfo::new(current.number.parent()?, *parent);
                }
                Some(children) => {
                    // The block lies in the ancestry of at least one node but is not a node itself.
                    if children.is_empty() {
                        return None;
                    }
                    let weight: Weight = children
                        .iter()
                        .map(|child| {
                            self.entries
                                .get(child)
                                .expect("all children in graph; qed")
                                .cumulative_weight
                        })
                        .sum();
                    if condition(weight) {
                        return Some((current, weight));
                    }
                    let child = self
                        .entries
                        .get(&children[0])
                        .expect("all children in graph; qed");
                    let offset = (child.number - current.number) as usize;
                    let parent = child.ancestors.get(offset)?;
                    current = BlockInfo::new(current.number.parent()?, *parent);
                }
            }
        }
    }

    /// Move the base of the graph down to one of its ancestors.
    ///
    /// `ancestry_proof` lists the hashes from the parent of the current base down to the new base, parent
    /// first. Proofs longer than the current base number are ignored.
    pub fn adjust_base(&mut self, ancestry_proof: &[BlockHash]) {
        let new_hash = match ancestry_proof.last() {
            Some(hash) => *hash,
            None => return,
        };
        if ancestry_proof.len() as u64 > self.base.number.int() {
            return;
        }
        let new_number = BlockNumber::new(self.base.number.int() - ancestry_proof.len() as u64);

        let old_base = self
            .entries
            .get_mut(&self.base.hash)
            .expect("base hash entry always exists; qed");
        old_base.ancestors.extend_from_slice(ancestry_proof);
        let new_entry = Entry {
            number: new_number,
            ancestors: Vec::new(),
            descendants: vec![self.base.hash],
            cumulative_weight: old_base.cumulative_weight,
        };

        self.entries.insert(new_hash, new_entry);
        self.base = BlockInfo::new(new_number, new_hash);
    }

    /// Find the nodes that have `block` between themselves and their ancestor node.
    ///
    /// Returns `None` if `block` is itself a node, and an empty vector if it lies on no path between nodes.
    fn find_containing_nodes(&self, block: &BlockInfo) -> Option<Vec<BlockHash>> {
        if self.entries.contains_key(&block.hash) {
            return None;
        }

        let mut containing_keys = Vec::new();
        let mut visited = HashSet::new();

        // Iterate vote-heads and their ancestry backwards until we find the one with `block` in that chain.
        for head in self.heads.iter() {
            let mut inspecting = *head;
            while let Some(entry) = self.entries.get(&inspecting) {
                // Nodes shared between heads only have to be checked once.
                if !visited.insert(inspecting) {
                    break;
                }
                match entry.in_direct_ancestry(&block.hash, block.number) {
                    Some(true) => {
                        containing_keys.push(inspecting);
                        break;
                    }
                    Some(false) => break,
                    None => match entry.ancestor_node() {
                        Some(prev) => inspecting = prev,
                        None => break,
                    },
                }
            }
        }

        Some(containing_keys)
    }

    /// Append a node for `block`, which lies in no node's ancestry, below the nearest existing node in its
    /// ancestry.
    fn append<C: Chain>(&mut self, block: BlockInfo, chain: &C) -> Result<(), VoteGraphError> {
        let mut ancestry = chain
            .ancestry(&self.base.hash, &block.hash)
            .map_err(|err| match err {
                ChainError::NotDescendant { .. } => VoteGraphError::InvalidVote { block },
                ChainError::UnknownBlock { .. } => VoteGraphError::AncestryUnknown { block },
            })?;

        // The chain lists ancestors lowest first, entries keep them parent first.
        ancestry.reverse();
        ancestry.push(self.base.hash);
        if ancestry.len() as u64 != block.number - self.base.number {
            return Err(VoteGraphError::AncestryUnknown { block });
        }

        let ancestor_index = ancestry
            .iter()
            .position(|hash| self.entries.contains_key(hash))
            .expect("base is kept in entries and is the last element of ancestry; qed");
        let ancestor_hash = ancestry[ancestor_index];
        ancestry.truncate(ancestor_index + 1);

        self.entries
            .get_mut(&ancestor_hash)
            .expect("found in entries above; qed")
            .descendants
            .push(block.hash);
        self.entries
            .insert(block.hash, Entry::new(block.number, ancestry));
        self.heads.remove(&ancestor_hash);
        self.heads.insert(block.hash);

        Ok(())
    }

    /// Introduce a node for `ancestor`, which lies between each of `descendants` and their ancestor node.
    fn introduce_branch(&mut self, descendants: Vec<BlockHash>, ancestor: BlockInfo) {
        let mut produced: Option<(Entry, Option<BlockHash>)> = None;

        for descendant in descendants {
            let entry = self
                .entries
                .get_mut(&descendant)
                .expect("containing nodes are present in entries; qed");
            debug_assert_eq!(
                entry.in_direct_ancestry(&ancestor.hash, ancestor.number),
                Some(true)
            );

            // The descendant keeps its ancestors up to and including `ancestor`.
            let offset = (entry.number - ancestor.number) as usize;
            let new_ancestors: Vec<BlockHash> = entry.ancestors.drain(offset..).collect();

            let (new_entry, _) = produced.get_or_insert_with(|| {
                let prev_ancestor = new_ancestors.last().copied();
                (Entry::new(ancestor.number, new_ancestors), prev_ancestor)
            });
            new_entry.descendants.push(descendant);
            new_entry.cumulative_weight += entry.cumulative_weight;
        }

        if let Some((new_entry, prev_ancestor)) = produced {
            if let Some(prev_ancestor) = prev_ancestor {
                let prev_node = self
                    .entries
                    .get_mut(&prev_ancestor)
                    .expect("ancestor node of a node is always present; qed");
                prev_node
                    .descendants
                    .retain(|hash| !new_entry.descendants.contains(hash));
                prev_node.descendants.push(ancestor.hash);
            }
            self.entries.insert(ancestor.hash, new_entry);
        }
    }

    /// Resolve `block` to itself if the graph knows it, or else to its highest ancestor that the graph knows.
    fn locate<C: Chain>(&self, block: BlockInfo, chain: &C) -> Option<BlockInfo> {
        if block.number < self.base.number {
            return None;
        }
        if self.knows(&block) {
            return Some(block);
        }
        if block.number == self.base.number {
            return None;
        }

        let ancestry = chain.ancestry(&self.base.hash, &block.hash).ok()?;
        let highest_first = ancestry.iter().rev().enumerate();
        for (i, hash) in highest_first {
            let ancestor = BlockInfo::new(BlockNumber::new(block.number.int() - 1 - i as u64), *hash);
            if self.knows(&ancestor) {
                return Some(ancestor);
            }
        }
        Some(self.base)
    }

    fn knows(&self, block: &BlockInfo) -> bool {
        match self.find_containing_nodes(block) {
            None => true,
            Some(containing) => !containing.is_empty(),
        }
    }
}

/// Reasons a vote could not be placed in a [`VoteGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteGraphError {
    /// The voted block is neither the base nor a descendant of the base.
    InvalidVote { block: BlockInfo },

    /// The chain could not tell how the voted block connects to the base.
    AncestryUnknown { block: BlockInfo },
}
