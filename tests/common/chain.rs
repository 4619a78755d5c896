//! An in-memory block tree implementing [`Chain`], with blocks identified by name.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use grandpa_rs::{
    chain::{Chain, ChainError},
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{BlockHash, BlockInfo, BlockNumber},
    },
};

pub(crate) const GENESIS: &str = "GEN";

/// A block tree that can grow while it is shared. Clones share the same tree.
#[derive(Clone)]
pub(crate) struct MockChain(Arc<RwLock<Tree>>);

struct Tree {
    // Block hash -> (block number, parent hash).
    blocks: HashMap<BlockHash, (BlockNumber, Option<BlockHash>)>,
    best: Option<BlockHash>,
}

impl MockChain {
    /// Create a chain that contains only the genesis block.
    pub(crate) fn new() -> MockChain {
        let mut blocks = HashMap::new();
        blocks.insert(hash(GENESIS), (BlockNumber::new(0), None));
        MockChain(Arc::new(RwLock::new(Tree { blocks, best: None })))
    }

    /// Create the chain used across the voting tests:
    ///
    /// ```text
    /// GEN - A - B - C - D - E - F - FA - FB - FC
    ///                        \
    ///                         EA - EB - EC - ED
    /// ```
    pub(crate) fn fixture() -> MockChain {
        let chain = MockChain::new();
        chain.push(GENESIS, &["A", "B", "C", "D", "E", "F", "FA", "FB", "FC"]);
        chain.push("E", &["EA", "EB", "EC", "ED"]);
        chain
    }

    /// Append the blocks named `names`, in order, on top of `parent`.
    pub(crate) fn push(&self, parent: &str, names: &[&str]) {
        let mut tree = self.0.write().unwrap();
        let mut parent = hash(parent);
        for name in names {
            let number = tree.blocks[&parent].0.int() + 1;
            tree.blocks
                .insert(hash(name), (BlockNumber::new(number), Some(parent)));
            parent = hash(name);
        }
    }

    /// Make `name` the block that wins ties in `best_chain_containing`.
    pub(crate) fn set_best(&self, name: &str) {
        self.0.write().unwrap().best = Some(hash(name));
    }

    pub(crate) fn block(&self, name: &str) -> BlockInfo {
        let hash = hash(name);
        let number = self.0.read().unwrap().blocks[&hash].0;
        BlockInfo::new(number, hash)
    }
}

impl Tree {
    fn parent(&self, block: &BlockHash) -> Option<BlockHash> {
        self.blocks.get(block).and_then(|(_, parent)| *parent)
    }

    fn is_equal_or_descendant_of(&self, base: &BlockHash, block: &BlockHash) -> bool {
        if !self.blocks.contains_key(block) {
            return false;
        }
        let mut current = Some(*block);
        while let Some(hash) = current {
            if hash == *base {
                return true;
            }
            current = self.parent(&hash);
        }
        false
    }
}

impl Chain for MockChain {
    fn is_equal_or_descendant_of(&self, base: &BlockHash, block: &BlockHash) -> bool {
        self.0.read().unwrap().is_equal_or_descendant_of(base, block)
    }

    fn ancestry(&self, base: &BlockHash, block: &BlockHash) -> Result<Vec<BlockHash>, ChainError> {
        let tree = self.0.read().unwrap();
        if !tree.blocks.contains_key(block) {
            return Err(ChainError::UnknownBlock { block: *block });
        }

        let mut ancestry = Vec::new();
        let mut current = tree.parent(block);
        while let Some(hash) = current {
            if hash == *base {
                ancestry.reverse();
                return Ok(ancestry);
            }
            ancestry.push(hash);
            current = tree.parent(&hash);
        }
        Err(ChainError::NotDescendant {
            base: *base,
            block: *block,
        })
    }

    // The highest block descending from `base`. Ties go to the best block if it is one of them, then to
    // the smallest hash.
    fn best_chain_containing(&self, base: &BlockHash) -> Result<BlockInfo, ChainError> {
        let tree = self.0.read().unwrap();
        if !tree.blocks.contains_key(base) {
            return Err(ChainError::UnknownBlock { block: *base });
        }

        let head = tree
            .blocks
            .iter()
            .filter(|(hash, _)| tree.is_equal_or_descendant_of(base, hash))
            .map(|(hash, (number, _))| BlockInfo::new(*number, *hash))
            .max_by(|a, b| {
                a.number
                    .cmp(&b.number)
                    .then_with(|| (Some(a.hash) == tree.best).cmp(&(Some(b.hash) == tree.best)))
                    .then_with(|| b.hash.cmp(&a.hash))
            })
            .expect("base itself descends from base");
        Ok(head)
    }
}

/// The hash of the block named `name`: the SHA256 hash of the name.
pub(crate) fn hash(name: &str) -> BlockHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(name.as_bytes());
    BlockHash::new(hasher.finalize().into())
}
