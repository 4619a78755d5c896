/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types used across the crate.
//!
//! These types are sent around and inspected, but have no active behavior. They follow the newtype
//! pattern, and the API for using them is defined in this module.

use std::{
    fmt::{self, Debug, Display, Formatter},
    iter::Sum,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::VerifyingKey;

/// Number (height) of a block in the blockchain.
///
/// Block numbers alone do not order blocks across forks. Whether one block is an ancestor of another
/// must always be asked of the [`Chain`](crate::chain::Chain).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct BlockNumber(u64);

impl BlockNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The block number directly below this one, or `None` at genesis.
    pub fn parent(&self) -> Option<BlockNumber> {
        self.0.checked_sub(1).map(BlockNumber)
    }
}

impl Display for BlockNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockNumber {
    type Output = BlockNumber;
    fn add(self, rhs: u64) -> Self::Output {
        BlockNumber::new(self.0.saturating_add(rhs))
    }
}

impl Sub<BlockNumber> for BlockNumber {
    type Output = u64;
    fn sub(self, rhs: BlockNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

/// The hash of a block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A block identified by both its number and its hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct BlockInfo {
    pub number: BlockNumber,
    pub hash: BlockHash,
}

impl BlockInfo {
    pub const fn new(number: BlockNumber, hash: BlockHash) -> Self {
        Self { number, hash }
    }
}

impl Display for BlockInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({:?})", self.number, self.hash)
    }
}

/// Number of a voting round. Rounds are numbered from 1 within each authority set; round 0 is the
/// implicit round that "finalized" the authority set's starting block.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct RoundNumber(u64);

impl RoundNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for RoundNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for RoundNumber {
    type Output = RoundNumber;
    fn add(self, rhs: u64) -> Self::Output {
        RoundNumber::new(self.0 + rhs)
    }
}

/// Identifier of an [authority set](super::authority_set::AuthoritySet). Increases by one every time a
/// scheduled or forced change is enacted.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct AuthoritySetId(u64);

impl AuthoritySetId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for AuthoritySetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Voting weight of an authority, or the sum of the weights of several authorities.
///
/// ## Limits to total weight
///
/// The sum of the weights of all authorities in an authority set must not exceed `u64::MAX`. Additions
/// saturate instead of overflowing.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Weight(u64);

impl Weight {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Display for Weight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add for Weight {
    type Output = Weight;
    fn add(self, rhs: Weight) -> Self::Output {
        Weight(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Weight {
    fn add_assign(&mut self, rhs: Weight) {
        self.0 = self.0.saturating_add(rhs.0)
    }
}

impl Sub for Weight {
    type Output = Weight;
    fn sub(self, rhs: Weight) -> Self::Output {
        Weight(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Weight {
    fn sub_assign(&mut self, rhs: Weight) {
        self.0 = self.0.saturating_sub(rhs.0)
    }
}

impl Sum for Weight {
    fn sum<I: Iterator<Item = Weight>>(iter: I) -> Self {
        iter.fold(Weight::zero(), |acc, weight| acc + weight)
    }
}

/// Identifier of an authority: the bytes of its Ed25519 public key.
///
/// Authority ids arrive inside consensus digests and are not checked to be valid curve points until a
/// signature by the authority has to be verified.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct AuthorityId([u8; 32]);

impl AuthorityId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Try to interpret this id as an Ed25519 verifying key.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).ok()
    }
}

impl From<VerifyingKey> for AuthorityId {
    fn from(verifying_key: VerifyingKey) -> Self {
        AuthorityId(verifying_key.to_bytes())
    }
}

impl Debug for AuthorityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bytes of an Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0[..].fmt(f)
    }
}
