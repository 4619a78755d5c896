/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use super::data_types::{AuthorityId, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements a method for [`sign`](Self::sign)-ing vote payloads
/// as well as a getter for the [`AuthorityId`] associated with the signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub(crate) fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `AuthorityId` (public key bytes) of this `Keypair`.
    pub fn id(&self) -> AuthorityId {
        AuthorityId::from(self.0.verifying_key())
    }
}

/// Verify that `signature` was created by the authority `id` over `message`. Ids that are not valid
/// Ed25519 public keys never verify.
pub(crate) fn verify(id: &AuthorityId, message: &[u8], signature: &SignatureBytes) -> bool {
    match id.verifying_key() {
        Some(verifying_key) => {
            let signature = Signature::from_bytes(&signature.bytes());
            verifying_key.verify(message, &signature).is_ok()
        }
        None => false,
    }
}
