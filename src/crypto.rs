// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The authenticated-encryption capability used to seal every stored slot.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The size in bytes of an [`EncryptionKey`].
pub const KEY_SIZE: usize = 32;

/// Errors reported by an [`AuthenticatedEncryption`] primitive.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// The primitive refused to seal the plaintext.
    #[error("Encryption failed")]
    EncryptionFailed,
    /// The ciphertext, nonce or associated data did not authenticate.
    #[error("Invalid authentication tag")]
    InvalidTag,
}

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wraps existing key material.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Draws a fresh key from the operating system's random number generator.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Draws a fresh key from `rng`.
    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

/// An AEAD whose ciphertext length depends only on the plaintext length.
pub trait AuthenticatedEncryption
where
    Self: Sized,
{
    /// The nonce length in bytes.
    const NONCE_LEN: usize;
    /// The number of bytes sealing adds to a plaintext.
    const TAG_LEN: usize;

    /// Instantiates the primitive under `key`.
    fn new(key: &EncryptionKey) -> Self;

    /// Encrypts and authenticates `plaintext` together with `aad`.
    fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticates and decrypts `ciphertext` together with `aad`.
    fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// The ciphertext length for a plaintext of `plaintext_len` bytes.
    fn ciphertext_len(plaintext_len: usize) -> usize {
        plaintext_len + Self::TAG_LEN
    }
}

/// AES-256 in Galois/Counter Mode with 96-bit nonces.
#[derive(Clone)]
pub struct Aes256GcmEncryption {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Aes256GcmEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Aes256GcmEncryption")
    }
}

impl AuthenticatedEncryption for Aes256GcmEncryption {
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    fn new(key: &EncryptionKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != Self::NONCE_LEN {
            return Err(CryptoError::EncryptionFailed);
        }
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        self.cipher
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != Self::NONCE_LEN {
            return Err(CryptoError::InvalidTag);
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CryptoError::InvalidTag)
    }
}
