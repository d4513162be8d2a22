// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A tree-based Oblivious RAM storage engine.
//!
//! An [`ObliviousStore`] lets a client read and write fixed-size logical blocks
//! kept on an untrusted [`StorageBackend`] while hiding which block was accessed
//! and whether the access was a read or a write. Blocks live in the buckets of a
//! complete k-ary tree ([`VirtualHeap`]); every access fetches one root-to-leaf
//! path, remaps the target block to a fresh random leaf and writes the whole path
//! back, re-encrypting every slot with a fresh nonce.
//!
//! ```no_run
//! use tree_oram::{EncryptionKey, MemoryStorage, ObliviousStore, Oram, OramConfig, OramError};
//!
//! fn main() -> Result<(), OramError> {
//!     let config = OramConfig::new(2, 64, 4, 32);
//!     let storage = MemoryStorage::for_config(&config)?;
//!     let store = ObliviousStore::<MemoryStorage>::init(config, storage, EncryptionKey::generate())?;
//!     store.write(3, b"hello")?;
//!     assert_eq!(&store.read(3)?[..5], b"hello");
//!     Ok(())
//! }
//! ```

#![warn(clippy::doc_markdown, missing_docs, rustdoc::all)]

use std::num::TryFromIntError;
use thiserror::Error;

pub mod block_codec;
pub mod bucket;
pub mod config;
pub mod crypto;
pub mod oblivious_store;
pub mod position_map;
pub mod stash;
pub mod storage;
pub mod virtual_heap;

#[cfg(test)]
mod test_utils;

pub use crate::block_codec::BlockCodec;
pub use crate::bucket::{Block, Bucket};
pub use crate::config::OramConfig;
pub use crate::crypto::{Aes256GcmEncryption, AuthenticatedEncryption, EncryptionKey};
pub use crate::oblivious_store::{AuditReport, ClientState, ObliviousStore, Operation};
pub use crate::position_map::{ArrayPositionMap, PositionMap};
pub use crate::stash::Stash;
pub use crate::storage::{CountAccessesStorage, FileStorage, MemoryStorage, StorageBackend};
pub use crate::virtual_heap::VirtualHeap;

/// The numeric type used to specify the size of an ORAM block payload in bytes.
pub type BlockSize = usize;
/// The numeric type used to specify the size of an ORAM in blocks, and to index into the ORAM.
pub type Address = u64;
/// The numeric type used to specify the number of blocks in a bucket ("Z").
pub type BucketSize = usize;
/// The numeric type used to index buckets of the tree, root = 0.
pub type BucketId = u64;
/// The numeric type used to specify the depth of a bucket in the tree, root = 0.
pub type Level = u32;
/// The numeric type used to specify the number of blocks held by a stash.
pub type StashSize = usize;

/// The phase of an access during which a storage operation failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessPhase {
    /// Formatting fresh storage with dummy buckets.
    Format,
    /// Reading the path into the stash. Failures here leave the store unchanged.
    Fetch,
    /// Writing the path back. Failures here poison the store.
    WriteBack,
}

impl std::fmt::Display for AccessPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessPhase::Format => write!(f, "format"),
            AccessPhase::Fetch => write!(f, "fetch"),
            AccessPhase::WriteBack => write!(f, "write-back"),
        }
    }
}

/// Errors that can arise while operating an ORAM.
#[derive(Error, Debug)]
pub enum OramError {
    /// Tree arithmetic was asked about a bucket outside the tree.
    #[error("Bucket {bucket} is outside a tree of {bucket_count} buckets")]
    InvalidBucket {
        /// The offending bucket id.
        bucket: BucketId,
        /// The number of buckets in the tree.
        bucket_count: u64,
    },

    /// Authenticated decryption of a slot failed. The storage is corrupted or has been tampered with.
    #[error("Integrity check failed for slot {slot} of bucket {bucket}")]
    IntegrityError {
        /// The bucket holding the slot that failed to authenticate.
        bucket: BucketId,
        /// The slot within the bucket.
        slot: usize,
    },

    /// The stash would hold more blocks than its configured hard limit after eviction.
    #[error("Stash would hold {occupancy} blocks, above its hard limit of {limit}")]
    StashOverflow {
        /// The number of blocks the stash would hold.
        occupancy: StashSize,
        /// The configured hard limit.
        limit: StashSize,
    },

    /// An internal invariant of the access protocol was violated.
    #[error("Protocol invariant violated: {0}")]
    ProtocolInvariantError(String),

    /// The storage backend failed.
    #[error("Storage I/O error during {phase}")]
    StorageIOError {
        /// The phase of the access during which the error occurred.
        phase: AccessPhase,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The storage does not have the geometry implied by the configuration.
    #[error("Configuration mismatch: expected {expected}, found {found}")]
    ConfigMismatch {
        /// What the configuration implies.
        expected: String,
        /// What the storage actually holds.
        found: String,
    },

    /// The ORAM parameters are not valid.
    #[error("Invalid configuration: {0}")]
    InvalidConfigurationError(&'static str),

    /// Attempted to access an out-of-bounds ORAM address.
    #[error("Address {address} is out of bounds for an ORAM of {capacity} blocks")]
    AddressOutOfBoundsError {
        /// The requested address.
        address: Address,
        /// The number of addressable blocks.
        capacity: Address,
    },

    /// A previous write-back failed or an invariant was violated; the store refuses further operations.
    #[error("The store is poisoned and must be re-initialized from a trusted backup")]
    StorePoisoned,

    /// Arithmetic error encountered.
    #[error("Arithmetic error encountered.")]
    IntegerConversionError(#[from] TryFromIntError),
}

/// Represents an oblivious RAM (ORAM) mapping addresses of type `Address` to fixed-size byte payloads.
pub trait Oram {
    /// Returns the capacity in blocks of this ORAM.
    fn block_capacity(&self) -> Address;

    /// Returns the payload size in bytes of every block.
    fn block_size(&self) -> BlockSize;

    /// Performs an ORAM access.
    /// Returns the payload stored at `address` before the access.
    /// If `operation` is a write, the block's payload is replaced.
    fn access(&self, address: Address, operation: Operation) -> Result<Vec<u8>, OramError>;

    /// Obliviously reads the payload stored at `address`.
    /// Addresses that were never written read as all zeroes.
    fn read(&self, address: Address) -> Result<Vec<u8>, OramError> {
        log::debug!("ORAM read: {}", address);
        self.access(address, Operation::Read)
    }

    /// Obliviously writes `payload` at `address`, zero padded or truncated to the block size.
    /// Returns the payload previously stored at `address`.
    fn write(&self, address: Address, payload: &[u8]) -> Result<Vec<u8>, OramError> {
        log::debug!("ORAM write: {}", address);
        self.access(address, Operation::Write(payload.to_vec()))
    }
}
