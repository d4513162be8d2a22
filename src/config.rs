// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! ORAM parameters.

use crate::{
    block_codec::BlockCodec, crypto::Aes256GcmEncryption, virtual_heap::VirtualHeap, Address,
    BlockSize, BucketSize, OramError, StashSize,
};

/// The parameter "Z" from the Path ORAM literature that sets the number of blocks per bucket; typical values are 3 or 4.
/// Here we adopt the more conservative setting of 4.
pub const DEFAULT_BLOCKS_PER_BUCKET: BucketSize = 4;

/// The default number of children per tree node.
pub const DEFAULT_BRANCHING_FACTOR: u64 = 2;

/// Unless configured otherwise, a warning is logged once the stash holds more than
/// this many blocks per level of the tree.
pub const DEFAULT_STASH_SOFT_LIMIT_FACTOR: StashSize = 4;

/// The parameters of an [`crate::ObliviousStore`].
///
/// `branching_factor`, `block_capacity`, `bucket_size` and `block_size` fix the storage layout and
/// must be supplied identically every time the same storage is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OramConfig {
    /// The number of children of each tree node ("k"). At least 2.
    pub branching_factor: u64,
    /// The number of addressable blocks ("N"). At least 1.
    pub block_capacity: Address,
    /// The number of block slots per bucket ("Z"). At least 1.
    pub bucket_size: BucketSize,
    /// The payload size of each block in bytes. At least 1.
    pub block_size: BlockSize,
    /// The stash occupancy above which a warning is logged. Defaults to
    /// `DEFAULT_STASH_SOFT_LIMIT_FACTOR` blocks per tree level.
    pub stash_soft_limit: Option<StashSize>,
    /// The stash occupancy above which an access is aborted with `StashOverflow`. Unbounded by default.
    pub stash_hard_limit: Option<StashSize>,
}

impl OramConfig {
    /// Parameters for `block_capacity` blocks of `block_size` bytes, in a `branching_factor`-ary tree
    /// with `bucket_size` slots per bucket.
    pub fn new(
        branching_factor: u64,
        block_capacity: Address,
        bucket_size: BucketSize,
        block_size: BlockSize,
    ) -> Self {
        Self {
            branching_factor,
            block_capacity,
            bucket_size,
            block_size,
            stash_soft_limit: None,
            stash_hard_limit: None,
        }
    }

    /// Parameters with the default branching factor and bucket size.
    pub fn with_defaults(block_capacity: Address, block_size: BlockSize) -> Self {
        Self::new(
            DEFAULT_BRANCHING_FACTOR,
            block_capacity,
            DEFAULT_BLOCKS_PER_BUCKET,
            block_size,
        )
    }

    /// Sets the stash occupancy above which a warning is logged.
    pub fn with_stash_soft_limit(mut self, limit: StashSize) -> Self {
        self.stash_soft_limit = Some(limit);
        self
    }

    /// Sets the stash occupancy above which accesses fail with `StashOverflow`.
    pub fn with_stash_hard_limit(mut self, limit: StashSize) -> Self {
        self.stash_hard_limit = Some(limit);
        self
    }

    /// Checks that the parameters describe a usable ORAM.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfigurationError` in the following cases.
    ///
    /// - `branching_factor` is 0 or 1.
    /// - `block_capacity`, `bucket_size` or `block_size` is 0.
    /// - The tree has more buckets than fit in a `u64`.
    /// - A sealed bucket is larger than `usize::MAX` bytes.
    pub fn validate(&self) -> Result<(), OramError> {
        if self.bucket_size == 0 {
            return Err(OramError::InvalidConfigurationError(
                "the bucket size must be positive",
            ));
        }
        if self.block_size == 0 {
            return Err(OramError::InvalidConfigurationError(
                "the block size must be positive",
            ));
        }
        self.heap()?;
        if BlockCodec::<Aes256GcmEncryption>::checked_bucket_ciphertext_len_for(
            self.block_size,
            self.bucket_size,
        )
        .is_none()
        {
            return Err(OramError::InvalidConfigurationError(
                "a sealed bucket must fit in memory",
            ));
        }
        Ok(())
    }

    /// The tree described by these parameters.
    pub fn heap(&self) -> Result<VirtualHeap, OramError> {
        VirtualHeap::new(self.branching_factor, self.block_capacity)
    }

    /// The stash occupancy above which a warning is logged.
    pub fn resolved_stash_soft_limit(&self) -> Result<StashSize, OramError> {
        match self.stash_soft_limit {
            Some(limit) => Ok(limit),
            None => Ok(DEFAULT_STASH_SOFT_LIMIT_FACTOR * self.heap()?.path_len()),
        }
    }

    /// The size in bytes of each bucket record when sealed with AES-256-GCM.
    /// Only meaningful for a configuration that passes [`OramConfig::validate`].
    pub fn bucket_ciphertext_len(&self) -> usize {
        BlockCodec::<Aes256GcmEncryption>::bucket_ciphertext_len_for(
            self.block_size,
            self.bucket_size,
        )
    }
}
