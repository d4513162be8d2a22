// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Index arithmetic over a complete k-ary tree laid out as a linear array of buckets.
//!
//! Bucket 0 is the root, and the children of bucket `b` are `k * b + 1` through `k * b + k`,
//! so that `parent(b) = (b - 1) / k`. Levels are counted from the root (level 0) down to the
//! leaves (level `height`).

use crate::{Address, BucketId, Level, OramError};
use rand::{CryptoRng, Rng, RngCore};
use std::iter::FusedIterator;
use std::ops::Range;

/// An immutable description of a complete k-ary tree of buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualHeap {
    branching_factor: u64,
    height: Level,
    leaf_count: u64,
    bucket_count: u64,
}

impl VirtualHeap {
    /// Returns the shallowest complete tree with branching factor `branching_factor`
    /// having at least `block_capacity` leaves.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfigurationError` if `branching_factor < 2`, if `block_capacity` is 0,
    /// or if the number of buckets in the tree does not fit in a `u64`.
    pub fn new(branching_factor: u64, block_capacity: Address) -> Result<Self, OramError> {
        if branching_factor < 2 {
            return Err(OramError::InvalidConfigurationError(
                "the branching factor must be at least 2",
            ));
        }
        if block_capacity == 0 {
            return Err(OramError::InvalidConfigurationError(
                "the block capacity must be positive",
            ));
        }

        const TOO_LARGE: OramError =
            OramError::InvalidConfigurationError("the tree has too many buckets");

        let mut height: Level = 0;
        let mut leaf_count: u64 = 1;
        let mut bucket_count: u64 = 1;
        while leaf_count < block_capacity {
            leaf_count = leaf_count.checked_mul(branching_factor).ok_or(TOO_LARGE)?;
            bucket_count = bucket_count.checked_add(leaf_count).ok_or(TOO_LARGE)?;
            height += 1;
        }

        Ok(Self {
            branching_factor,
            height,
            leaf_count,
            bucket_count,
        })
    }

    /// The number of children of every internal bucket ("k").
    pub fn branching_factor(&self) -> u64 {
        self.branching_factor
    }

    /// The level of the leaves ("L"). A path holds `height + 1` buckets.
    pub fn height(&self) -> Level {
        self.height
    }

    /// The number of buckets on every root-to-leaf path.
    pub fn path_len(&self) -> usize {
        self.height as usize + 1
    }

    /// The total number of buckets, `(k^(L+1) - 1) / (k - 1)`.
    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    /// The number of buckets at level `height`.
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// The bucket ids at the deepest level of the tree.
    pub fn leaves(&self) -> Range<BucketId> {
        (self.bucket_count - self.leaf_count)..self.bucket_count
    }

    /// Returns whether `bucket` is a leaf of this tree.
    pub fn is_leaf(&self, bucket: BucketId) -> bool {
        self.leaves().contains(&bucket)
    }

    /// Returns a leaf chosen uniformly at random.
    pub fn random_leaf<R: RngCore + CryptoRng>(&self, rng: &mut R) -> BucketId {
        rng.gen_range(self.leaves())
    }

    fn check_bucket(&self, bucket: BucketId) -> Result<(), OramError> {
        if bucket >= self.bucket_count {
            return Err(OramError::InvalidBucket {
                bucket,
                bucket_count: self.bucket_count,
            });
        }
        Ok(())
    }

    /// Returns the depth of `bucket`: the smallest `h` with `bucket < (k^(h+1) - 1) / (k - 1)`.
    pub fn bucket_level(&self, bucket: BucketId) -> Result<Level, OramError> {
        self.check_bucket(bucket)?;

        let mut level: Level = 0;
        let mut level_width: u64 = 1;
        let mut buckets_through_level: u64 = 1;
        // `bucket < bucket_count` bounds every intermediate value by `bucket_count`.
        while bucket >= buckets_through_level {
            level_width *= self.branching_factor;
            buckets_through_level += level_width;
            level += 1;
        }
        Ok(level)
    }

    /// Returns the parent of `bucket`, or `None` for the root.
    pub fn parent(&self, bucket: BucketId) -> Result<Option<BucketId>, OramError> {
        self.check_bucket(bucket)?;
        Ok(self.unchecked_parent(bucket))
    }

    fn unchecked_parent(&self, bucket: BucketId) -> Option<BucketId> {
        if bucket == 0 {
            None
        } else {
            Some((bucket - 1) / self.branching_factor)
        }
    }

    /// Returns the ancestors of `bucket` from `bucket` itself up to and including the root.
    pub fn path_to_root(&self, bucket: BucketId) -> Result<PathToRoot, OramError> {
        let level = self.bucket_level(bucket)?;
        Ok(PathToRoot {
            next: Some(bucket),
            remaining: level as usize + 1,
            branching_factor: self.branching_factor,
        })
    }

    /// Returns the ancestor of `bucket` at depth `level`.
    pub fn ancestor_at_level(&self, bucket: BucketId, level: Level) -> Result<BucketId, OramError> {
        let bucket_level = self.bucket_level(bucket)?;
        if level > bucket_level {
            return Err(OramError::ProtocolInvariantError(format!(
                "bucket {bucket} at level {bucket_level} has no ancestor at level {level}"
            )));
        }

        let mut ancestor = bucket;
        for _ in level..bucket_level {
            ancestor = (ancestor - 1) / self.branching_factor;
        }
        Ok(ancestor)
    }

    /// Returns the depth of the deepest bucket that is an ancestor of (or equal to) both
    /// `first` and `second`.
    pub fn last_common_level(
        &self,
        first: BucketId,
        second: BucketId,
    ) -> Result<Level, OramError> {
        let mut first_level = self.bucket_level(first)?;
        let mut second_level = self.bucket_level(second)?;
        let (mut first, mut second) = (first, second);

        while first_level > second_level {
            first = (first - 1) / self.branching_factor;
            first_level -= 1;
        }
        while second_level > first_level {
            second = (second - 1) / self.branching_factor;
            second_level -= 1;
        }

        // Both walks end at the root at the latest.
        while first != second {
            first = (first - 1) / self.branching_factor;
            second = (second - 1) / self.branching_factor;
            first_level -= 1;
        }
        Ok(first_level)
    }

    /// Returns whether the subtree rooted at `ancestor` contains `bucket`.
    pub fn is_in_subtree(&self, ancestor: BucketId, bucket: BucketId) -> Result<bool, OramError> {
        Ok(self.last_common_level(ancestor, bucket)? == self.bucket_level(ancestor)?)
    }
}

/// The sequence of buckets from some bucket up to the root, produced by [`VirtualHeap::path_to_root`].
#[derive(Clone, Debug)]
pub struct PathToRoot {
    next: Option<BucketId>,
    remaining: usize,
    branching_factor: u64,
}

impl Iterator for PathToRoot {
    type Item = BucketId;

    fn next(&mut self) -> Option<BucketId> {
        let current = self.next?;
        self.next = if current == 0 {
            None
        } else {
            Some((current - 1) / self.branching_factor)
        };
        self.remaining -= 1;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for PathToRoot {}
impl FusedIterator for PathToRoot {}
