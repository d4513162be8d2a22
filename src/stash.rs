// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side working set of blocks that are between a path read and a path write.

use crate::{
    bucket::StashEntry, virtual_heap::VirtualHeap, Address, BucketId, OramError, StashSize,
};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A stash of real blocks, each tagged with its assigned leaf.
pub struct Stash {
    entries: Vec<StashEntry>,
}

impl Stash {
    /// An empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of blocks in the stash.
    pub fn len(&self) -> StashSize {
        self.entries.len()
    }

    /// Whether the stash holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the stashed entries.
    pub fn iter(&self) -> impl Iterator<Item = &StashEntry> {
        self.entries.iter()
    }

    /// Whether a block with address `address` is stashed.
    pub fn contains(&self, address: Address) -> bool {
        self.position(address).is_some()
    }

    // LEAK: the time taken by this scan leaks the size of the stash, but not the position of the match.
    fn position(&self, address: Address) -> Option<usize> {
        let mut found: Choice = 0.into();
        let mut index: u64 = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            let matches = entry.block.raw_address().ct_eq(&address) & !found;
            index.conditional_assign(&(i as u64), matches);
            found |= matches;
        }
        bool::from(found).then_some(index as usize)
    }

    /// Adds one block to the stash.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolInvariantError` if the entry is a dummy or if its address is already stashed,
    /// since either means there would be two live copies of a block.
    pub fn insert(&mut self, entry: StashEntry) -> Result<(), OramError> {
        let Some(address) = entry.block.address() else {
            return Err(OramError::ProtocolInvariantError(
                "a dummy block cannot be stashed".into(),
            ));
        };
        if self.contains(address) {
            return Err(OramError::ProtocolInvariantError(format!(
                "address {address} has two live copies"
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Adds the real blocks among `entries` to the stash, skipping dummies.
    pub fn absorb<I: IntoIterator<Item = StashEntry>>(&mut self, entries: I) -> Result<(), OramError> {
        for entry in entries {
            if !entry.block.is_dummy() {
                self.insert(entry)?;
            }
        }
        Ok(())
    }

    /// Removes and returns the block with address `address`, if stashed.
    pub fn take(&mut self, address: Address) -> Option<StashEntry> {
        self.position(address).map(|index| self.entries.remove(index))
    }

    /// Removes and returns up to `limit` blocks that may be stored in `bucket`, i.e. whose leaf
    /// lies in the subtree rooted at `bucket`.
    ///
    /// `bucket` must lie on the path of `path_leaf`, the path being evicted. Blocks sharing the
    /// deepest common level with `path_leaf` come first; ties keep stash order.
    pub fn candidates_for_bucket(
        &mut self,
        bucket: BucketId,
        path_leaf: BucketId,
        heap: &VirtualHeap,
        limit: usize,
    ) -> Result<Vec<StashEntry>, OramError> {
        let mut eligible = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if heap.is_in_subtree(bucket, entry.leaf)? {
                let depth = heap.last_common_level(entry.leaf, path_leaf)?;
                eligible.push((depth, index));
            }
        }
        eligible.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        eligible.truncate(limit);

        let mut chosen: Vec<usize> = eligible.into_iter().map(|(_, index)| index).collect();
        chosen.sort_unstable_by(|a, b| b.cmp(a));
        let mut result: Vec<StashEntry> = chosen
            .into_iter()
            .map(|index| self.entries.remove(index))
            .collect();
        // Removal ran back to front; restore stash order.
        result.reverse();
        Ok(result)
    }
}
