// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Implements a trait `PositionMap` representing a tree ORAM position map data structure.

use crate::{virtual_heap::VirtualHeap, Address, BucketId, OramError};
use rand::{CryptoRng, RngCore};

/// Maps each ORAM address to the leaf whose path holds (or most recently held) its block.
pub trait PositionMap
where
    Self: Sized,
{
    /// Returns an empty position map for addresses `0 <= address < block_capacity`.
    fn new(block_capacity: Address) -> Result<Self, OramError>;

    /// The number of addresses covered by the map.
    fn block_capacity(&self) -> Address;

    /// Returns the leaf assigned to `address`. An address that was never assigned
    /// gets a leaf drawn uniformly from `heap.leaves()`, which is recorded and returned.
    fn get<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        heap: &VirtualHeap,
        rng: &mut R,
    ) -> Result<BucketId, OramError>;

    /// Assigns `leaf` to `address`. Returns the previous assignment, if any.
    fn set(&mut self, address: Address, leaf: BucketId) -> Result<Option<BucketId>, OramError>;

    /// Returns the leaf assigned to `address` without assigning one.
    fn lookup(&self, address: Address) -> Result<Option<BucketId>, OramError>;

    /// The number of addresses that have been assigned a leaf.
    fn assigned_count(&self) -> usize;
}

/// A position map stored as an in-memory array, suitable for client-held state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayPositionMap {
    leaves: Vec<BucketId>,
}

impl ArrayPositionMap {
    const UNASSIGNED: BucketId = BucketId::MAX;

    fn index(&self, address: Address) -> Result<usize, OramError> {
        let capacity = self.block_capacity();
        if address >= capacity {
            return Err(OramError::AddressOutOfBoundsError { address, capacity });
        }
        Ok(usize::try_from(address)?)
    }
}

impl PositionMap for ArrayPositionMap {
    fn new(block_capacity: Address) -> Result<Self, OramError> {
        log::debug!("PositionMap::new -- ArrayPositionMap(C = {})", block_capacity);
        Ok(Self {
            leaves: vec![Self::UNASSIGNED; usize::try_from(block_capacity)?],
        })
    }

    fn block_capacity(&self) -> Address {
        self.leaves.len() as Address
    }

    fn get<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        heap: &VirtualHeap,
        rng: &mut R,
    ) -> Result<BucketId, OramError> {
        let index = self.index(address)?;
        if self.leaves[index] == Self::UNASSIGNED {
            self.leaves[index] = heap.random_leaf(rng);
        }
        Ok(self.leaves[index])
    }

    fn set(&mut self, address: Address, leaf: BucketId) -> Result<Option<BucketId>, OramError> {
        if leaf == Self::UNASSIGNED {
            return Err(OramError::ProtocolInvariantError(format!(
                "address {address} cannot be assigned the reserved leaf {leaf}"
            )));
        }
        let index = self.index(address)?;
        let previous = std::mem::replace(&mut self.leaves[index], leaf);
        Ok((previous != Self::UNASSIGNED).then_some(previous))
    }

    fn lookup(&self, address: Address) -> Result<Option<BucketId>, OramError> {
        let leaf = self.leaves[self.index(address)?];
        Ok((leaf != Self::UNASSIGNED).then_some(leaf))
    }

    fn assigned_count(&self) -> usize {
        self.leaves
            .iter()
            .filter(|&&leaf| leaf != Self::UNASSIGNED)
            .count()
    }
}
