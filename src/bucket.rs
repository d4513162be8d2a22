// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Block and bucket structures for tree ORAM.

use crate::{Address, BlockSize, BucketId, BucketSize, OramError};
use subtle::{Choice, ConstantTimeEq};

/// Copies `payload` into a fresh buffer of exactly `block_size` bytes, zero padding or truncating.
pub(crate) fn normalize_payload(payload: &[u8], block_size: BlockSize) -> Vec<u8> {
    let mut result = vec![0u8; block_size];
    let len = payload.len().min(block_size);
    result[..len].copy_from_slice(&payload[..len]);
    result
}

#[derive(Clone, PartialEq, Eq)]
/// A logical block: a fixed-size payload and its ORAM `address`, or a dummy.
pub struct Block {
    address: Address,
    payload: Vec<u8>,
}

impl Block {
    /// The address carried by dummy blocks. Real addresses are always smaller.
    pub const DUMMY_ADDRESS: Address = Address::MAX;

    /// A real block holding `payload`, zero padded or truncated to `block_size` bytes.
    pub fn new(address: Address, payload: &[u8], block_size: BlockSize) -> Self {
        debug_assert_ne!(address, Self::DUMMY_ADDRESS);
        Self {
            address,
            payload: normalize_payload(payload, block_size),
        }
    }

    /// A dummy block with an all-zero payload of `block_size` bytes.
    pub fn dummy(block_size: BlockSize) -> Self {
        Self {
            address: Self::DUMMY_ADDRESS,
            payload: vec![0u8; block_size],
        }
    }

    /// Whether this block is a dummy, in constant time.
    pub fn ct_is_dummy(&self) -> Choice {
        self.address.ct_eq(&Self::DUMMY_ADDRESS)
    }

    /// Whether this block is a dummy.
    pub fn is_dummy(&self) -> bool {
        self.ct_is_dummy().into()
    }

    /// The address of a real block, `None` for a dummy.
    pub fn address(&self) -> Option<Address> {
        if self.is_dummy() {
            None
        } else {
            Some(self.address)
        }
    }

    pub(crate) fn raw_address(&self) -> Address {
        self.address
    }

    /// The block's payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replaces the payload, keeping its length.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.payload = normalize_payload(payload, self.payload.len());
    }

    /// Consumes the block, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dummy() {
            write!(f, "Block::Dummy")
        } else {
            f.debug_struct("Block")
                .field("address", &self.address)
                .field("payload_len", &self.payload.len())
                .finish()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A real block held by the client, together with the leaf it is assigned to.
pub struct StashEntry {
    /// The block.
    pub block: Block,
    /// The leaf bucket whose path the block must be evicted onto.
    pub leaf: BucketId,
}

#[derive(Clone, PartialEq, Eq)]
/// A bucket of exactly `Z` slots, unfilled slots holding dummies.
pub struct Bucket {
    pub(crate) blocks: Vec<Block>,
}

impl Bucket {
    /// A bucket of `bucket_size` dummies.
    pub fn dummy(bucket_size: BucketSize, block_size: BlockSize) -> Self {
        Self {
            blocks: vec![Block::dummy(block_size); bucket_size],
        }
    }

    /// A bucket holding `blocks`, padded with dummies to `bucket_size` slots.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolInvariantError` if more than `bucket_size` blocks are supplied.
    pub fn from_blocks(
        mut blocks: Vec<Block>,
        bucket_size: BucketSize,
        block_size: BlockSize,
    ) -> Result<Self, OramError> {
        if blocks.len() > bucket_size {
            return Err(OramError::ProtocolInvariantError(format!(
                "{} blocks do not fit a bucket of {} slots",
                blocks.len(),
                bucket_size
            )));
        }
        blocks.resize(bucket_size, Block::dummy(block_size));
        Ok(Self { blocks })
    }

    /// The slots of this bucket.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The number of slots.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the bucket has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The number of real blocks.
    pub fn occupancy(&self) -> usize {
        self.blocks.iter().filter(|block| !block.is_dummy()).count()
    }

    /// Consumes the bucket, returning its real blocks.
    pub fn into_real_blocks(self) -> impl Iterator<Item = Block> {
        self.blocks.into_iter().filter(|block| !block.is_dummy())
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.occupancy() == 0 {
            write!(f, "Bucket::Dummy")
        } else {
            f.debug_struct("Bucket")
                .field("blocks", &self.blocks)
                .finish()
        }
    }
}
