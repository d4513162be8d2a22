// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The tree ORAM access protocol over encrypted, untrusted bucket storage.

use crate::{
    block_codec::BlockCodec,
    bucket::{Block, Bucket, StashEntry},
    config::OramConfig,
    crypto::{Aes256GcmEncryption, AuthenticatedEncryption, EncryptionKey},
    position_map::{ArrayPositionMap, PositionMap},
    stash::Stash,
    storage::StorageBackend,
    virtual_heap::VirtualHeap,
    AccessPhase, Address, BlockSize, BucketId, Oram, OramError, StashSize,
};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

/// The kind of a logical access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Return the block's payload.
    Read,
    /// Return the block's payload and replace it with the given bytes.
    Write(Vec<u8>),
}

/// The client-side secrets of a closed store: where each block lives, and the blocks held back
/// in the stash. Without it the storage cannot be read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientState<P = ArrayPositionMap> {
    position_map: P,
    stash: Stash,
}

impl<P: PositionMap> ClientState<P> {
    /// The position map.
    pub fn position_map(&self) -> &P {
        &self.position_map
    }

    /// The stash.
    pub fn stash(&self) -> &Stash {
        &self.stash
    }
}

/// A summary of a full scan of the tree, produced by [`ObliviousStore::audit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuditReport {
    /// The number of real blocks stored in the tree.
    pub tree_blocks: usize,
    /// The number of real blocks held in the stash.
    pub stash_blocks: usize,
}

#[derive(Debug)]
struct StoreState<S, P, C: AuthenticatedEncryption> {
    storage: S,
    position_map: P,
    stash: Stash,
    codec: BlockCodec<C>,
    rng: StdRng,
    poisoned: bool,
}

/// A tree ORAM over untrusted storage `S`.
///
/// ## Parameters
///
/// - Storage `S`: holds one sealed record per bucket of the tree. Never trusted.
/// - Position map `P`: client-side map from address to leaf.
/// - Cipher `C`: the authenticated encryption applied to every slot.
///
/// ## Protocol
///
/// Every access reads the `L + 1` buckets on the path to the target block's leaf into the stash,
/// serves the request from the stash, remaps the block to a fresh uniformly random leaf and
/// writes the same `L + 1` buckets back, filled greedily from the stash (deepest bucket first)
/// and padded with dummies. Every slot is resealed under a fresh nonce, so the storage observes
/// the same shape of I/O for reads and writes of any address.
///
/// Accesses are serialized: one access runs end to end before the next one starts.
///
/// ## Failures
///
/// Failures before write-back (fetch errors, integrity errors, stash overflow) leave the store
/// unchanged and the access may be retried. A failed write-back or a violated protocol invariant
/// poisons the store: every later call returns `StorePoisoned`.
#[derive(Debug)]
pub struct ObliviousStore<
    S: StorageBackend,
    P: PositionMap = ArrayPositionMap,
    C: AuthenticatedEncryption = Aes256GcmEncryption,
> {
    config: OramConfig,
    heap: VirtualHeap,
    stash_soft_limit: StashSize,
    state: Mutex<StoreState<S, P, C>>,
}

fn check_geometry<S: StorageBackend>(
    storage: &S,
    heap: &VirtualHeap,
    bucket_len: usize,
) -> Result<(), OramError> {
    if storage.bucket_count() != heap.bucket_count() || storage.bucket_len() != bucket_len {
        return Err(OramError::ConfigMismatch {
            expected: format!(
                "{} buckets of {} bytes",
                heap.bucket_count(),
                bucket_len
            ),
            found: format!(
                "{} buckets of {} bytes",
                storage.bucket_count(),
                storage.bucket_len()
            ),
        });
    }
    Ok(())
}

impl<S: StorageBackend, P: PositionMap, C: AuthenticatedEncryption> ObliviousStore<S, P, C> {
    /// Formats `storage` and returns an empty store over it, drawing randomness from the operating system.
    /// Every address initially reads as all zeroes.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfigurationError` if `config` is invalid, a `ConfigMismatch` if `storage`
    /// does not have the geometry `config` requires, and a `StorageIOError` if formatting fails.
    pub fn init(config: OramConfig, storage: S, key: EncryptionKey) -> Result<Self, OramError> {
        Self::init_with_rng(config, storage, key, StdRng::from_entropy())
    }

    /// As [`ObliviousStore::init`], drawing leaves and nonces from `rng`.
    pub fn init_with_rng(
        config: OramConfig,
        mut storage: S,
        key: EncryptionKey,
        mut rng: StdRng,
    ) -> Result<Self, OramError> {
        log::info!(
            "ObliviousStore::init(k = {}, N = {}, Z = {}, B = {})",
            config.branching_factor,
            config.block_capacity,
            config.bucket_size,
            config.block_size
        );

        config.validate()?;
        let heap = config.heap()?;
        let codec = BlockCodec::<C>::new(&key, config.block_size, config.bucket_size);
        check_geometry(&storage, &heap, codec.bucket_ciphertext_len())?;

        // Every record starts out as a bucket of freshly sealed dummies.
        let empty_bucket = Bucket::dummy(config.bucket_size, config.block_size);
        for bucket_id in 0..heap.bucket_count() {
            let sealed = codec.encode_bucket(&empty_bucket, bucket_id, &mut rng)?;
            storage
                .put(bucket_id, &sealed)
                .map_err(|source| OramError::StorageIOError {
                    phase: AccessPhase::Format,
                    source,
                })?;
        }
        storage.flush().map_err(|source| OramError::StorageIOError {
            phase: AccessPhase::Format,
            source,
        })?;

        let position_map = P::new(config.block_capacity)?;
        Self::assemble(config, heap, storage, position_map, Stash::new(), codec, rng)
    }

    /// Reattaches the client state returned by [`ObliviousStore::close`] to the storage it was closed with.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigMismatch` if `storage` or `state` does not match `config`.
    pub fn resume(
        config: OramConfig,
        storage: S,
        key: EncryptionKey,
        state: ClientState<P>,
    ) -> Result<Self, OramError> {
        Self::resume_with_rng(config, storage, key, state, StdRng::from_entropy())
    }

    /// As [`ObliviousStore::resume`], drawing leaves and nonces from `rng`.
    pub fn resume_with_rng(
        config: OramConfig,
        storage: S,
        key: EncryptionKey,
        state: ClientState<P>,
        rng: StdRng,
    ) -> Result<Self, OramError> {
        log::info!(
            "ObliviousStore::resume(k = {}, N = {}, Z = {}, B = {}, stash = {})",
            config.branching_factor,
            config.block_capacity,
            config.bucket_size,
            config.block_size,
            state.stash.len()
        );

        config.validate()?;
        let heap = config.heap()?;
        let codec = BlockCodec::<C>::new(&key, config.block_size, config.bucket_size);
        check_geometry(&storage, &heap, codec.bucket_ciphertext_len())?;

        if state.position_map.block_capacity() != config.block_capacity {
            return Err(OramError::ConfigMismatch {
                expected: format!("a position map of {} addresses", config.block_capacity),
                found: format!(
                    "a position map of {} addresses",
                    state.position_map.block_capacity()
                ),
            });
        }

        Self::assemble(
            config,
            heap,
            storage,
            state.position_map,
            state.stash,
            codec,
            rng,
        )
    }

    fn assemble(
        config: OramConfig,
        heap: VirtualHeap,
        storage: S,
        position_map: P,
        stash: Stash,
        codec: BlockCodec<C>,
        rng: StdRng,
    ) -> Result<Self, OramError> {
        Ok(Self {
            stash_soft_limit: config.resolved_stash_soft_limit()?,
            config,
            heap,
            state: Mutex::new(StoreState {
                storage,
                position_map,
                stash,
                codec,
                rng,
                poisoned: false,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState<S, P, C>>, OramError> {
        let state = self.state.lock().map_err(|_| OramError::StorePoisoned)?;
        if state.poisoned {
            return Err(OramError::StorePoisoned);
        }
        Ok(state)
    }

    /// Flushes the storage and returns it together with the client state needed to resume.
    ///
    /// # Errors
    ///
    /// Returns `StorePoisoned` if the store is poisoned, since its storage can no longer be trusted.
    pub fn close(self) -> Result<(S, ClientState<P>), OramError> {
        let mut state = self
            .state
            .into_inner()
            .map_err(|_| OramError::StorePoisoned)?;
        if state.poisoned {
            return Err(OramError::StorePoisoned);
        }

        state
            .storage
            .flush()
            .map_err(|source| OramError::StorageIOError {
                phase: AccessPhase::WriteBack,
                source,
            })?;

        log::info!("ObliviousStore::close(stash = {})", state.stash.len());
        Ok((
            state.storage,
            ClientState {
                position_map: state.position_map,
                stash: state.stash,
            },
        ))
    }

    /// The parameters of this store.
    pub fn config(&self) -> &OramConfig {
        &self.config
    }

    /// The tree this store lays its buckets out in.
    pub fn heap(&self) -> &VirtualHeap {
        &self.heap
    }

    /// The level of the leaves. Every access reads and writes `height() + 1` buckets.
    pub fn height(&self) -> u32 {
        self.heap.height()
    }

    /// The number of blocks currently held in the stash. In production, this number should be
    /// viewed as secret and not revealed.
    pub fn stash_size(&self) -> Result<StashSize, OramError> {
        Ok(self.lock()?.stash.len())
    }

    /// Whether a failed write-back or a violated invariant has poisoned this store.
    pub fn is_poisoned(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.poisoned,
            Err(_) => true,
        }
    }

    /// Runs `f` on the underlying storage, between accesses.
    pub fn with_storage<T, F: FnOnce(&mut S) -> T>(&self, f: F) -> Result<T, OramError> {
        let mut state = self.lock()?;
        Ok(f(&mut state.storage))
    }

    /// Reads and authenticates the whole tree, checking that every live address has exactly one
    /// copy, located on the path of the leaf the position map assigns it.
    ///
    /// This is a diagnostic: it reads every bucket, which is oblivious but slow.
    pub fn audit(&self) -> Result<AuditReport, OramError> {
        let mut state = self.lock()?;
        let state = &mut *state;

        let mut seen: HashMap<Address, BucketId> = HashMap::new();
        let mut tree_blocks = 0;
        for bucket_id in 0..self.heap.bucket_count() {
            let sealed =
                state
                    .storage
                    .get(bucket_id)
                    .map_err(|source| OramError::StorageIOError {
                        phase: AccessPhase::Fetch,
                        source,
                    })?;
            let bucket = state.codec.decode_bucket(&sealed, bucket_id)?;
            for block in bucket.into_real_blocks() {
                let address = block.address().unwrap_or(Block::DUMMY_ADDRESS);
                let leaf = state.position_map.lookup(address)?.ok_or_else(|| {
                    OramError::ProtocolInvariantError(format!(
                        "address {address} is stored but has no position"
                    ))
                })?;
                if !self.heap.is_in_subtree(bucket_id, leaf)? {
                    return Err(OramError::ProtocolInvariantError(format!(
                        "address {address} is stored in bucket {bucket_id}, off the path of leaf {leaf}"
                    )));
                }
                if let Some(other) = seen.insert(address, bucket_id) {
                    return Err(OramError::ProtocolInvariantError(format!(
                        "address {address} is stored in buckets {other} and {bucket_id}"
                    )));
                }
                tree_blocks += 1;
            }
        }

        for entry in state.stash.iter() {
            let address = entry.block.address().unwrap_or(Block::DUMMY_ADDRESS);
            if seen.contains_key(&address) {
                return Err(OramError::ProtocolInvariantError(format!(
                    "address {address} is both stored and stashed"
                )));
            }
            if state.position_map.lookup(address)? != Some(entry.leaf) {
                return Err(OramError::ProtocolInvariantError(format!(
                    "stashed address {address} disagrees with the position map"
                )));
            }
        }

        Ok(AuditReport {
            tree_blocks,
            stash_blocks: state.stash.len(),
        })
    }
}

impl<S: StorageBackend, P: PositionMap, C: AuthenticatedEncryption> StoreState<S, P, C> {
    /// Reads the path of `leaf` and returns its real blocks, each tagged with its assigned leaf.
    fn fetch_path(
        &mut self,
        heap: &VirtualHeap,
        path: &[BucketId],
    ) -> Result<Vec<StashEntry>, OramError> {
        let mut fetched = Vec::new();
        for &bucket_id in path {
            let sealed = self
                .storage
                .get(bucket_id)
                .map_err(|source| OramError::StorageIOError {
                    phase: AccessPhase::Fetch,
                    source,
                })?;
            let bucket = self.codec.decode_bucket(&sealed, bucket_id)?;

            for block in bucket.into_real_blocks() {
                let address = block.address().unwrap_or(Block::DUMMY_ADDRESS);
                let leaf = self.position_map.lookup(address)?.ok_or_else(|| {
                    OramError::ProtocolInvariantError(format!(
                        "address {address} was read from bucket {bucket_id} but has no position"
                    ))
                })?;
                if !heap.is_in_subtree(bucket_id, leaf)? {
                    return Err(OramError::ProtocolInvariantError(format!(
                        "address {address} was read from bucket {bucket_id}, off the path of leaf {leaf}"
                    )));
                }
                fetched.push(StashEntry { block, leaf });
            }
        }
        Ok(fetched)
    }

    /// Fills each bucket of `path`, deepest first, from the stash, and seals it.
    fn plan_eviction(
        &mut self,
        heap: &VirtualHeap,
        path: &[BucketId],
        leaf: BucketId,
    ) -> Result<Vec<(BucketId, Vec<u8>)>, OramError> {
        let bucket_size = self.codec.bucket_size();
        let block_size = self.codec.block_size();

        let mut sealed_path = Vec::with_capacity(path.len());
        for &bucket_id in path {
            let blocks = self
                .stash
                .candidates_for_bucket(bucket_id, leaf, heap, bucket_size)?
                .into_iter()
                .map(|entry| entry.block)
                .collect();
            let bucket = Bucket::from_blocks(blocks, bucket_size, block_size)?;
            let sealed = self.codec.encode_bucket(&bucket, bucket_id, &mut self.rng)?;
            sealed_path.push((bucket_id, sealed));
        }
        Ok(sealed_path)
    }

    fn access(
        &mut self,
        heap: &VirtualHeap,
        limits: (StashSize, Option<StashSize>),
        address: Address,
        operation: Operation,
    ) -> Result<Vec<u8>, OramError> {
        let (soft_limit, hard_limit) = limits;
        let block_size = self.codec.block_size();

        let leaf = self.position_map.get(address, heap, &mut self.rng)?;
        let path: Vec<BucketId> = heap.path_to_root(leaf)?.collect();

        // All of the path is read and authenticated before any client state changes.
        let fetched = self.fetch_path(heap, &path)?;

        let stash_before = self.stash.clone();
        self.stash.absorb(fetched)?;

        // Serve the request. A block that was never written reads as zeroes.
        let mut block = match self.stash.take(address) {
            Some(entry) => entry.block,
            None => Block::new(address, &[], block_size),
        };
        let result = block.payload().to_vec();
        if let Operation::Write(payload) = &operation {
            block.set_payload(payload);
        }

        let new_leaf = heap.random_leaf(&mut self.rng);
        self.position_map.set(address, new_leaf)?;
        self.stash.insert(StashEntry {
            block,
            leaf: new_leaf,
        })?;

        let sealed_path = self.plan_eviction(heap, &path, leaf)?;

        let occupancy = self.stash.len();
        if let Some(limit) = hard_limit {
            if occupancy > limit {
                self.stash = stash_before;
                self.position_map.set(address, leaf)?;
                log::warn!(
                    "Stash overflow: {} blocks exceed the hard limit of {}; access aborted",
                    occupancy,
                    limit
                );
                return Err(OramError::StashOverflow { occupancy, limit });
            }
        }
        if occupancy > soft_limit {
            log::warn!(
                "Stash holds {} blocks, above its soft limit of {}",
                occupancy,
                soft_limit
            );
        }

        for (bucket_id, sealed) in &sealed_path {
            self.storage
                .put(*bucket_id, sealed)
                .map_err(|source| OramError::StorageIOError {
                    phase: AccessPhase::WriteBack,
                    source,
                })?;
        }

        Ok(result)
    }
}

impl<S: StorageBackend, P: PositionMap, C: AuthenticatedEncryption> Oram
    for ObliviousStore<S, P, C>
{
    fn block_capacity(&self) -> Address {
        self.config.block_capacity
    }

    fn block_size(&self) -> BlockSize {
        self.config.block_size
    }

    fn access(&self, address: Address, operation: Operation) -> Result<Vec<u8>, OramError> {
        // This check is not oblivious, but only leaks whether the address is well-formed or not.
        if address >= self.config.block_capacity {
            return Err(OramError::AddressOutOfBoundsError {
                address,
                capacity: self.config.block_capacity,
            });
        }

        let mut state = self.lock()?;
        let result = state.access(
            &self.heap,
            (self.stash_soft_limit, self.config.stash_hard_limit),
            address,
            operation,
        );

        if let Err(error) = &result {
            let fatal = matches!(
                error,
                OramError::ProtocolInvariantError(_)
                    | OramError::StorageIOError {
                        phase: AccessPhase::WriteBack,
                        ..
                    }
            );
            if fatal {
                log::error!("ObliviousStore poisoned: {}", error);
                state.poisoned = true;
            }
        }
        result
    }
}
