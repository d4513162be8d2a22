// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! This module contains common test utilities for the `tree_oram` crate.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Once;
static INIT: Once = Once::new();
use crate::{
    Address, BlockSize, CountAccessesStorage, EncryptionKey, MemoryStorage, ObliviousStore, Oram,
    OramConfig, OramError, Operation,
};
use duplicate::duplicate_item;
use rand::{rngs::StdRng, Rng, SeedableRng};
use simplelog::{Config, WriteLogger};

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

/// A path in the system temporary directory that is unique to this process and `name`.
pub(crate) fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tree_oram_{}_{}.bin", std::process::id(), name))
}

pub(crate) fn random_payload<R: Rng>(rng: &mut R, block_size: BlockSize) -> Vec<u8> {
    (0..block_size).map(|_| rng.gen()).collect()
}

pub(crate) type MemoryOram = ObliviousStore<MemoryStorage>;
pub(crate) type CountingOram = ObliviousStore<CountAccessesStorage<MemoryStorage>>;

/// An ORAM that the workloads below know how to construct and check.
pub(crate) trait Testable: Oram + Sized {
    fn for_config(config: OramConfig, seed: u64) -> Self;

    fn test_hook(&self) {}
}

impl Testable for MemoryOram {
    fn for_config(config: OramConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let key = EncryptionKey::generate_with(&mut rng);
        let storage = MemoryStorage::for_config(&config).unwrap();
        ObliviousStore::init_with_rng(config, storage, key, rng).unwrap()
    }

    fn test_hook(&self) {
        self.audit().unwrap();
    }
}

impl Testable for CountingOram {
    fn for_config(config: OramConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let key = EncryptionKey::generate_with(&mut rng);
        let storage =
            CountAccessesStorage::new(MemoryStorage::for_config(&config).unwrap()).unwrap();
        let oram = ObliviousStore::init_with_rng(config, storage, key, rng).unwrap();

        // Avoid counting writes occurring during initialization
        oram.with_storage(|storage| storage.reset_counts()).unwrap();
        oram
    }

    fn test_hook(&self) {
        self.audit().unwrap();
    }
}

/// Tests the correctness of an `Oram` type T on a workload of random reads and writes.
pub(crate) fn test_correctness_random_workload<T: Testable>(
    config: OramConfig,
    num_operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);

    let oram = T::for_config(config, 1);
    let capacity = config.block_capacity;
    let mut mirror_array = vec![vec![0u8; config.block_size]; capacity as usize];

    for _ in 0..num_operations {
        let random_index = rng.gen_range(0..capacity);
        let random_block_value = random_payload(&mut rng, config.block_size);

        let read_versus_write = rng.gen::<bool>();

        if read_versus_write {
            assert_eq!(
                oram.read(random_index).unwrap(),
                mirror_array[random_index as usize]
            );
        } else {
            assert_eq!(
                oram.write(random_index, &random_block_value).unwrap(),
                mirror_array[random_index as usize]
            );
            mirror_array[random_index as usize] = random_block_value;
        }
    }

    for index in 0..capacity {
        assert_eq!(
            oram.read(index).unwrap(),
            mirror_array[index as usize],
            "{index}"
        )
    }

    oram.test_hook();
}

/// Tests the correctness of an `Oram` type T on repeated passes of sequential accesses 0, 1, ..., `capacity`
pub(crate) fn test_correctness_linear_workload<T: Testable>(
    config: OramConfig,
    num_operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);

    let oram = T::for_config(config, 1);
    let capacity = config.block_capacity;
    let mut mirror_array = vec![vec![0u8; config.block_size]; capacity as usize];

    let num_passes = u64::from(num_operations) / capacity;

    for _ in 0..num_passes {
        for index in 0..capacity {
            let random_block_value = random_payload(&mut rng, config.block_size);

            let read_versus_write: bool = rng.gen::<bool>();

            if read_versus_write {
                assert_eq!(oram.read(index).unwrap(), mirror_array[index as usize]);
            } else {
                oram.write(index, &random_block_value).unwrap();
                mirror_array[index as usize] = random_block_value;
            }
        }
    }

    for index in 0..capacity {
        assert_eq!(
            oram.read(index).unwrap(),
            mirror_array[index as usize],
            "{index}"
        )
    }

    oram.test_hook();
}

macro_rules! create_correctness_test {
    ($function_name:ident, $oram_type: ident, $branching_factor: expr, $bucket_size: expr, $block_capacity:expr, $block_size: expr, $iterations_to_test: expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $oram_type:snake _ $branching_factor _ $bucket_size _ $block_capacity _ $block_size _ $iterations_to_test>]() {
                $function_name::<$oram_type>(
                    crate::OramConfig::new($branching_factor, $block_capacity, $bucket_size, $block_size),
                    $iterations_to_test,
                );
            }
        }
    };
}

macro_rules! create_correctness_tests_for_workload_and_oram_type {
    ($function_name: ident, $oram_type: ident) => {
        create_correctness_test!($function_name, $oram_type, 2, 4, 2, 2, 10);
        create_correctness_test!($function_name, $oram_type, 2, 4, 8, 4, 100);
        create_correctness_test!($function_name, $oram_type, 2, 3, 8, 8, 100);
        create_correctness_test!($function_name, $oram_type, 3, 4, 9, 4, 100);
        create_correctness_test!($function_name, $oram_type, 3, 2, 20, 1, 200);
        create_correctness_test!($function_name, $oram_type, 4, 4, 16, 16, 100);
        create_correctness_test!($function_name, $oram_type, 2, 4, 32, 4, 100);
        // Binary tree, 2 slots per bucket, 64 blocks of 16 bytes, testing with 100 operations
        create_correctness_test!($function_name, $oram_type, 2, 2, 64, 16, 100);
        create_correctness_test!($function_name, $oram_type, 5, 1, 25, 8, 100);
        create_correctness_test!($function_name, $oram_type, 2, 4, 8, 2, 1000);
    };
}

macro_rules! create_correctness_tests_for_oram_type {
    ($oram_type: ident) => {
        create_correctness_tests_for_workload_and_oram_type!(
            test_correctness_linear_workload,
            $oram_type
        );
        create_correctness_tests_for_workload_and_oram_type!(
            test_correctness_random_workload,
            $oram_type
        );
    };
}

pub(crate) use create_correctness_test;
pub(crate) use create_correctness_tests_for_oram_type;
pub(crate) use create_correctness_tests_for_workload_and_oram_type;

/// Asserts that the stash never grows past its soft limit.
#[derive(Debug)]
pub(crate) struct StashSizeMonitor {
    oram: CountingOram,
}

/// Asserts that every address touched so far has exactly one live copy, in the tree or the stash.
#[derive(Debug)]
pub(crate) struct ConstantOccupancyMonitor {
    oram: CountingOram,
    touched: RefCell<HashSet<Address>>,
}

/// Asserts that every access reads and writes exactly one path.
#[derive(Debug)]
pub(crate) struct PhysicalAccessCountMonitor {
    oram: CountingOram,
}

/// Asserts, once the workload is done, that reads spread evenly across the leaves.
#[derive(Debug)]
pub(crate) struct LeafUniformityMonitor {
    oram: CountingOram,
}

#[duplicate_item(
    monitor_type;
    [StashSizeMonitor];
    [PhysicalAccessCountMonitor];
    [LeafUniformityMonitor];
)]
impl monitor_type {
    fn wrap(oram: CountingOram) -> Self {
        Self { oram }
    }
}

impl ConstantOccupancyMonitor {
    fn wrap(oram: CountingOram) -> Self {
        Self {
            oram,
            touched: RefCell::new(HashSet::new()),
        }
    }
}

#[duplicate_item(
    monitor_type;
    [StashSizeMonitor];
    [ConstantOccupancyMonitor];
    [PhysicalAccessCountMonitor];
    [LeafUniformityMonitor];
)]
impl Oram for monitor_type {
    fn block_capacity(&self) -> Address {
        self.oram.block_capacity()
    }

    fn block_size(&self) -> BlockSize {
        self.oram.block_size()
    }

    fn access(&self, address: Address, operation: Operation) -> Result<Vec<u8>, OramError> {
        self.before_access();
        let result = self.oram.access(address, operation)?;
        self.after_access(address);
        Ok(result)
    }
}

#[duplicate_item(
    monitor_type;
    [StashSizeMonitor];
    [ConstantOccupancyMonitor];
    [PhysicalAccessCountMonitor];
    [LeafUniformityMonitor];
)]
impl Testable for monitor_type {
    fn for_config(config: OramConfig, seed: u64) -> Self {
        Self::wrap(CountingOram::for_config(config, seed))
    }

    fn test_hook(&self) {
        // The audit reads every bucket, so counts are checked before it runs.
        self.final_check();
        self.oram.test_hook();
    }
}

impl StashSizeMonitor {
    fn before_access(&self) {}

    fn after_access(&self, _address: Address) {
        let stash_size = self.oram.stash_size().unwrap();
        let limit = self.oram.config().resolved_stash_soft_limit().unwrap();
        assert!(stash_size <= limit, "{stash_size} > {limit}");
    }

    fn final_check(&self) {}
}

impl ConstantOccupancyMonitor {
    fn before_access(&self) {}

    fn after_access(&self, address: Address) {
        self.touched.borrow_mut().insert(address);
        let report = self.oram.audit().unwrap();
        assert_eq!(
            report.tree_blocks + report.stash_blocks,
            self.touched.borrow().len()
        );
    }

    fn final_check(&self) {}
}

impl PhysicalAccessCountMonitor {
    fn before_access(&self) {
        self.oram
            .with_storage(|storage| storage.reset_counts())
            .unwrap();
    }

    fn after_access(&self, _address: Address) {
        let (reads, writes) = self
            .oram
            .with_storage(|storage| (storage.get_read_count(), storage.get_write_count()))
            .unwrap();
        let path_len = u64::from(self.oram.height()) + 1;
        assert_eq!(reads, path_len);
        assert_eq!(writes, path_len);
    }

    fn final_check(&self) {}
}

impl LeafUniformityMonitor {
    fn before_access(&self) {}

    fn after_access(&self, _address: Address) {}

    fn final_check(&self) {
        let heap = *self.oram.heap();
        let (reads, writes) = self
            .oram
            .with_storage(|storage| (storage.reads.clone(), storage.writes.clone()))
            .unwrap();

        for (r, w) in reads.iter().zip(writes.iter()) {
            assert_eq!(*r, *w);
        }

        let leaf_reads: Vec<u64> = heap.leaves().map(|leaf| reads[leaf as usize]).collect();
        let expected_reads_per_leaf = leaf_reads.iter().sum::<u64>() / heap.leaf_count();

        for (leaf, count) in heap.leaves().zip(leaf_reads) {
            assert!(
                count > expected_reads_per_leaf - expected_reads_per_leaf / 2,
                "leaf {leaf}: {count} reads"
            );
            assert!(
                count < expected_reads_per_leaf + expected_reads_per_leaf / 2,
                "leaf {leaf}: {count} reads"
            );
        }
    }
}

macro_rules! create_monitor_tests_for_oram_type {
    ($oram_type: ident) => {
        create_correctness_test!(test_correctness_random_workload, $oram_type, 2, 4, 8, 4, 100);
        create_correctness_test!(test_correctness_random_workload, $oram_type, 3, 4, 27, 8, 200);
        create_correctness_test!(test_correctness_random_workload, $oram_type, 2, 4, 64, 16, 500);
        create_correctness_test!(test_correctness_linear_workload, $oram_type, 4, 4, 64, 4, 300);
    };
}

macro_rules! create_statistics_tests_for_oram_type {
    ($oram_type: ident) => {
        create_correctness_test!(test_correctness_random_workload, $oram_type, 2, 4, 32, 4, 4000);
        create_correctness_test!(test_correctness_linear_workload, $oram_type, 2, 4, 32, 4, 4000);
        create_correctness_test!(test_correctness_random_workload, $oram_type, 3, 4, 27, 4, 4000);
    };
}

pub(crate) use create_monitor_tests_for_oram_type;
pub(crate) use create_statistics_tests_for_oram_type;
