// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An example of using ORAM to obliviously serve an indexed database.

extern crate tree_oram;

use rand::{rngs::OsRng, Rng};
use tree_oram::{
    Address, BlockSize, EncryptionKey, MemoryStorage, ObliviousStore, Oram, OramConfig, OramError,
};

const BLOCK_SIZE: BlockSize = 4096;
const DB_SIZE: Address = 64;
// A stand-in for the indexed database you want to obliviously serve.
const DATABASE: [[u8; BLOCK_SIZE]; DB_SIZE as usize] = [[0; BLOCK_SIZE]; DB_SIZE as usize];

fn main() -> Result<(), OramError> {
    let mut rng = OsRng;
    let config = OramConfig::new(4, DB_SIZE, 4, BLOCK_SIZE);
    let storage = MemoryStorage::for_config(&config)?;
    let oram = ObliviousStore::<MemoryStorage>::init(config, storage, EncryptionKey::generate())?;

    // Read DATABASE into oram.
    for (i, bytes) in DATABASE.iter().enumerate() {
        oram.write(i as Address, bytes)?;
    }

    // Now oram can be used to obliviously serve the contents of DATABASE.
    let num_operations = 100;
    for _ in 0..num_operations {
        let random_index = rng.gen_range(0..DB_SIZE);

        let _ = oram.read(random_index)?;
    }

    println!("Served {num_operations} reads; stash holds {} blocks.", oram.stash_size()?);
    Ok(())
}
