// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A very simple demonstration of the use of ORAM.

extern crate tree_oram;

use tree_oram::{EncryptionKey, MemoryStorage, ObliviousStore, Oram, OramConfig, OramError};

fn main() -> Result<(), OramError> {
    let config = OramConfig::with_defaults(64, 8);
    let storage = MemoryStorage::for_config(&config)?;
    let oram = ObliviousStore::<MemoryStorage>::init(config, storage, EncryptionKey::generate())?;
    oram.write(0, &1u64.to_le_bytes())?;
    println!("{:?}", oram.read(0)?);
    Ok(())
}
