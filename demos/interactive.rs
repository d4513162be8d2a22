// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A simple interactive demonstration of ORAM over a file.
//!
//! The file only ever sees whole paths of sealed buckets being read and rewritten.

use rustyline::history::FileHistory;
use rustyline::Editor;
use tree_oram::{EncryptionKey, FileStorage, ObliviousStore, Oram, OramConfig};

fn parse_number(
    prompt: &str,
    rl: &mut Editor<(), FileHistory>,
) -> Result<u64, Box<dyn std::error::Error>> {
    Ok(loop {
        println!("{}", prompt);
        println!();
        let readline: String = rl.readline("> ")?;
        let number_parse = readline.trim().parse::<u64>();
        match number_parse {
            Ok(number) => break number,
            Err(_) => {
                println!("Expected a number. Try again.");
                continue;
            }
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rl = Editor::<(), FileHistory>::new()?;

    let capacity = parse_number("How many integers would you like to store?", &mut rl)?;

    let config = OramConfig::with_defaults(capacity, 8);
    let heap = config.heap()?;
    let path = std::env::temp_dir().join(format!("tree_oram_interactive_{}.bin", std::process::id()));
    let storage = FileStorage::create(&path, heap.bucket_count(), config.bucket_ciphertext_len())?;
    println!(
        "Storing {} buckets of {} bytes in {}.",
        heap.bucket_count(),
        config.bucket_ciphertext_len(),
        path.display()
    );

    let oram = ObliviousStore::<FileStorage>::init(config, storage, EncryptionKey::generate())?;

    loop {
        let action = loop {
            println!("Enter an option (R, W or Q):");
            println!("R) Read");
            println!("W) Write");
            println!("Q) Quit");
            let action: String = rl.readline("> ")?;
            let action = action.trim().to_uppercase();
            if !["R", "W", "Q"].contains(&action.as_str()) {
                println!("Try again.");
                continue;
            }
            break action;
        };

        if action == "Q" {
            break;
        }

        let address = parse_number("What address?", &mut rl)?;

        if action == "R" {
            match oram.read(address) {
                Ok(bytes) => {
                    let mut value = [0u8; 8];
                    value.copy_from_slice(&bytes[..8]);
                    println!("Value at {} is {}.", address, u64::from_le_bytes(value));
                }
                Err(e) => println!("{e}"),
            }
        }

        if action == "W" {
            let value = parse_number("Value to write?", &mut rl)?;
            match oram.write(address, &value.to_le_bytes()) {
                Ok(_) => println!("Wrote value {} to address {}.", value, address),
                Err(e) => println!("{e}"),
            }
        }
    }

    let (storage, _state) = oram.close()?;
    drop(storage);
    std::fs::remove_file(&path)?;
    Ok(())
}
