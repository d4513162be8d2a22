// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Sealing and opening of blocks and buckets.
//!
//! Each slot is stored as `nonce || seal(flag || address || payload)`, where `flag` is one byte,
//! `address` is a little-endian `u64` and `payload` is exactly `block_size` bytes. The record has
//! the same width for real and dummy blocks, and the associated data binds it to its
//! `(bucket, slot)` location. A bucket is the concatenation of its `Z` sealed slots.

use crate::{
    bucket::{Block, Bucket},
    crypto::{Aes256GcmEncryption, AuthenticatedEncryption, EncryptionKey},
    BlockSize, BucketId, BucketSize, OramError,
};
use rand::{CryptoRng, RngCore};
use subtle::ConditionallySelectable;

const REAL_FLAG: u8 = 0;
const DUMMY_FLAG: u8 = 1;
const ADDRESS_LEN: usize = std::mem::size_of::<u64>();
const RECORD_HEADER_LEN: usize = 1 + ADDRESS_LEN;

/// Converts between blocks and their sealed, fixed-width storage representation.
#[derive(Debug)]
pub struct BlockCodec<C: AuthenticatedEncryption = Aes256GcmEncryption> {
    cipher: C,
    block_size: BlockSize,
    bucket_size: BucketSize,
}

impl<C: AuthenticatedEncryption> BlockCodec<C> {
    /// A codec sealing blocks of `block_size` bytes, `bucket_size` to a bucket, under `key`.
    pub fn new(key: &EncryptionKey, block_size: BlockSize, bucket_size: BucketSize) -> Self {
        Self {
            cipher: C::new(key),
            block_size,
            bucket_size,
        }
    }

    /// The payload size in bytes.
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// The number of slots per bucket.
    pub fn bucket_size(&self) -> BucketSize {
        self.bucket_size
    }

    fn plaintext_len(&self) -> usize {
        RECORD_HEADER_LEN + self.block_size
    }

    /// The size in bytes of one sealed slot holding a `block_size`-byte payload.
    pub fn slot_ciphertext_len_for(block_size: BlockSize) -> usize {
        C::NONCE_LEN + C::ciphertext_len(RECORD_HEADER_LEN + block_size)
    }

    /// As [`BlockCodec::bucket_ciphertext_len_for`], returning `None` if the size overflows a `usize`.
    pub fn checked_bucket_ciphertext_len_for(
        block_size: BlockSize,
        bucket_size: BucketSize,
    ) -> Option<usize> {
        Self::slot_ciphertext_len_for(0)
            .checked_add(block_size)?
            .checked_mul(bucket_size)
    }

    /// The size in bytes of one sealed bucket of `bucket_size` slots. The sizes must satisfy
    /// [`BlockCodec::checked_bucket_ciphertext_len_for`].
    pub fn bucket_ciphertext_len_for(block_size: BlockSize, bucket_size: BucketSize) -> usize {
        Self::slot_ciphertext_len_for(block_size) * bucket_size
    }

    /// The size in bytes of one sealed slot.
    pub fn slot_ciphertext_len(&self) -> usize {
        Self::slot_ciphertext_len_for(self.block_size)
    }

    /// The size in bytes of one sealed bucket.
    pub fn bucket_ciphertext_len(&self) -> usize {
        Self::bucket_ciphertext_len_for(self.block_size, self.bucket_size)
    }

    /// Returns a dummy block whose encoding is indistinguishable in size from a real block's.
    pub fn make_dummy(&self) -> Block {
        Block::dummy(self.block_size)
    }

    fn associated_data(bucket: BucketId, slot: usize) -> [u8; 2 * ADDRESS_LEN] {
        let mut aad = [0u8; 2 * ADDRESS_LEN];
        aad[..ADDRESS_LEN].copy_from_slice(&bucket.to_le_bytes());
        aad[ADDRESS_LEN..].copy_from_slice(&(slot as u64).to_le_bytes());
        aad
    }

    /// Seals `block` for storage in slot `slot` of bucket `bucket`, under a fresh random nonce.
    pub fn encode<R: RngCore + CryptoRng>(
        &self,
        block: &Block,
        bucket: BucketId,
        slot: usize,
        rng: &mut R,
    ) -> Result<Vec<u8>, OramError> {
        if block.payload().len() != self.block_size {
            return Err(OramError::ProtocolInvariantError(format!(
                "payload of {} bytes in an ORAM of {}-byte blocks",
                block.payload().len(),
                self.block_size
            )));
        }

        let mut plaintext = Vec::with_capacity(self.plaintext_len());
        plaintext.push(u8::conditional_select(
            &REAL_FLAG,
            &DUMMY_FLAG,
            block.ct_is_dummy(),
        ));
        plaintext.extend_from_slice(&block.raw_address().to_le_bytes());
        plaintext.extend_from_slice(block.payload());

        let mut nonce = vec![0u8; C::NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .seal(&nonce, &Self::associated_data(bucket, slot), &plaintext)
            .map_err(|e| {
                OramError::ProtocolInvariantError(format!("failed to seal a block: {e}"))
            })?;

        let mut result = nonce;
        result.extend_from_slice(&sealed);
        debug_assert_eq!(result.len(), self.slot_ciphertext_len());
        Ok(result)
    }

    /// Opens a slot sealed by [`BlockCodec::encode`] for the same location.
    ///
    /// # Errors
    ///
    /// Returns an `IntegrityError` if the slot does not authenticate.
    pub fn decode(&self, ciphertext: &[u8], bucket: BucketId, slot: usize) -> Result<Block, OramError> {
        if ciphertext.len() != self.slot_ciphertext_len() {
            return Err(OramError::IntegrityError { bucket, slot });
        }

        let (nonce, sealed) = ciphertext.split_at(C::NONCE_LEN);
        let plaintext = self
            .cipher
            .open(nonce, &Self::associated_data(bucket, slot), sealed)
            .map_err(|_| OramError::IntegrityError { bucket, slot })?;

        if plaintext.len() != self.plaintext_len() {
            return Err(OramError::ProtocolInvariantError(format!(
                "slot {slot} of bucket {bucket} holds a record of {} bytes",
                plaintext.len()
            )));
        }

        let (header, payload) = plaintext.split_at(RECORD_HEADER_LEN);
        let mut address_bytes = [0u8; ADDRESS_LEN];
        address_bytes.copy_from_slice(&header[1..]);
        let address = u64::from_le_bytes(address_bytes);

        match header[0] {
            DUMMY_FLAG => Ok(self.make_dummy()),
            REAL_FLAG if address != Block::DUMMY_ADDRESS => {
                Ok(Block::new(address, payload, self.block_size))
            }
            flag => Err(OramError::ProtocolInvariantError(format!(
                "slot {slot} of bucket {bucket} has malformed header (flag {flag})"
            ))),
        }
    }

    /// Seals every slot of `bucket` for storage at `bucket_id`.
    pub fn encode_bucket<R: RngCore + CryptoRng>(
        &self,
        bucket: &Bucket,
        bucket_id: BucketId,
        rng: &mut R,
    ) -> Result<Vec<u8>, OramError> {
        if bucket.len() != self.bucket_size {
            return Err(OramError::ProtocolInvariantError(format!(
                "bucket {bucket_id} has {} slots instead of {}",
                bucket.len(),
                self.bucket_size
            )));
        }

        let mut result = Vec::with_capacity(self.bucket_ciphertext_len());
        for (slot, block) in bucket.blocks().iter().enumerate() {
            result.extend_from_slice(&self.encode(block, bucket_id, slot, rng)?);
        }
        Ok(result)
    }

    /// Opens every slot of a bucket read from `bucket_id`.
    pub fn decode_bucket(&self, ciphertext: &[u8], bucket_id: BucketId) -> Result<Bucket, OramError> {
        if ciphertext.len() != self.bucket_ciphertext_len() {
            return Err(OramError::ConfigMismatch {
                expected: format!("{}-byte bucket records", self.bucket_ciphertext_len()),
                found: format!("{} bytes at bucket {}", ciphertext.len(), bucket_id),
            });
        }

        let blocks = ciphertext
            .chunks_exact(self.slot_ciphertext_len())
            .enumerate()
            .map(|(slot, sealed)| self.decode(sealed, bucket_id, slot))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Bucket { blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const BLOCK_SIZE: BlockSize = 16;
    const Z: BucketSize = 4;

    fn codec(rng: &mut StdRng) -> BlockCodec {
        BlockCodec::new(&EncryptionKey::generate_with(rng), BLOCK_SIZE, Z)
    }

    #[test]
    fn real_and_dummy_slots_have_the_same_width() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let real = codec
            .encode(&Block::new(5, b"hello", BLOCK_SIZE), 3, 1, &mut rng)
            .unwrap();
        let dummy = codec.encode(&codec.make_dummy(), 3, 1, &mut rng).unwrap();
        assert_eq!(real.len(), dummy.len());
        assert_eq!(real.len(), codec.slot_ciphertext_len());
        assert_eq!(codec.slot_ciphertext_len(), 12 + 1 + 8 + BLOCK_SIZE + 16);
    }

    #[test]
    fn encoding_is_randomized() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let block = Block::new(5, b"hello", BLOCK_SIZE);
        let first = codec.encode(&block, 0, 0, &mut rng).unwrap();
        let second = codec.encode(&block, 0, 0, &mut rng).unwrap();
        assert_ne!(first, second);

        let first_dummy = codec.encode(&codec.make_dummy(), 0, 0, &mut rng).unwrap();
        let second_dummy = codec.encode(&codec.make_dummy(), 0, 0, &mut rng).unwrap();
        assert_ne!(first_dummy, second_dummy);
    }

    #[test]
    fn decode_recovers_blocks() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let block = Block::new(5, b"hello", BLOCK_SIZE);
        let sealed = codec.encode(&block, 9, 2, &mut rng).unwrap();
        assert_eq!(codec.decode(&sealed, 9, 2).unwrap(), block);

        let sealed = codec.encode(&codec.make_dummy(), 9, 3, &mut rng).unwrap();
        assert!(codec.decode(&sealed, 9, 3).unwrap().is_dummy());
    }

    #[test]
    fn flipped_bits_fail_authentication() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let sealed = codec
            .encode(&Block::new(5, b"hello", BLOCK_SIZE), 1, 0, &mut rng)
            .unwrap();
        for byte in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[byte] ^= 0x80;
            assert!(matches!(
                codec.decode(&tampered, 1, 0),
                Err(OramError::IntegrityError { bucket: 1, slot: 0 })
            ));
        }
    }

    #[test]
    fn relocated_slots_fail_authentication() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let sealed = codec
            .encode(&Block::new(5, b"hello", BLOCK_SIZE), 1, 0, &mut rng)
            .unwrap();
        assert!(codec.decode(&sealed, 2, 0).is_err());
        assert!(codec.decode(&sealed, 1, 1).is_err());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let mut rng = StdRng::seed_from_u64(0);
        let sealed = codec(&mut rng)
            .encode(&Block::new(5, b"hello", BLOCK_SIZE), 1, 0, &mut rng)
            .unwrap();
        assert!(matches!(
            codec(&mut rng).decode(&sealed, 1, 0),
            Err(OramError::IntegrityError { .. })
        ));
    }

    #[test]
    fn buckets() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let bucket = Bucket::from_blocks(
            vec![Block::new(1, b"a", BLOCK_SIZE), Block::new(2, b"b", BLOCK_SIZE)],
            Z,
            BLOCK_SIZE,
        )
        .unwrap();
        let sealed = codec.encode_bucket(&bucket, 6, &mut rng).unwrap();
        assert_eq!(sealed.len(), codec.bucket_ciphertext_len());
        assert_eq!(codec.decode_bucket(&sealed, 6).unwrap(), bucket);

        // Slots are bound to their bucket.
        assert!(codec.decode_bucket(&sealed, 5).is_err());
        assert!(matches!(
            codec.decode_bucket(&sealed[1..], 6),
            Err(OramError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = codec(&mut rng);
        let short = Bucket::dummy(Z - 1, BLOCK_SIZE);
        assert!(matches!(
            codec.encode_bucket(&short, 0, &mut rng),
            Err(OramError::ProtocolInvariantError(_))
        ));
        assert!(matches!(
            codec.encode(&Block::dummy(BLOCK_SIZE + 1), 0, 0, &mut rng),
            Err(OramError::ProtocolInvariantError(_))
        ));
    }
}
