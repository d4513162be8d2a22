// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Untrusted bucket storage for Oblivious RAM.

use crate::{config::OramConfig, AccessPhase, BucketId, OramError};
use duplicate::duplicate_item;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Random-access storage of fixed-size opaque bucket records, keyed by bucket id.
///
/// The storage sees only ciphertexts. It is not itself oblivious, and it is not trusted:
/// everything it returns is authenticated by the ORAM before use.
pub trait StorageBackend {
    /// The number of bucket records held.
    fn bucket_count(&self) -> u64;

    /// The size in bytes of every bucket record.
    fn bucket_len(&self) -> usize;

    /// Reads the record stored for `bucket`.
    fn get(&mut self, bucket: BucketId) -> io::Result<Vec<u8>>;

    /// Overwrites the record stored for `bucket`. `data` must be `bucket_len()` bytes.
    fn put(&mut self, bucket: BucketId, data: &[u8]) -> io::Result<()>;

    /// Makes previous writes durable.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Reads every record, in bucket order.
    fn snapshot(&mut self) -> io::Result<Vec<Vec<u8>>> {
        (0..self.bucket_count())
            .map(|bucket| self.get(bucket))
            .collect()
    }
}

fn check_bucket(bucket: BucketId, bucket_count: u64) -> io::Result<()> {
    if bucket >= bucket_count {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bucket {bucket} is outside storage of {bucket_count} buckets"),
        ));
    }
    Ok(())
}

fn check_len(data: &[u8], bucket_len: usize) -> io::Result<()> {
    if data.len() != bucket_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "record of {} bytes written to {bucket_len}-byte storage",
                data.len()
            ),
        ));
    }
    Ok(())
}

#[duplicate_item(
    wrapper;
    [Box<S>];
    [&mut S];
)]
impl<S: StorageBackend + ?Sized> StorageBackend for wrapper {
    fn bucket_count(&self) -> u64 {
        (**self).bucket_count()
    }

    fn bucket_len(&self) -> usize {
        (**self).bucket_len()
    }

    fn get(&mut self, bucket: BucketId) -> io::Result<Vec<u8>> {
        (**self).get(bucket)
    }

    fn put(&mut self, bucket: BucketId, data: &[u8]) -> io::Result<()> {
        (**self).put(bucket, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// A simple storage backend that keeps its records in a `Vec`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryStorage {
    buckets: Vec<Vec<u8>>,
    bucket_len: usize,
}

impl MemoryStorage {
    /// Returns `bucket_count` zero-filled records of `bucket_len` bytes.
    pub fn new(bucket_count: u64, bucket_len: usize) -> Result<Self, OramError> {
        Ok(Self {
            buckets: vec![vec![0u8; bucket_len]; usize::try_from(bucket_count)?],
            bucket_len,
        })
    }

    /// Returns storage with the geometry `config` requires.
    pub fn for_config(config: &OramConfig) -> Result<Self, OramError> {
        Self::new(config.heap()?.bucket_count(), config.bucket_ciphertext_len())
    }

    /// Direct mutable access to the stored bytes of `bucket`, bypassing the ORAM.
    pub fn raw_bucket_mut(&mut self, bucket: BucketId) -> Option<&mut Vec<u8>> {
        self.buckets.get_mut(usize::try_from(bucket).ok()?)
    }
}

impl StorageBackend for MemoryStorage {
    fn bucket_count(&self) -> u64 {
        self.buckets.len() as u64
    }

    fn bucket_len(&self) -> usize {
        self.bucket_len
    }

    fn get(&mut self, bucket: BucketId) -> io::Result<Vec<u8>> {
        check_bucket(bucket, self.bucket_count())?;
        Ok(self.buckets[bucket as usize].clone())
    }

    fn put(&mut self, bucket: BucketId, data: &[u8]) -> io::Result<()> {
        check_bucket(bucket, self.bucket_count())?;
        check_len(data, self.bucket_len)?;
        self.buckets[bucket as usize].copy_from_slice(data);
        Ok(())
    }
}

/// A storage backend that counts reads and writes.
#[derive(Debug)]
pub struct CountAccessesStorage<S> {
    inner: S,
    /// `reads[i]` tracks the total number of reads made to bucket `i`.
    pub reads: Vec<u64>,
    /// `writes[i]` tracks the total number of writes made to bucket `i`.
    pub writes: Vec<u64>,
}

impl<S: StorageBackend> CountAccessesStorage<S> {
    /// Wraps `inner`, with all counts at zero.
    pub fn new(inner: S) -> Result<Self, OramError> {
        let bucket_count = usize::try_from(inner.bucket_count())?;
        Ok(Self {
            inner,
            reads: vec![0u64; bucket_count],
            writes: vec![0u64; bucket_count],
        })
    }

    /// Returns the total number of reads to the storage.
    pub fn get_read_count(&self) -> u64 {
        self.reads.iter().sum()
    }

    /// Returns the total number of writes to the storage.
    pub fn get_write_count(&self) -> u64 {
        self.writes.iter().sum()
    }

    /// Sets all counts back to zero.
    pub fn reset_counts(&mut self) {
        self.reads.iter_mut().for_each(|count| *count = 0);
        self.writes.iter_mut().for_each(|count| *count = 0);
    }

    /// The wrapped storage.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwraps the storage, discarding the counts.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: StorageBackend> StorageBackend for CountAccessesStorage<S> {
    fn bucket_count(&self) -> u64 {
        self.inner.bucket_count()
    }

    fn bucket_len(&self) -> usize {
        self.inner.bucket_len()
    }

    fn get(&mut self, bucket: BucketId) -> io::Result<Vec<u8>> {
        log::debug!("Physical read -- {}", bucket);
        check_bucket(bucket, self.bucket_count())?;
        self.reads[bucket as usize] += 1;
        self.inner.get(bucket)
    }

    fn put(&mut self, bucket: BucketId, data: &[u8]) -> io::Result<()> {
        log::debug!("Physical write -- {}", bucket);
        check_bucket(bucket, self.bucket_count())?;
        self.writes[bucket as usize] += 1;
        self.inner.put(bucket, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A storage backend keeping all records contiguously in one file, record `i` at offset `i * bucket_len`.
///
/// The file has no header: the geometry must be supplied identically every time the file is opened.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    bucket_count: u64,
    bucket_len: usize,
}

impl FileStorage {
    fn expected_len(bucket_count: u64, bucket_len: usize) -> Result<u64, OramError> {
        bucket_count
            .checked_mul(u64::try_from(bucket_len)?)
            .ok_or(OramError::InvalidConfigurationError(
                "the storage file would be too large",
            ))
    }

    /// Creates (or truncates) the file at `path` and sizes it for `bucket_count` records.
    pub fn create<P: AsRef<Path>>(
        path: P,
        bucket_count: u64,
        bucket_len: usize,
    ) -> Result<Self, OramError> {
        let len = Self::expected_len(bucket_count, bucket_len)?;
        let to_error = |source: io::Error| OramError::StorageIOError {
            phase: AccessPhase::Format,
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(to_error)?;
        file.set_len(len).map_err(to_error)?;

        log::info!(
            "FileStorage::create({}, buckets = {}, bucket_len = {})",
            path.as_ref().display(),
            bucket_count,
            bucket_len
        );
        Ok(Self {
            file,
            bucket_count,
            bucket_len,
        })
    }

    /// Opens an existing file holding `bucket_count` records of `bucket_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigMismatch` if the file length does not match the geometry.
    pub fn open<P: AsRef<Path>>(
        path: P,
        bucket_count: u64,
        bucket_len: usize,
    ) -> Result<Self, OramError> {
        let expected = Self::expected_len(bucket_count, bucket_len)?;
        let to_error = |source: io::Error| OramError::StorageIOError {
            phase: AccessPhase::Fetch,
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(to_error)?;
        let found = file.metadata().map_err(to_error)?.len();
        if found != expected {
            return Err(OramError::ConfigMismatch {
                expected: format!("a file of {expected} bytes"),
                found: format!("{found} bytes"),
            });
        }

        log::info!(
            "FileStorage::open({}, buckets = {}, bucket_len = {})",
            path.as_ref().display(),
            bucket_count,
            bucket_len
        );
        Ok(Self {
            file,
            bucket_count,
            bucket_len,
        })
    }

    fn offset(&self, bucket: BucketId) -> io::Result<u64> {
        check_bucket(bucket, self.bucket_count)?;
        Ok(bucket * self.bucket_len as u64)
    }
}

impl StorageBackend for FileStorage {
    fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    fn bucket_len(&self) -> usize {
        self.bucket_len
    }

    fn get(&mut self, bucket: BucketId) -> io::Result<Vec<u8>> {
        let offset = self.offset(bucket)?;
        let mut result = vec![0u8; self.bucket_len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut result)?;
        Ok(result)
    }

    fn put(&mut self, bucket: BucketId, data: &[u8]) -> io::Result<()> {
        let offset = self.offset(bucket)?;
        check_len(data, self.bucket_len)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_logger, temp_path};

    #[test]
    fn memory_storage() {
        let mut storage = MemoryStorage::new(3, 4).unwrap();
        assert_eq!(storage.get(2).unwrap(), vec![0u8; 4]);
        storage.put(2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(storage.get(2).unwrap(), vec![1, 2, 3, 4]);

        assert!(storage.get(3).is_err());
        assert!(storage.put(0, &[1, 2, 3]).is_err());
        assert_eq!(storage.snapshot().unwrap().len(), 3);
    }

    #[test]
    fn counting_storage() {
        init_logger();
        let mut storage = CountAccessesStorage::new(MemoryStorage::new(4, 2).unwrap()).unwrap();
        storage.get(1).unwrap();
        storage.get(1).unwrap();
        storage.put(3, &[9, 9]).unwrap();
        assert_eq!(storage.reads, vec![0, 2, 0, 0]);
        assert_eq!(storage.writes, vec![0, 0, 0, 1]);
        assert_eq!(storage.get_read_count(), 2);
        assert_eq!(storage.get_write_count(), 1);

        storage.reset_counts();
        assert_eq!(storage.get_read_count(), 0);
        assert_eq!(storage.into_inner().get(3).unwrap(), vec![9, 9]);
    }

    #[test]
    fn boxed_and_borrowed_storage() {
        fn write_through<S: StorageBackend>(mut storage: S) {
            storage.put(1, &[7]).unwrap();
        }

        let mut storage = MemoryStorage::new(2, 1).unwrap();
        write_through(&mut storage);
        let mut boxed: Box<dyn StorageBackend> = Box::new(storage);
        assert_eq!(boxed.bucket_count(), 2);
        assert_eq!(boxed.get(1).unwrap(), vec![7]);
    }

    #[test]
    fn file_storage_persists() {
        init_logger();
        let path = temp_path("file_storage_persists");
        {
            let mut storage = FileStorage::create(&path, 5, 8).unwrap();
            assert_eq!(storage.get(4).unwrap(), vec![0u8; 8]);
            storage.put(3, b"abcdefgh").unwrap();
            storage.flush().unwrap();
        }

        let mut storage = FileStorage::open(&path, 5, 8).unwrap();
        assert_eq!(storage.get(3).unwrap(), b"abcdefgh");
        assert!(storage.get(5).is_err());
        assert!(storage.put(0, b"short").is_err());
        drop(storage);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_storage_geometry_mismatch() {
        let path = temp_path("file_storage_geometry_mismatch");
        FileStorage::create(&path, 5, 8).unwrap();
        assert!(matches!(
            FileStorage::open(&path, 6, 8),
            Err(OramError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            FileStorage::open(&path, 5, 9),
            Err(OramError::ConfigMismatch { .. })
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
