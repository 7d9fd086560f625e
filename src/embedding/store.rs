//! Binary storage for owner embeddings.
//!
//! File format: `animal_vectors.bin` / `user_vectors.bin`
//!
//! Header (45 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - owner_id_len: u16 (little-endian), owner_id: UTF-8 bytes
//! - payload_len: u32 (little-endian), payload: codec-encoded vector
//!
//! Entries carry their own dimension, so a store may hold vectors of
//! different sizes. Readers decide what to do with mismatches.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        RwLock,
    },
};

use sha2::{Digest, Sha256};

use super::{codec, CodecError, Embedding};
use crate::storage::write_atomic;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 45;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Persistent `owner id -> Embedding` map with upsert semantics.
pub trait EmbeddingStore: Send + Sync {
    fn get(&self, owner_id: &str) -> Result<Option<Embedding>, StoreError>;

    /// Create or replace the embedding of `embedding.owner_id`.
    fn put(&self, embedding: Embedding) -> Result<(), StoreError>;

    /// Every stored embedding, ordered by owner id.
    fn all(&self) -> Result<Vec<Embedding>, StoreError>;

    /// Returns true when an embedding was removed.
    fn remove(&self, owner_id: &str) -> Result<bool, StoreError>;

    /// Run `f` with persistence deferred until it returns.
    fn write_batch(&self, f: &mut dyn FnMut()) -> Result<(), StoreError> {
        f();
        Ok(())
    }
}

/// SHA256 of the embedding model name, pinned in the file header.
pub fn model_id(model_name: &str) -> [u8; 32] {
    Sha256::digest(model_name.as_bytes()).into()
}

pub struct VectorStore {
    path: PathBuf,
    model_id: [u8; 32],
    /// owner id -> encoded vector
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    batch_depth: AtomicUsize,
    dirty: AtomicBool,
}

impl VectorStore {
    /// Open the store at `path`. A missing file, a newer format version or a
    /// different model all start an empty store; the file is replaced on the
    /// next write.
    pub fn open(path: impl AsRef<Path>, model_name: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let model_id = model_id(model_name);

        let entries = match std::fs::read(&path) {
            Ok(bytes) => Self::parse(&bytes, &model_id, &path)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::info!("Creating new vector store at {}", path.display());
                BTreeMap::new()
            }
            Err(err) => return Err(err.into()),
        };

        log::debug!("loaded {} vectors from {}", entries.len(), path.display());

        Ok(Self {
            path,
            model_id,
            entries: RwLock::new(entries),
            batch_depth: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parse(
        bytes: &[u8],
        expected_model_id: &[u8; 32],
        path: &Path,
    ) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let header = Header::read(bytes)?;

        if header.version > FORMAT_VERSION {
            log::warn!(
                "{} has format version {}, supported version {FORMAT_VERSION}; starting empty",
                path.display(),
                header.version
            );
            return Ok(BTreeMap::new());
        }

        if header.model_id != *expected_model_id {
            log::warn!(
                "{} was written by a different embedding model; starting empty",
                path.display()
            );
            return Ok(BTreeMap::new());
        }

        let mut reader = ByteReader::new(&bytes[HEADER_SIZE..]);
        let mut entries = BTreeMap::new();

        for _ in 0..header.entry_count {
            let id_len = u16::from_le_bytes(reader.take_array()?) as usize;
            let owner_id = std::str::from_utf8(reader.take(id_len)?)
                .map_err(|_| StoreError::InvalidFormat("owner id is not utf-8".to_string()))?
                .to_string();
            let payload_len = u32::from_le_bytes(reader.take_array()?) as usize;
            let payload = reader.take(payload_len)?;

            // Skip entries with corrupted payloads
            if let Err(err) = codec::decode(payload) {
                log::warn!("dropping stored vector for {owner_id}: {err}");
                continue;
            }

            entries.insert(owner_id, payload.to_vec());
        }

        if !reader.is_empty() {
            return Err(StoreError::InvalidFormat(format!(
                "{} trailing bytes after last entry",
                reader.remaining()
            )));
        }

        Ok(entries)
    }

    fn serialize(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, StoreError> {
        let header = Header {
            version: FORMAT_VERSION,
            model_id: self.model_id,
            entry_count: entries.len() as u64,
        };

        let mut out = Vec::with_capacity(
            HEADER_SIZE
                + entries
                    .iter()
                    .map(|(id, payload)| 6 + id.len() + payload.len())
                    .sum::<usize>(),
        );
        header.write(&mut out);

        for (owner_id, payload) in entries {
            let id_len = u16::try_from(owner_id.len()).map_err(|_| {
                StoreError::InvalidFormat(format!("owner id too long: {} bytes", owner_id.len()))
            })?;
            let payload_len = u32::try_from(payload.len()).map_err(|_| {
                StoreError::InvalidFormat(format!("payload too long: {} bytes", payload.len()))
            })?;

            out.extend_from_slice(&id_len.to_le_bytes());
            out.extend_from_slice(owner_id.as_bytes());
            out.extend_from_slice(&payload_len.to_le_bytes());
            out.extend_from_slice(payload);
        }

        Ok(out)
    }

    fn save(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), StoreError> {
        if self.batch_depth.load(Ordering::SeqCst) > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let bytes = self.serialize(entries)?;
        write_atomic(&self.path, &bytes)?;
        self.dirty.store(false, Ordering::SeqCst);

        Ok(())
    }
}

impl EmbeddingStore for VectorStore {
    fn get(&self, owner_id: &str) -> Result<Option<Embedding>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        entries
            .get(owner_id)
            .map(|payload| -> Result<Embedding, StoreError> {
                Ok(Embedding::new(owner_id, codec::decode(payload)?))
            })
            .transpose()
    }

    fn put(&self, embedding: Embedding) -> Result<(), StoreError> {
        let payload = codec::encode(&embedding.vector)?;

        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(embedding.owner_id, payload);
        self.save(&entries)
    }

    fn all(&self) -> Result<Vec<Embedding>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        entries
            .iter()
            .map(|(owner_id, payload)| -> Result<Embedding, StoreError> {
                Ok(Embedding::new(owner_id.as_str(), codec::decode(payload)?))
            })
            .collect()
    }

    fn remove(&self, owner_id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if entries.remove(owner_id).is_none() {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }

    fn write_batch(&self, f: &mut dyn FnMut()) -> Result<(), StoreError> {
        {
            let _batch = BatchGuard::enter(&self.batch_depth);
            f();
        }

        if self.batch_depth.load(Ordering::SeqCst) == 0 && self.dirty.load(Ordering::SeqCst) {
            let entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
            self.save(&entries)?;
        }

        Ok(())
    }
}

/// Decrements the batch depth even if the batch body panics.
struct BatchGuard<'a>(&'a AtomicUsize);

impl<'a> BatchGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::SeqCst);
        Self(depth)
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    entry_count: u64,
}

impl Header {
    fn read(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "file is {} bytes, header needs {HEADER_SIZE}",
                bytes.len()
            )));
        }

        let stored_checksum = u32::from_le_bytes([bytes[41], bytes[42], bytes[43], bytes[44]]);
        if crc32fast::hash(&bytes[0..41]) != stored_checksum {
            return Err(StoreError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&bytes[1..33]);

        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[33..41]);

        Ok(Self {
            version: bytes[0],
            model_id,
            entry_count: u64::from_le_bytes(count),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.push(self.version);
        out.extend_from_slice(&self.model_id);
        out.extend_from_slice(&self.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&out[start..]);
        out.extend_from_slice(&checksum.to_le_bytes());
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        if self.bytes.len() < n {
            return Err(StoreError::InvalidFormat(format!(
                "unexpected end of file: wanted {n} bytes, {} left",
                self.bytes.len()
            )));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StoreError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "embedding-passage";

    fn open(dir: &tempfile::TempDir) -> VectorStore {
        VectorStore::open(dir.path().join("vectors.bin"), MODEL).unwrap()
    }

    #[test]
    fn test_put_get_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp);

        store.put(Embedding::new("A", vec![1.0, 0.0])).unwrap();
        store.put(Embedding::new("A", vec![0.0, 1.0, 0.5])).unwrap();

        let got = store.get("A").unwrap().unwrap();
        assert_eq!(got.vector, vec![0.0, 1.0, 0.5]);
        assert_eq!(got.dimension(), 3);
        assert_eq!(store.len(), 1);
        assert!(store.get("B").unwrap().is_none());
    }

    #[test]
    fn test_reload_and_order() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open(&tmp);
            store.put(Embedding::new("C", vec![0.0, 0.0, 1.0])).unwrap();
            store.put(Embedding::new("A", vec![1.0, 0.0, 0.0])).unwrap();
            store.put(Embedding::new("B", vec![0.0, 1.0])).unwrap();
        }

        let store = open(&tmp);
        let ids: Vec<_> = store.all().unwrap().into_iter().map(|e| e.owner_id).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(store.get("B").unwrap().unwrap().vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_non_finite_put_fails_and_keeps_previous() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp);
        store.put(Embedding::new("u1", vec![1.0])).unwrap();

        let result = store.put(Embedding::new("u1", vec![f32::NAN]));
        assert!(matches!(
            result,
            Err(StoreError::Codec(CodecError::NonFinite { index: 0 }))
        ));
        assert_eq!(store.get("u1").unwrap().unwrap().vector, vec![1.0]);
    }

    #[test]
    fn test_remove_persists() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open(&tmp);
            store.put(Embedding::new("u1", vec![1.0])).unwrap();
            assert!(store.remove("u1").unwrap());
            assert!(!store.remove("u1").unwrap());
        }
        assert!(open(&tmp).is_empty());
    }

    #[test]
    fn test_model_change_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        VectorStore::open(&path, MODEL)
            .unwrap()
            .put(Embedding::new("A", vec![1.0]))
            .unwrap();

        let other = VectorStore::open(&path, "another-model").unwrap();
        assert!(other.is_empty());
        assert_eq!(VectorStore::open(&path, MODEL).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupted_header_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        VectorStore::open(&path, MODEL)
            .unwrap()
            .put(Embedding::new("A", vec![1.0]))
            .unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[35] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            VectorStore::open(&path, MODEL),
            Err(StoreError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_truncated_entries_are_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        VectorStore::open(&path, MODEL)
            .unwrap()
            .put(Embedding::new("A", vec![1.0, 2.0]))
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(
            VectorStore::open(&path, MODEL),
            Err(StoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_write_batch_defers_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp);
        let path = store.path().to_path_buf();

        store
            .write_batch(&mut || {
                store.put(Embedding::new("A", vec![1.0])).unwrap();
                store.put(Embedding::new("B", vec![2.0])).unwrap();
                assert!(!path.exists());
            })
            .unwrap();

        assert!(path.exists());
        assert_eq!(open(&tmp).len(), 2);
    }
}
