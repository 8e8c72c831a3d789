/// Flat key/value backend
///
/// The whole map lives in memory and is persisted as one snapshot file after
/// every mutation. A mutation is applied to a copy of the map and only
/// swapped in once the snapshot is on disk, so a failed write leaves both the
/// file and the in-memory view unchanged.
///
/// Snapshot format: [magic(4) | version(4) | crc(4) | len(4)] [bincode map]

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::StorageAdapter;
use crate::{Error, Result};

const SNAPSHOT_MAGIC: u32 = 0x52424B56; // "RBKV"
const SNAPSHOT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

type Map = BTreeMap<String, Vec<u8>>;

pub struct FlatFileStore {
    path: Option<PathBuf>,
    chunk_size: usize,
    map: RwLock<Map>,
}

impl FlatFileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist yet
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let raw = fs::read(&path)?;
            decode_snapshot(&raw)?
        } else {
            Map::new()
        };

        tracing::debug!(path = %path.display(), keys = map.len(), "Opened flat store");

        Ok(Self {
            path: Some(path),
            chunk_size: chunk_size.max(1),
            map: RwLock::new(map),
        })
    }

    /// Create a store that never touches the disk
    pub fn in_memory(chunk_size: usize) -> Self {
        Self {
            path: None,
            chunk_size: chunk_size.max(1),
            map: RwLock::new(Map::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Apply `mutate` to a copy of the map, persist it, then publish it.
    fn commit<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Map),
    {
        let mut map = self.map.write();
        let mut next = map.clone();
        mutate(&mut next);

        if let Some(path) = &self.path {
            write_snapshot(path, &next)?;
        }

        *map = next;
        Ok(())
    }
}

impl StorageAdapter for FlatFileStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.map.read().get(key).map(|v| Bytes::from(v.clone())))
    }

    fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.commit(|map| {
            map.insert(key.to_string(), value.to_vec());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !self.map.read().contains_key(key) {
            return Ok(());
        }
        self.commit(|map| {
            map.remove(key);
        })
    }

    fn get_all_keys(&self) -> Result<Vec<String>> {
        Ok(self.map.read().keys().cloned().collect())
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<Bytes>)>> {
        let map = self.map.read();
        Ok(keys
            .iter()
            .map(|k| (k.clone(), map.get(k).map(|v| Bytes::from(v.clone()))))
            .collect())
    }

    fn multi_set(&self, pairs: Vec<(String, Bytes)>) -> Result<()> {
        for chunk in pairs.chunks(self.chunk_size) {
            self.commit(|map| {
                for (key, value) in chunk {
                    map.insert(key.clone(), value.to_vec());
                }
            })?;
        }
        tracing::debug!(pairs = pairs.len(), "Flat store multi_set");
        Ok(())
    }

    fn multi_remove(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(self.chunk_size) {
            self.commit(|map| {
                for key in chunk {
                    map.remove(key);
                }
            })?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.commit(|map| map.clear())
    }

    fn backend_name(&self) -> &'static str {
        "flat"
    }
}

fn encode_snapshot(map: &Map) -> Result<Vec<u8>> {
    let payload = bincode::serialize(map)?;
    let crc = crc32fast::hash(&payload);

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(SNAPSHOT_MAGIC);
    buf.put_u32_le(SNAPSHOT_VERSION);
    buf.put_u32_le(crc);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.to_vec())
}

fn decode_snapshot(raw: &[u8]) -> Result<Map> {
    if raw.len() < HEADER_SIZE {
        return Err(Error::Corruption("Snapshot shorter than header".to_string()));
    }

    let word = |at: usize| [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]];

    if u32::from_be_bytes(word(0)) != SNAPSHOT_MAGIC {
        return Err(Error::Corruption("Invalid snapshot magic".to_string()));
    }

    let version = u32::from_le_bytes(word(4));
    if version != SNAPSHOT_VERSION {
        return Err(Error::Corruption(format!(
            "Unsupported snapshot version {}",
            version
        )));
    }

    let crc = u32::from_le_bytes(word(8));
    let len = u32::from_le_bytes(word(12)) as usize;
    let payload = raw
        .get(HEADER_SIZE..HEADER_SIZE + len)
        .ok_or_else(|| Error::Corruption("Truncated snapshot payload".to_string()))?;

    if crc32fast::hash(payload) != crc {
        return Err(Error::ChecksumMismatch);
    }

    Ok(bincode::deserialize(payload)?)
}

/// Write to a sibling temp file and rename over the target.
fn write_snapshot(path: &Path, map: &Map) -> Result<()> {
    let data = encode_snapshot(map)?;
    let tmp = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}
