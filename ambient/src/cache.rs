//! Ambient Cache

use super::file::*;
use super::record::*;
use rtcore::color::Rgb;
use rtcore::error::{Result, RtError};
use rtcore::fileutil::{sidecar_path, FileLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Number of independently locked shards.
const SHARDS: usize = 16;

type Shard = RwLock<HashMap<AmbientKey, AmbientRecord>>;

/// In-memory store of ambient records with an optional backing file shared
/// by every process using the same file.
pub struct AmbientCache {
    /// Records sharded by key hash.
    shards: Vec<Shard>,

    /// Backing file.
    file: Option<PathBuf>,
}

impl AmbientCache {
    /// Creates an empty cache.
    ///
    /// * `file` - Optional backing file.
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            file,
        }
    }

    /// Returns the backing file.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn shard(&self, key: &AmbientKey) -> &Shard {
        &self.shards[(fnv1a(&key.to_bytes()) % SHARDS as u64) as usize]
    }

    /// Returns the record for `key`.
    ///
    /// * `key` - The key.
    pub fn lookup(&self, key: &AmbientKey) -> Option<AmbientRecord> {
        self.shard(key).read().unwrap().get(key).copied()
    }

    /// Averages a new estimate into the record for `key` and returns the
    /// refined record.
    ///
    /// * `key`      - The key.
    /// * `estimate` - New irradiance estimate.
    /// * `samples`  - Samples behind `estimate`.
    pub fn refine(&self, key: AmbientKey, estimate: Rgb, samples: u32) -> AmbientRecord {
        let mut shard = self.shard(&key).write().unwrap();
        let rec = shard
            .get(&key)
            .map_or(AmbientRecord::new(estimate, samples), |r| r.refine(estimate, samples));
        shard.insert(key, rec);
        rec
    }

    /// Joins records into the cache. Returns the number of keys whose record
    /// changed.
    ///
    /// * `delta` - Records to join.
    pub fn merge<I>(&self, delta: I) -> usize
    where
        I: IntoIterator<Item = (AmbientKey, AmbientRecord)>,
    {
        let mut changed = 0;
        for (key, rec) in delta {
            let mut shard = self.shard(&key).write().unwrap();
            let joined = shard.get(&key).map_or(rec, |old| AmbientRecord::join(*old, rec));
            if shard.insert(key, joined) != Some(joined) {
                changed += 1;
            }
        }
        changed
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    /// Returns true if there are no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of every record.
    pub fn records(&self) -> Vec<(AmbientKey, AmbientRecord)> {
        self.shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .unwrap()
                    .iter()
                    .map(|(k, r)| (*k, *r))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Removes every record.
    pub fn clear(&self) {
        for s in self.shards.iter() {
            s.write().unwrap().clear();
        }
    }

    /// Joins the backing file into memory. A corrupt file is skipped with a
    /// warning. Returns the number of records read.
    pub fn load(&self) -> Result<usize> {
        let Some(path) = self.file.as_deref() else {
            return Ok(0);
        };
        let _lock = FileLock::shared(&sidecar_path(path, ".lock"))?;
        let records = self.read_backing(path)?;
        let n = records.len();
        self.merge(records);
        debug!("loaded {n} ambient records from {}", path.display());
        Ok(n)
    }

    /// Synchronizes with the backing file: under an exclusive lock, joins the
    /// current file contents into memory, then atomically replaces the file
    /// with the union. Returns the number of records written.
    pub fn flush_to_disk(&self) -> Result<usize> {
        let Some(path) = self.file.as_deref() else {
            return Ok(0);
        };
        let _lock = FileLock::exclusive(&sidecar_path(path, ".lock"))?;
        let on_disk = self.read_backing(path)?;
        self.merge(on_disk);

        let records = self.records();
        write_ambient_file(path, &encode_records(records.iter().map(|(k, r)| (k, r))))?;
        debug!("wrote {} ambient records to {}", records.len(), path.display());
        Ok(records.len())
    }

    fn read_backing(&self, path: &Path) -> Result<Vec<(AmbientKey, AmbientRecord)>> {
        match read_ambient_file(path) {
            Ok(records) => Ok(records.unwrap_or_default()),
            Err(RtError::Format(msg)) => {
                warn!("{}: {msg}; ignoring its contents", path.display());
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
