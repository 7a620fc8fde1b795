use crate::{Fingerprint, HarvestError, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The `HashCache` is the persistent set of fingerprints of every URL downloaded so far.
/// It is backed by a text file holding one fingerprint per line; the file is only ever
/// appended to, and each append is synced before `record` returns.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    fingerprints: HashSet<Fingerprint>,
}

impl HashCache {
    /// Reads the cache file at `path`. A missing file yields an empty cache; any other
    /// read failure is returned.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let fingerprints = match fs::read_to_string(&path) {
            Ok(text) => text.lines().filter_map(Fingerprint::from_line).collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(HarvestError::io(&path, e)),
        };

        debug!(path = %path.display(), entries = fingerprints.len(), "Loaded hash cache");
        Ok(Self { path, fingerprints })
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Appends `fingerprint` to the backing file and then to the in-memory set.
    /// Nothing is added in memory if the append fails.
    pub fn record(&mut self, fingerprint: Fingerprint) -> Result<()> {
        if self.fingerprints.contains(&fingerprint) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HarvestError::io(&self.path, e))?;
        writeln!(file, "{}", fingerprint)
            .and_then(|_| file.sync_data())
            .map_err(|e| HarvestError::io(&self.path, e))?;

        self.fingerprints.insert(fingerprint);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Deletes the cache file at `path`. Returns `false` if there was nothing to delete.
    pub fn clear(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "Cleared hash cache");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HarvestError::io(path, e)),
        }
    }
}
