use crate::{HarvestError, LedgerEntry, Result, LEDGER_FILE_NAME};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const HEADER: [&str; 2] = ["Link", "Downloaded File Name"];

/// Append-only record of the files downloaded into one query folder.
///
/// The ledger is a CSV file with a fixed `Link,Downloaded File Name` header. Every
/// `append` writes and syncs its row immediately, so a crash loses at most the entry
/// being written.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Opens the ledger in `folder`, creating it with its header if it does not exist yet.
    /// Existing entries are kept.
    #[instrument(skip_all, fields(folder = %folder.display()))]
    pub fn open(folder: &Path) -> Result<Self> {
        let path = folder.join(LEDGER_FILE_NAME);

        if !path.exists() {
            let file = File::create(&path).map_err(|e| HarvestError::io(&path, e))?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(HEADER)?;
            writer.flush().map_err(|e| HarvestError::io(&path, e))?;
            debug!(path = %path.display(), "Created ledger");
        }

        Ok(Self { path })
    }

    /// Appends one row and syncs it to disk.
    pub fn append(&self, url: &str, filename: &str) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| HarvestError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(LedgerEntry {
            url: url.to_string(),
            filename: filename.to_string(),
        })?;
        writer.flush().map_err(|e| HarvestError::io(&self.path, e))?;
        writer
            .get_ref()
            .sync_data()
            .map_err(|e| HarvestError::io(&self.path, e))?;

        Ok(())
    }

    /// Reads every entry recorded so far.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let entries = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
