//! Local storage for the genetic ledger
//!
//! Persistent store in the framed format of [`frame`].
//! Open the store, breed against its ledger, flush or close to persist.

pub mod frame;

use crate::hash::Fingerprint;
use crate::ledger::{DifficultyPolicy, GeneticLedger};
use frame::FrameError;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Failures opening or persisting a ledger file
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ledger file is malformed: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is a ledger but cannot be trusted: `records` failed the
    /// audit, and `damage` is set when the file itself is cut short or garbled
    #[error(
        "ledger file failed validation ({} corrupted record(s){}); restore from backup",
        .records.len(),
        .damage.as_ref().map(|d| format!(", {}", d)).unwrap_or_default()
    )]
    Corrupted {
        records: Vec<Fingerprint>,
        damage: Option<FrameError>,
    },
}

/// A genetic ledger bound to the file it persists to
pub struct LedgerStore {
    ledger: Arc<GeneticLedger>,
    path: PathBuf,
}

impl LedgerStore {
    /// Load the ledger at `path`, or start an empty one if there is no file
    ///
    /// A loaded ledger is fully audited first; a file with any invalid
    /// record, or one that is truncated or garbled, is refused with
    /// [`StoreError::Corrupted`].
    pub fn open(path: impl AsRef<Path>, policy: Arc<dyn DifficultyPolicy>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!("No ledger at {}, starting fresh", path.display());
            return Ok(Self {
                ledger: Arc::new(GeneticLedger::with_policy(policy)),
                path,
            });
        }

        let salvage = frame::decode_salvage(BufReader::new(File::open(&path)?))?;
        let ledger = GeneticLedger::restore(salvage.records, policy);
        if let Some(damage) = &salvage.damage {
            warn!("Ledger file {} is damaged: {}", path.display(), damage);
            ledger.mark_corrupted();
        }
        if ledger.is_corrupted() {
            let records: Vec<Fingerprint> = ledger.audit().into_iter().map(|f| f.fingerprint).collect();
            warn!(
                "Refusing ledger {}: {} corrupted record(s)",
                path.display(),
                records.len()
            );
            return Err(StoreError::Corrupted {
                records,
                damage: salvage.damage,
            });
        }

        info!("Loaded {} records from {}", ledger.len(), path.display());
        Ok(Self {
            ledger: Arc::new(ledger),
            path,
        })
    }

    pub fn ledger(&self) -> &Arc<GeneticLedger> {
        &self.ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the current snapshot, replacing the file atomically
    pub fn flush(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let snapshot = self.ledger.snapshot();
        let tmp = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            frame::encode(BufWriter::new(&file), snapshot.records())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        info!(
            "Saved {} records to {}",
            snapshot.records().len(),
            self.path.display()
        );
        Ok(())
    }

    /// Flush and release the store
    pub fn close(self) -> Result<(), StoreError> {
        self.flush()
    }

    pub fn summary(&self) -> String {
        format!("{} | {}", self.ledger.summary(), self.path.display())
    }
}
