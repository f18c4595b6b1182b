//! Per-file failure types.
//!
//! A failure on one file never aborts a scan; these types let the scan
//! coordinator tell apart what happened so it can count and report it.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reading a bag file.
#[derive(Error, Debug)]
pub enum BagError {
    /// The file could not be opened or read.
    #[error("unreadable: {0}")]
    Unreadable(#[from] std::io::Error),

    /// The bytes do not form a valid bag.
    #[error("corrupt bag: {0}")]
    Corrupt(String),

    /// The file ends in the middle of a record.
    #[error("truncated bag: unexpected end of file at byte {offset}")]
    Truncated { offset: u64 },
}

/// Failure reconciling one file against the catalog.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The file is not readable by this process.
    #[error("unable to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fingerprinting or metadata extraction failed.
    #[error("unable to fingerprint {}: {source}", path.display())]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: BagError,
    },

    /// The file's content is already cataloged under another path.
    #[error("file {} is a duplicate of {}", path.display(), existing.display())]
    DuplicateContent { path: PathBuf, existing: PathBuf },

    /// A catalog operation failed while the catalog lock was held.
    #[error("catalog update failed for {}: {source:#}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ReconcileError::DuplicateContent { .. })
    }
}
